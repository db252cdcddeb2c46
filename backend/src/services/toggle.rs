//! Toggle coordinator for likes and subscriptions
//!
//! A toggle is check-then-act: look for the (actor, target) row, delete it if
//! present, insert it otherwise. Two guards keep that to at most one row:
//!
//! - a per-(actor, target) async mutex serializes toggles inside this process
//! - unique indexes make a racing insert from another process a no-op, which
//!   is reported as "already related"

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::db::sqlite_helpers::is_valid_id;
use crate::db::{Database, LikeInsert, LikeTarget};
use crate::error::{ApiError, AppResult};

// ============================================================================
// Keyed locks
// ============================================================================

/// One tracked key: its mutex and how many holders and waiters refer to it.
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockMap = Arc<Mutex<HashMap<String, Slot>>>;

/// Async mutexes created on demand per key and dropped once unused
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: LockMap,
}

/// Holds the lock for one key until dropped. Also created for a waiter, so a
/// waiter that is cancelled before acquiring still gives up its slot.
pub struct KeyGuard {
    key: String,
    map: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard {
        let key = key.into();
        let mutex = {
            let mut map = self.inner.lock();
            let slot = map.entry(key.clone()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            slot.mutex.clone()
        };

        let mut handle = KeyGuard {
            key,
            map: self.inner.clone(),
            guard: None,
        };
        handle.guard = Some(mutex.lock_owned().await);
        handle
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.map.lock();
        let unused = match map.get_mut(&self.key) {
            Some(slot) => {
                slot.users -= 1;
                slot.users == 0
            }
            None => false,
        };
        if unused {
            map.remove(&self.key);
        }
    }
}

// ============================================================================
// Toggle coordinator
// ============================================================================

#[derive(Clone)]
pub struct ToggleCoordinator {
    db: Database,
    locks: KeyedLocks,
}

impl ToggleCoordinator {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: KeyedLocks::new(),
        }
    }

    /// Whether `actor_id` may see the like target. Drafts and comments on
    /// drafts are hidden from everyone but the video's owner.
    async fn target_visible(&self, actor_id: &str, target: LikeTarget, target_id: &str) -> AppResult<bool> {
        let videos = self.db.videos();
        let visible = match target {
            LikeTarget::Video => videos
                .get_by_id(target_id)
                .await?
                .is_some_and(|v| v.is_visible_to(Some(actor_id))),
            LikeTarget::Comment => match self.db.comments().get_by_id(target_id).await? {
                Some(comment) => videos
                    .get_by_id(&comment.video_id)
                    .await?
                    .is_some_and(|v| v.is_visible_to(Some(actor_id))),
                None => false,
            },
            LikeTarget::Tweet => self.db.tweets().get_by_id(target_id).await?.is_some(),
        };
        Ok(visible)
    }

    /// Like or unlike a target. Returns the new state (`true` = liked).
    pub async fn toggle_like(&self, actor_id: &str, target: LikeTarget, target_id: &str) -> AppResult<bool> {
        if !is_valid_id(target_id) {
            return Err(ApiError::validation(format!("Invalid {} id", target.as_str())));
        }
        let not_found = || {
            let label = match target {
                LikeTarget::Video => "Video",
                LikeTarget::Comment => "Comment",
                LikeTarget::Tweet => "Tweet",
            };
            ApiError::not_found(format!("{} not found", label))
        };

        if !self.target_visible(actor_id, target, target_id).await? {
            return Err(not_found());
        }

        let _guard = self
            .locks
            .lock(format!("like:{}:{}:{}", target.as_str(), actor_id, target_id))
            .await;

        let likes = self.db.likes();
        let liked = if likes.find(target, target_id, actor_id).await?.is_some() {
            likes.delete(target, target_id, actor_id).await?;
            false
        } else {
            match likes.insert(target, target_id, actor_id).await? {
                // Another writer inserted it first: still liked.
                LikeInsert::Inserted | LikeInsert::AlreadyLiked => true,
                // Deleted since the visibility check.
                LikeInsert::TargetMissing => return Err(not_found()),
            }
        };

        debug!(actor_id = %actor_id, target = target.as_str(), target_id = %target_id, liked, "Toggled like");
        Ok(liked)
    }

    /// Subscribe to or unsubscribe from a channel. Returns the new state.
    pub async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> AppResult<bool> {
        if !is_valid_id(channel_id) {
            return Err(ApiError::validation("Invalid channel id"));
        }
        if self.db.users().get_by_id(channel_id).await?.is_none() {
            return Err(ApiError::not_found("Channel not found"));
        }

        let _guard = self
            .locks
            .lock(format!("sub:{}:{}", subscriber_id, channel_id))
            .await;

        let subscriptions = self.db.subscriptions();
        let subscribed = if subscriptions.find(subscriber_id, channel_id).await?.is_some() {
            subscriptions.delete(subscriber_id, channel_id).await?;
            false
        } else {
            subscriptions.insert(subscriber_id, channel_id).await?;
            true
        };

        debug!(subscriber_id = %subscriber_id, channel_id = %channel_id, subscribed, "Toggled subscription");
        Ok(subscribed)
    }
}
