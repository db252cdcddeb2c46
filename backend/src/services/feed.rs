//! Feed assembler
//!
//! Shapes graph query results into response payloads and owns the mutation
//! rules around them: ownership gates, cascading deletes, view counting and
//! replacement of stored assets.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::graph::{self, FeedQuery};
use super::storage::{SharedStorage, destroy_quietly};
use crate::config::PaginationConfig;
use crate::db::pipeline::Window;
use crate::db::sqlite_helpers::{is_unique_violation, is_valid_id};
use crate::db::{
    AssetRef, Collection, CommentRecord, CreateVideo, Database, Document, PublicUser, TweetRecord,
    UpdateVideo, VideoRecord,
};
use crate::error::{ApiError, AppResult};

/// Comment and tweet length limit, in characters
pub const MAX_CONTENT_CHARS: usize = 1000;
pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;

// ============================================================================
// Pagination
// ============================================================================

/// Paginated result envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: u64,
    pub limit: u32,
    pub page: u32,
    pub total_pages: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
    pub prev_page: Option<u32>,
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    pub fn new(docs: Vec<T>, total_docs: u64, window: Window) -> Self {
        let total_pages = total_docs.div_ceil(u64::from(window.limit.max(1))).max(1);
        let page = window.page;
        let has_prev_page = page > 1;
        let has_next_page = u64::from(page) < total_pages;
        Self {
            docs,
            total_docs,
            limit: window.limit,
            page,
            total_pages,
            has_prev_page,
            has_next_page,
            prev_page: has_prev_page.then(|| page - 1),
            next_page: has_next_page.then(|| page + 1),
        }
    }
}

/// Raw `page`/`limit` query values
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self { page, limit }
    }

    /// Validate against the configured bounds.
    pub fn window(&self, config: &PaginationConfig) -> AppResult<Window> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(ApiError::validation("page must be at least 1"));
        }
        let limit = self.limit.unwrap_or(config.default_page_size);
        if limit == 0 || limit > config.max_page_size {
            return Err(ApiError::validation(format!(
                "limit must be between 1 and {}",
                config.max_page_size
            )));
        }
        Ok(Window::new(page, limit))
    }
}

// ============================================================================
// Inputs and views
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VideoListQuery {
    pub paging: PageRequest,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishVideoInput {
    pub title: String,
    pub description: String,
    pub video_file: Option<AssetRef>,
    pub thumbnail: Option<AssetRef>,
    pub duration: Option<f64>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateVideoInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<AssetRef>,
}

/// Subscribers of a channel plus the viewer's own state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberList {
    pub total_subscribers: u64,
    pub is_subscribed: bool,
    #[serde(flatten)]
    pub page: Page<Document>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedChannels {
    pub subscribed_channels_count: u64,
    #[serde(flatten)]
    pub page: Page<Document>,
}

/// Trim `value` and check it is non-empty and at most `max` characters.
fn require_text(field: &str, value: &str, max: usize) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(ApiError::validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

fn require_id(kind: &str, id: &str) -> AppResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::validation(format!("Invalid {} id", kind)))
    }
}

// ============================================================================
// Feed service
// ============================================================================

#[derive(Clone)]
pub struct FeedService {
    db: Database,
    storage: SharedStorage,
    pagination: PaginationConfig,
}

impl FeedService {
    pub fn new(db: Database, storage: SharedStorage, pagination: PaginationConfig) -> Self {
        Self {
            db,
            storage,
            pagination,
        }
    }

    async fn owned_video(&self, actor_id: &str, video_id: &str) -> AppResult<VideoRecord> {
        require_id("video", video_id)?;
        let video = self
            .db
            .videos()
            .get_by_id(video_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Video not found"))?;
        if video.owner_id != actor_id {
            return Err(ApiError::permission("You are not the owner of this video"));
        }
        Ok(video)
    }

    async fn owned_comment(&self, actor_id: &str, comment_id: &str) -> AppResult<CommentRecord> {
        require_id("comment", comment_id)?;
        let comment = self
            .db
            .comments()
            .get_by_id(comment_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Comment not found"))?;
        if comment.owner_id != actor_id {
            return Err(ApiError::permission("You are not the owner of this comment"));
        }
        Ok(comment)
    }

    /// Videos visible to `viewer`: published ones, plus the viewer's own.
    async fn visible_video(&self, video_id: &str, viewer: Option<&str>) -> AppResult<VideoRecord> {
        require_id("video", video_id)?;
        match self.db.videos().get_by_id(video_id).await? {
            Some(v) if v.is_visible_to(viewer) => Ok(v),
            _ => Err(ApiError::not_found("Video not found")),
        }
    }

    // ========================================================================
    // Videos
    // ========================================================================

    pub async fn list_videos(&self, query: VideoListQuery) -> AppResult<Page<Document>> {
        let window = query.paging.window(&self.pagination)?;
        let sort = graph::parse_sort(query.sort_by.as_deref(), query.sort_type.as_deref())?;
        if let Some(user_id) = &query.user_id {
            require_id("user", user_id)?;
        }

        let plan = graph::video_feed(&FeedQuery {
            search: query.query,
            owner_id: query.user_id,
            sort,
            window,
        });
        let out = self.db.aggregate(Collection::Videos, &plan).await?;
        Ok(Page::new(out.docs, out.total, window))
    }

    pub async fn publish_video(&self, owner_id: &str, input: PublishVideoInput) -> AppResult<VideoRecord> {
        let title = require_text("Title", &input.title, MAX_TITLE_CHARS)?;
        let description = require_text("Description", &input.description, MAX_DESCRIPTION_CHARS)?;
        let video_file = input
            .video_file
            .ok_or_else(|| ApiError::validation("Video file is required"))?;
        let thumbnail = input
            .thumbnail
            .ok_or_else(|| ApiError::validation("Thumbnail is required"))?;
        let duration = input.duration.unwrap_or(0.0);
        if !duration.is_finite() || duration < 0.0 {
            return Err(ApiError::validation("Duration must be a non-negative number"));
        }

        let video = self
            .db
            .videos()
            .create(CreateVideo {
                owner_id: owner_id.to_string(),
                video_file,
                thumbnail,
                title,
                description,
                duration,
                is_published: input.is_published.unwrap_or(true),
            })
            .await?;

        info!(video_id = %video.id, owner_id = %owner_id, "Video published");
        Ok(video)
    }

    /// Video detail. Counts a view and records it in the viewer's history.
    pub async fn video_detail(&self, video_id: &str, viewer: Option<&str>) -> AppResult<Document> {
        self.visible_video(video_id, viewer).await?;

        self.db.videos().increment_views(video_id).await?;
        if let Some(viewer_id) = viewer {
            self.db.users().append_watch_history(viewer_id, video_id).await?;
        }

        self.db
            .aggregate(Collection::Videos, &graph::video_detail(video_id, viewer))
            .await?
            .into_first()
            .ok_or_else(|| ApiError::not_found("Video not found"))
    }

    pub async fn update_video(
        &self,
        actor_id: &str,
        video_id: &str,
        input: UpdateVideoInput,
    ) -> AppResult<VideoRecord> {
        let current = self.owned_video(actor_id, video_id).await?;

        let title = input
            .title
            .as_deref()
            .map(|t| require_text("Title", t, MAX_TITLE_CHARS))
            .transpose()?;
        let description = input
            .description
            .as_deref()
            .map(|d| require_text("Description", d, MAX_DESCRIPTION_CHARS))
            .transpose()?;
        if title.is_none() && description.is_none() && input.thumbnail.is_none() {
            return Err(ApiError::validation("Nothing to update"));
        }

        let replaced_thumbnail = input.thumbnail.is_some();
        let updated = self
            .db
            .videos()
            .update(
                video_id,
                UpdateVideo {
                    title,
                    description,
                    thumbnail: input.thumbnail,
                },
            )
            .await?
            .ok_or_else(|| ApiError::not_found("Video not found"))?;

        if replaced_thumbnail && current.thumbnail != updated.thumbnail {
            destroy_quietly(self.storage.as_ref(), &[&current.thumbnail]).await;
        }

        debug!(video_id = %video_id, "Video updated");
        Ok(updated)
    }

    /// Delete a video with its comments and every like on either.
    pub async fn delete_video(&self, actor_id: &str, video_id: &str) -> AppResult<()> {
        let video = self.owned_video(actor_id, video_id).await?;

        if !self.db.videos().delete_cascade(video_id).await? {
            return Err(ApiError::not_found("Video not found"));
        }
        destroy_quietly(self.storage.as_ref(), &[&video.video_file, &video.thumbnail]).await;

        info!(video_id = %video_id, owner_id = %actor_id, "Video deleted");
        Ok(())
    }

    pub async fn toggle_publish(&self, actor_id: &str, video_id: &str) -> AppResult<bool> {
        self.owned_video(actor_id, video_id).await?;
        let published = self
            .db
            .videos()
            .toggle_published(video_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Video not found"))?;
        debug!(video_id = %video_id, published, "Toggled publish status");
        Ok(published)
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn list_comments(
        &self,
        video_id: &str,
        viewer: Option<&str>,
        paging: PageRequest,
    ) -> AppResult<Page<Document>> {
        let window = paging.window(&self.pagination)?;
        self.visible_video(video_id, viewer).await?;

        let out = self
            .db
            .aggregate(Collection::Comments, &graph::video_comments(video_id, viewer, window))
            .await?;
        Ok(Page::new(out.docs, out.total, window))
    }

    pub async fn add_comment(&self, actor_id: &str, video_id: &str, content: &str) -> AppResult<CommentRecord> {
        let content = require_text("Content", content, MAX_CONTENT_CHARS)?;
        self.visible_video(video_id, Some(actor_id)).await?;

        let comment = self
            .db
            .comments()
            .create(video_id, actor_id, &content)
            .await?
            .ok_or_else(|| ApiError::not_found("Video not found"))?;
        debug!(comment_id = %comment.id, video_id = %video_id, "Comment added");
        Ok(comment)
    }

    pub async fn update_comment(&self, actor_id: &str, comment_id: &str, content: &str) -> AppResult<CommentRecord> {
        let content = require_text("Content", content, MAX_CONTENT_CHARS)?;
        self.owned_comment(actor_id, comment_id).await?;

        self.db
            .comments()
            .update_content(comment_id, &content)
            .await?
            .ok_or_else(|| ApiError::not_found("Comment not found"))
    }

    /// Delete a comment and its likes.
    pub async fn delete_comment(&self, actor_id: &str, comment_id: &str) -> AppResult<()> {
        self.owned_comment(actor_id, comment_id).await?;
        if !self.db.comments().delete_cascade(comment_id).await? {
            return Err(ApiError::not_found("Comment not found"));
        }
        debug!(comment_id = %comment_id, "Comment deleted");
        Ok(())
    }

    // ========================================================================
    // Tweets
    // ========================================================================

    pub async fn create_tweet(&self, actor_id: &str, content: &str) -> AppResult<TweetRecord> {
        let content = require_text("Content", content, MAX_CONTENT_CHARS)?;
        Ok(self.db.tweets().create(actor_id, &content).await?)
    }

    pub async fn get_tweet(&self, tweet_id: &str) -> AppResult<TweetRecord> {
        require_id("tweet", tweet_id)?;
        self.db
            .tweets()
            .get_by_id(tweet_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Tweet not found"))
    }

    // ========================================================================
    // Accounts and channels
    // ========================================================================

    pub async fn update_account(&self, user_id: &str, full_name: &str, email: &str) -> AppResult<PublicUser> {
        if full_name.trim().is_empty() || email.trim().is_empty() {
            return Err(ApiError::validation("All fields are required"));
        }
        let email = email.trim();

        let users = self.db.users();
        match users.get_by_email(email).await? {
            Some(existing) if existing.id != user_id => {
                return Err(ApiError::conflict("Email is already in use"));
            }
            _ => {}
        }

        let user = users
            .update_account(user_id, full_name.trim(), email)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::conflict("Email is already in use")
                } else {
                    e.into()
                }
            })?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        Ok(PublicUser::from(&user))
    }

    /// Replace the avatar and delete the previous one from storage.
    pub async fn update_avatar(&self, user_id: &str, avatar: AssetRef) -> AppResult<PublicUser> {
        let users = self.db.users();
        let previous = users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        users.update_avatar(user_id, &avatar).await?;
        if previous.avatar != avatar {
            destroy_quietly(self.storage.as_ref(), &[&previous.avatar]).await;
        }

        let user = users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        Ok(PublicUser::from(&user))
    }

    /// Replace the cover image and delete the previous one, if any.
    pub async fn update_cover_image(&self, user_id: &str, cover_image: AssetRef) -> AppResult<PublicUser> {
        let users = self.db.users();
        let previous = users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        users.update_cover_image(user_id, &cover_image).await?;
        if let Some(old) = previous.cover_image.as_ref().filter(|old| **old != cover_image) {
            destroy_quietly(self.storage.as_ref(), &[old]).await;
        }

        let user = users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        Ok(PublicUser::from(&user))
    }

    pub async fn channel_profile(&self, username: &str, viewer: Option<&str>) -> AppResult<Document> {
        if username.trim().is_empty() {
            return Err(ApiError::validation("Username is missing"));
        }
        self.db
            .aggregate(Collection::Users, &graph::channel_profile(username, viewer))
            .await?
            .into_first()
            .ok_or_else(|| ApiError::not_found("Channel does not exist"))
    }

    /// Watched videos in watch order
    pub async fn watch_history(&self, user_id: &str) -> AppResult<Vec<Value>> {
        let user = self
            .db
            .aggregate(Collection::Users, &graph::watch_history(user_id))
            .await?
            .into_first()
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        match user.get("watchHistory") {
            Some(Value::Array(videos)) => Ok(videos.clone()),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn liked_videos(&self, user_id: &str) -> AppResult<Vec<Document>> {
        let out = self
            .db
            .aggregate(Collection::Likes, &graph::liked_videos(user_id))
            .await?;
        Ok(out.docs)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn channel_subscribers(
        &self,
        channel_id: &str,
        viewer: Option<&str>,
        paging: PageRequest,
    ) -> AppResult<SubscriberList> {
        let window = paging.window(&self.pagination)?;
        require_id("channel", channel_id)?;
        if self.db.users().get_by_id(channel_id).await?.is_none() {
            return Err(ApiError::not_found("Channel not found"));
        }

        let is_subscribed = match viewer {
            Some(viewer_id) => self.db.subscriptions().find(viewer_id, channel_id).await?.is_some(),
            None => false,
        };
        let out = self
            .db
            .aggregate(Collection::Subscriptions, &graph::channel_subscribers(channel_id, window))
            .await?;

        Ok(SubscriberList {
            total_subscribers: out.total,
            is_subscribed,
            page: Page::new(out.docs, out.total, window),
        })
    }

    pub async fn subscribed_channels(&self, subscriber_id: &str, paging: PageRequest) -> AppResult<SubscribedChannels> {
        let window = paging.window(&self.pagination)?;
        require_id("subscriber", subscriber_id)?;
        if self.db.users().get_by_id(subscriber_id).await?.is_none() {
            return Err(ApiError::not_found("Subscriber not found"));
        }

        let out = self
            .db
            .aggregate(Collection::Subscriptions, &graph::subscribed_channels(subscriber_id, window))
            .await?;
        Ok(SubscribedChannels {
            subscribed_channels_count: out.total,
            page: Page::new(out.docs, out.total, window),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::{CreateUser, LikeTarget};
    use crate::services::storage::InMemoryStorage;
    use crate::services::toggle::ToggleCoordinator;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            url: format!("https://cdn.example.com/{id}"),
            public_id: id.to_string(),
        }
    }

    async fn setup() -> (FeedService, Database, Arc<InMemoryStorage>) {
        let db = Database::connect_in_memory().await.unwrap();
        let storage = Arc::new(InMemoryStorage::default());
        let feed = FeedService::new(db.clone(), storage.clone(), PaginationConfig::default());
        (feed, db, storage)
    }

    async fn user(db: &Database, name: &str) -> String {
        db.users()
            .create(CreateUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                full_name: name.to_string(),
                password_hash: "x".to_string(),
                avatar: asset(&format!("{name}-avatar")),
                cover_image: None,
            })
            .await
            .unwrap()
            .id
    }

    fn publish(title: &str) -> PublishVideoInput {
        PublishVideoInput {
            title: title.to_string(),
            description: "description".to_string(),
            video_file: Some(asset(&format!("{title}-file"))),
            thumbnail: Some(asset(&format!("{title}-thumb"))),
            duration: Some(12.5),
            is_published: None,
        }
    }

    #[test]
    fn test_page_metadata() {
        let page = Page::new(vec![1, 2, 3, 4, 5], 25, Window::new(3, 10));
        assert_eq!(page.total_pages, 3);
        assert!(page.has_prev_page);
        assert!(!page.has_next_page);
        assert_eq!(page.prev_page, Some(2));
        assert_eq!(page.next_page, None);

        let empty: Page<u8> = Page::new(Vec::new(), 0, Window::new(1, 10));
        assert_eq!(empty.total_pages, 1);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn test_page_request_bounds() {
        let config = PaginationConfig::default();
        assert_eq!(PageRequest::default().window(&config).unwrap(), Window::new(1, 10));
        assert_matches!(PageRequest::new(Some(0), None).window(&config), Err(ApiError::Validation(_)));
        assert_matches!(PageRequest::new(None, Some(0)).window(&config), Err(ApiError::Validation(_)));
        assert_matches!(PageRequest::new(None, Some(101)).window(&config), Err(ApiError::Validation(_)));
    }

    #[test]
    fn test_require_text_counts_characters() {
        assert_eq!(require_text("Content", "  hi  ", 10).unwrap(), "hi");
        assert!(require_text("Content", " \n\t ", 10).is_err());
        assert!(require_text("Content", &"é".repeat(10), 10).is_ok());
        assert!(require_text("Content", &"é".repeat(11), 10).is_err());
    }

    #[tokio::test]
    async fn test_feed_third_page_of_25() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        for i in 0..25 {
            feed.publish_video(&alice, publish(&format!("video {i}"))).await.unwrap();
        }

        let page = feed
            .list_videos(VideoListQuery {
                paging: PageRequest::new(Some(3), Some(10)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.docs.len(), 5);
        assert_eq!(page.total_docs, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.docs[0]["owner"]["username"], json!("alice"));
    }

    #[tokio::test]
    async fn test_feed_rejects_unknown_sort_field() {
        let (feed, _, _) = setup().await;
        let result = feed
            .list_videos(VideoListQuery {
                sort_by: Some("passwordHash".to_string()),
                ..Default::default()
            })
            .await;
        assert_matches!(result, Err(ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ownership_gate() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let video = feed.publish_video(&alice, publish("mine")).await.unwrap();

        let update = UpdateVideoInput {
            title: Some("stolen".to_string()),
            ..Default::default()
        };
        assert_matches!(
            feed.update_video(&bob, &video.id, update.clone()).await,
            Err(ApiError::Permission(_))
        );
        assert_matches!(feed.toggle_publish(&bob, &video.id).await, Err(ApiError::Permission(_)));
        assert_matches!(feed.delete_video(&bob, &video.id).await, Err(ApiError::Permission(_)));

        assert_eq!(feed.update_video(&alice, &video.id, update).await.unwrap().title, "stolen");
        assert!(!feed.toggle_publish(&alice, &video.id).await.unwrap());
        feed.delete_video(&alice, &video.id).await.unwrap();
        assert_matches!(feed.delete_video(&alice, &video.id).await, Err(ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_video_cascades_and_destroys_assets() {
        let (feed, db, storage) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let video = feed.publish_video(&alice, publish("doomed")).await.unwrap();
        let comment = feed.add_comment(&bob, &video.id, "first").await.unwrap();
        db.likes().insert(LikeTarget::Comment, &comment.id, &alice).await.unwrap();
        db.likes().insert(LikeTarget::Video, &video.id, &bob).await.unwrap();

        feed.delete_video(&alice, &video.id).await.unwrap();

        assert!(db.comments().get_by_id(&comment.id).await.unwrap().is_none());
        assert!(db.likes().find(LikeTarget::Comment, &comment.id, &alice).await.unwrap().is_none());
        assert!(db.likes().find(LikeTarget::Video, &video.id, &bob).await.unwrap().is_none());
        assert_eq!(
            storage.destroyed(),
            vec!["doomed-file".to_string(), "doomed-thumb".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_racing_likes_and_comments_leaves_no_orphans() {
        let (feed, db, _) = setup().await;
        let toggles = ToggleCoordinator::new(db.clone());
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;

        for i in 0..50 {
            let video = feed.publish_video(&alice, publish(&format!("race {i}"))).await.unwrap();
            let comment = feed.add_comment(&alice, &video.id, "pinned").await.unwrap();

            let deleting = {
                let (feed, alice, id) = (feed.clone(), alice.clone(), video.id.clone());
                tokio::spawn(async move { feed.delete_video(&alice, &id).await })
            };
            let liking = {
                let (toggles, bob, id) = (toggles.clone(), bob.clone(), video.id.clone());
                tokio::spawn(async move { toggles.toggle_like(&bob, LikeTarget::Video, &id).await })
            };
            let liking_comment = {
                let (toggles, bob, id) = (toggles.clone(), bob.clone(), comment.id.clone());
                tokio::spawn(async move { toggles.toggle_like(&bob, LikeTarget::Comment, &id).await })
            };
            let commenting = {
                let (feed, bob, id) = (feed.clone(), bob.clone(), video.id.clone());
                tokio::spawn(async move { feed.add_comment(&bob, &id, "late").await })
            };

            deleting.await.unwrap().unwrap();
            // Each write either lands before the delete or sees the video gone.
            assert_matches!(liking.await.unwrap(), Ok(true) | Err(ApiError::NotFound(_)));
            assert_matches!(liking_comment.await.unwrap(), Ok(true) | Err(ApiError::NotFound(_)));
            assert_matches!(commenting.await.unwrap(), Ok(_) | Err(ApiError::NotFound(_)));
        }

        let orphans: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM likes WHERE video_id IS NOT NULL AND video_id NOT IN (SELECT id FROM videos)) \
                  + (SELECT COUNT(*) FROM likes WHERE comment_id IS NOT NULL AND comment_id NOT IN (SELECT id FROM comments)) \
                  + (SELECT COUNT(*) FROM comments WHERE video_id NOT IN (SELECT id FROM videos))",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_detail_counts_view_and_history_once() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let video = feed.publish_video(&alice, publish("clip")).await.unwrap();

        feed.video_detail(&video.id, Some(&bob)).await.unwrap();
        let doc = feed.video_detail(&video.id, Some(&bob)).await.unwrap();
        assert_eq!(doc["views"], json!(2));

        let history = db.users().get_by_id(&bob).await.unwrap().unwrap().watch_history;
        assert_eq!(history, vec![video.id.clone()]);
        assert_eq!(feed.watch_history(&bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unpublished_video_is_visible_to_owner_only() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let draft = feed
            .publish_video(
                &alice,
                PublishVideoInput {
                    is_published: Some(false),
                    ..publish("draft")
                },
            )
            .await
            .unwrap();

        assert_matches!(feed.video_detail(&draft.id, Some(&bob)).await, Err(ApiError::NotFound(_)));
        assert_matches!(feed.video_detail(&draft.id, None).await, Err(ApiError::NotFound(_)));
        assert!(feed.video_detail(&draft.id, Some(&alice)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_thumbnail_destroys_previous() {
        let (feed, db, storage) = setup().await;
        let alice = user(&db, "alice").await;
        let video = feed.publish_video(&alice, publish("clip")).await.unwrap();

        feed.update_video(
            &alice,
            &video.id,
            UpdateVideoInput {
                thumbnail: Some(asset("new-thumb")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(storage.destroyed(), vec!["clip-thumb".to_string()]);

        let updated = feed.update_avatar(&alice, asset("new-avatar")).await.unwrap();
        assert_eq!(updated.avatar.public_id, "new-avatar");
        assert_eq!(storage.destroyed().last().unwrap(), "alice-avatar");
    }

    #[tokio::test]
    async fn test_comment_rules() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let video = feed.publish_video(&alice, publish("clip")).await.unwrap();

        assert_matches!(feed.add_comment(&bob, &video.id, "   ").await, Err(ApiError::Validation(_)));
        let comment = feed.add_comment(&bob, &video.id, " hello ").await.unwrap();
        assert_eq!(comment.content, "hello");

        assert_matches!(
            feed.update_comment(&alice, &comment.id, "edited").await,
            Err(ApiError::Permission(_))
        );
        assert_eq!(feed.update_comment(&bob, &comment.id, "edited").await.unwrap().content, "edited");

        let page = feed
            .list_comments(&video.id, Some(&alice), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_docs, 1);
        assert_eq!(page.docs[0]["isLiked"], json!(false));

        feed.delete_comment(&bob, &comment.id).await.unwrap();
        assert!(db.comments().get_by_id(&comment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_listings() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        db.subscriptions().insert(&bob, &alice).await.unwrap();

        let subscribers = feed
            .channel_subscribers(&alice, Some(&bob), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(subscribers.total_subscribers, 1);
        assert!(subscribers.is_subscribed);
        assert_eq!(subscribers.page.docs[0]["subscriber"]["username"], json!("bob"));

        let anon = feed
            .channel_subscribers(&alice, None, PageRequest::default())
            .await
            .unwrap();
        assert!(!anon.is_subscribed);

        let channels = feed.subscribed_channels(&bob, PageRequest::default()).await.unwrap();
        assert_eq!(channels.subscribed_channels_count, 1);
        assert_eq!(channels.page.docs[0]["channel"]["username"], json!("alice"));
    }

    #[tokio::test]
    async fn test_update_account_email_conflict() {
        let (feed, db, _) = setup().await;
        let alice = user(&db, "alice").await;
        user(&db, "bob").await;

        assert_matches!(
            feed.update_account(&alice, "Alice", "bob@example.com").await,
            Err(ApiError::Conflict(_))
        );
        let updated = feed.update_account(&alice, "Alice A", "alice@new.example.com").await.unwrap();
        assert_eq!(updated.full_name, "Alice A");
    }
}
