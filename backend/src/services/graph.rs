//! Graph query builders
//!
//! Each function returns the [`Pipeline`] for one view over the social graph.
//! Viewer-relative flags take `viewer: Option<&str>`; an anonymous viewer
//! yields `false` for every flag.

use crate::db::pipeline::{Expr, Join, Predicate, SortKey, Window};
use crate::db::{Collection, Pipeline};
use crate::error::{ApiError, AppResult};

/// Video fields a feed can be sorted by
pub const SORTABLE_VIDEO_FIELDS: &[&str] = &["createdAt", "views", "duration", "title"];

/// Fields of an identity any caller may see
const PUBLIC_PROFILE: &[&str] = &["id", "username", "fullName", "avatar"];

/// Resolve `sortBy`/`sortType` query values into a sort key.
///
/// Defaults to newest first. Unknown fields or directions are rejected.
pub fn parse_sort(sort_by: Option<&str>, sort_type: Option<&str>) -> AppResult<SortKey> {
    let field = match sort_by.map(str::trim).filter(|s| !s.is_empty()) {
        None => "createdAt",
        Some(f) if SORTABLE_VIDEO_FIELDS.contains(&f) => f,
        Some(f) => {
            return Err(ApiError::validation(format!(
                "Cannot sort by '{}'; expected one of {}",
                f,
                SORTABLE_VIDEO_FIELDS.join(", ")
            )));
        }
    };

    match sort_type.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("desc") => Ok(SortKey::desc(field)),
        Some("asc") => Ok(SortKey::asc(field)),
        Some(other) => Err(ApiError::validation(format!(
            "Invalid sort direction '{}'; expected asc or desc",
            other
        ))),
    }
}

/// Join an identity field to the public profile of that identity, flattened
/// to a single object (or null).
fn with_owner(pipeline: Pipeline, local_field: &str) -> Pipeline {
    pipeline
        .join(
            Join::new(Collection::Users, local_field, "id", local_field)
                .pipeline(Pipeline::new().project(PUBLIC_PROFILE.iter().copied())),
        )
        .compute([(local_field, Expr::first(local_field))])
}

/// Videos `viewer` may see: published ones and the viewer's own drafts.
fn visible_to(viewer: &str) -> Predicate {
    Predicate::Or(vec![Predicate::eq("isPublished", true), Predicate::eq("owner", viewer)])
}

/// Filters for the public video feed
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub search: Option<String>,
    pub owner_id: Option<String>,
    pub sort: SortKey,
    pub window: Window,
}

/// Published videos, optionally searched and restricted to one owner, each
/// with its owner's public profile.
pub fn video_feed(query: &FeedQuery) -> Pipeline {
    let mut predicates = vec![Predicate::eq("isPublished", true)];
    if let Some(owner) = &query.owner_id {
        predicates.push(Predicate::eq("owner", owner.as_str()));
    }
    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        predicates.push(Predicate::search(["title", "description"], term));
    }

    let plan = Pipeline::new()
        .filter(Predicate::And(predicates))
        .sort(query.sort.clone());
    with_owner(plan, "owner").paginate(query.window)
}

/// One video with like count, comments, and owner channel stats.
pub fn video_detail(video_id: &str, viewer: Option<&str>) -> Pipeline {
    let comments = with_owner(
        Pipeline::new()
            .sort(SortKey::desc("createdAt"))
            .join(Join::new(Collection::Likes, "id", "comment", "likes")),
        "owner",
    )
    .compute([
        ("likesCount", Expr::size("likes")),
        ("isLiked", Expr::any_eq("likes", "likedBy", viewer)),
    ])
    .project(["id", "content", "owner", "likesCount", "isLiked", "createdAt", "updatedAt"]);

    let owner = Pipeline::new()
        .join(Join::new(Collection::Subscriptions, "id", "channel", "subscribers"))
        .compute([
            ("subscribersCount", Expr::size("subscribers")),
            ("isSubscribed", Expr::any_eq("subscribers", "subscriber", viewer)),
        ])
        .project(["id", "username", "fullName", "avatar", "subscribersCount", "isSubscribed"]);

    Pipeline::new()
        .filter(Predicate::eq("id", video_id))
        .join(Join::new(Collection::Likes, "id", "video", "likes"))
        .join(Join::new(Collection::Comments, "id", "video", "comments").pipeline(comments))
        .join(Join::new(Collection::Users, "owner", "id", "owner").pipeline(owner))
        .compute([
            ("likesCount", Expr::size("likes")),
            ("isLiked", Expr::any_eq("likes", "likedBy", viewer)),
            ("owner", Expr::first("owner")),
        ])
        .project([
            "id",
            "videoFile",
            "thumbnail",
            "title",
            "description",
            "duration",
            "views",
            "isPublished",
            "createdAt",
            "updatedAt",
            "owner",
            "likesCount",
            "isLiked",
            "comments",
        ])
}

/// Channel page for `username` with subscription counts.
pub fn channel_profile(username: &str, viewer: Option<&str>) -> Pipeline {
    Pipeline::new()
        .filter(Predicate::eq("username", username.trim().to_lowercase()))
        .join(Join::new(Collection::Subscriptions, "id", "channel", "subscribers"))
        .join(Join::new(Collection::Subscriptions, "id", "subscriber", "subscribedTo"))
        .compute([
            ("subscribersCount", Expr::size("subscribers")),
            ("channelsSubscribedToCount", Expr::size("subscribedTo")),
            ("isSubscribed", Expr::any_eq("subscribers", "subscriber", viewer)),
        ])
        .project([
            "id",
            "username",
            "fullName",
            "email",
            "avatar",
            "coverImage",
            "subscribersCount",
            "channelsSubscribedToCount",
            "isSubscribed",
        ])
}

/// Subscriptions to `channel_id`, newest first, with each subscriber's profile.
pub fn channel_subscribers(channel_id: &str, window: Window) -> Pipeline {
    let plan = Pipeline::new()
        .filter(Predicate::eq("channel", channel_id))
        .sort(SortKey::desc("createdAt"));
    with_owner(plan, "subscriber")
        .project(["id", "subscriber", "createdAt"])
        .paginate(window)
}

/// Channels `subscriber_id` follows, newest subscription first, each with the
/// channel's most recently published video (or null).
pub fn subscribed_channels(subscriber_id: &str, window: Window) -> Pipeline {
    let videos = Pipeline::new()
        .filter(Predicate::eq("isPublished", true))
        .sort(SortKey::asc("createdAt"))
        .project(["id", "title", "thumbnail", "duration", "views", "createdAt"]);

    let channel = Pipeline::new()
        .join(Join::new(Collection::Videos, "id", "owner", "videos").pipeline(videos))
        .compute([("latestVideo", Expr::last("videos"))])
        .project(["id", "username", "fullName", "avatar", "latestVideo"]);

    Pipeline::new()
        .filter(Predicate::eq("subscriber", subscriber_id))
        .sort(SortKey::desc("createdAt"))
        .join(Join::new(Collection::Users, "channel", "id", "channel").pipeline(channel))
        .compute([("channel", Expr::first("channel"))])
        .project(["id", "channel", "createdAt"])
        .paginate(window)
}

/// Comments on `video_id`, newest first, with like counts and owner profile.
pub fn video_comments(video_id: &str, viewer: Option<&str>, window: Window) -> Pipeline {
    let plan = Pipeline::new()
        .filter(Predicate::eq("video", video_id))
        .sort(SortKey::desc("createdAt"))
        .join(Join::new(Collection::Likes, "id", "comment", "likes"));
    with_owner(plan, "owner")
        .compute([
            ("likesCount", Expr::size("likes")),
            ("isLiked", Expr::any_eq("likes", "likedBy", viewer)),
        ])
        .project(["id", "content", "video", "owner", "likesCount", "isLiked", "createdAt", "updatedAt"])
        .paginate(window)
}

/// The user's watched videos in watch order, skipping videos that have since
/// become drafts of another channel.
pub fn watch_history(user_id: &str) -> Pipeline {
    let videos = with_owner(Pipeline::new().filter(visible_to(user_id)), "owner");
    Pipeline::new()
        .filter(Predicate::eq("id", user_id))
        .join(Join::new(Collection::Videos, "watchHistory", "id", "watchHistory").pipeline(videos))
        .project(["watchHistory"])
}

/// Videos the user liked, newest like first. Likes whose video no longer
/// exists, or is now another channel's draft, are dropped.
pub fn liked_videos(user_id: &str) -> Pipeline {
    let videos = with_owner(Pipeline::new().filter(visible_to(user_id)), "owner");
    Pipeline::new()
        .filter(Predicate::And(vec![
            Predicate::eq("likedBy", user_id),
            Predicate::not_null("video"),
        ]))
        .sort(SortKey::desc("createdAt"))
        .join(Join::new(Collection::Videos, "video", "id", "video").pipeline(videos))
        .compute([("video", Expr::first("video"))])
        .filter(Predicate::not_null("video"))
        .project(["id", "video", "createdAt"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pipeline::{SortDirection, Stage};
    use crate::db::sqlite_helpers::new_id;
    use crate::db::{AssetRef, CreateUser, CreateVideo, Database, LikeTarget};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            url: format!("https://cdn.example.com/{id}"),
            public_id: id.to_string(),
        }
    }

    async fn user(db: &Database, name: &str) -> String {
        db.users()
            .create(CreateUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                full_name: format!("{name} full"),
                password_hash: "x".to_string(),
                avatar: asset(name),
                cover_image: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn video(db: &Database, owner: &str, title: &str, published: bool) -> String {
        db.videos()
            .create(CreateVideo {
                owner_id: owner.to_string(),
                video_file: asset(title),
                thumbnail: asset(title),
                title: title.to_string(),
                description: format!("about {title}"),
                duration: 60.0,
                is_published: published,
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort(None, None).unwrap(), SortKey::desc("createdAt"));
        assert_eq!(parse_sort(Some("views"), Some("ASC")).unwrap(), SortKey::asc("views"));
        assert_eq!(parse_sort(None, Some("asc")).unwrap().direction, SortDirection::Asc);
        assert_matches!(parse_sort(Some("password"), None), Err(ApiError::Validation(_)));
        assert_matches!(parse_sort(Some("title"), Some("up")), Err(ApiError::Validation(_)));
    }

    #[test]
    fn test_feed_filters_before_joining() {
        let plan = video_feed(&FeedQuery {
            search: Some("  ".to_string()),
            owner_id: None,
            sort: SortKey::desc("createdAt"),
            window: Window::new(1, 10),
        });
        assert_matches!(&plan.stages()[0], Stage::Filter(Predicate::And(p)) if p.len() == 1);
        assert_matches!(plan.stages().last(), Some(Stage::Paginate(_)));
    }

    #[tokio::test]
    async fn test_feed_search_and_owner_projection() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        video(&db, &alice, "Rust intro", true).await;
        video(&db, &alice, "Cooking", true).await;
        video(&db, &alice, "Rust draft", false).await;

        let plan = video_feed(&FeedQuery {
            search: Some("rust".to_string()),
            owner_id: None,
            sort: SortKey::desc("createdAt"),
            window: Window::new(1, 10),
        });
        let out = db.aggregate(Collection::Videos, &plan).await.unwrap();
        assert_eq!(out.total, 1);
        assert_eq!(out.docs[0]["title"], json!("Rust intro"));
        assert_eq!(
            out.docs[0]["owner"],
            json!({
                "id": alice,
                "username": "alice",
                "fullName": "alice full",
                "avatar": { "url": "https://cdn.example.com/alice", "publicId": "alice" },
            })
        );
    }

    #[tokio::test]
    async fn test_video_detail_counts_and_flags() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let v = video(&db, &alice, "clip", true).await;

        db.likes().insert(LikeTarget::Video, &v, &bob).await.unwrap();
        db.subscriptions().insert(&bob, &alice).await.unwrap();
        let c = db.comments().create(&v, &bob, "nice").await.unwrap().unwrap();
        db.likes().insert(LikeTarget::Comment, &c.id, &alice).await.unwrap();

        let doc = db
            .aggregate(Collection::Videos, &video_detail(&v, Some(&bob)))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(doc["likesCount"], json!(1));
        assert_eq!(doc["isLiked"], json!(true));
        assert_eq!(doc["owner"]["subscribersCount"], json!(1));
        assert_eq!(doc["owner"]["isSubscribed"], json!(true));
        assert_eq!(doc["comments"][0]["likesCount"], json!(1));
        assert_eq!(doc["comments"][0]["isLiked"], json!(false));
        assert_eq!(doc["comments"][0]["owner"]["username"], json!("bob"));

        let anon = db
            .aggregate(Collection::Videos, &video_detail(&v, None))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(anon["isLiked"], json!(false));
        assert_eq!(anon["owner"]["isSubscribed"], json!(false));
    }

    #[tokio::test]
    async fn test_channel_profile_for_anonymous_viewer() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        db.subscriptions().insert(&bob, &alice).await.unwrap();

        let profile = db
            .aggregate(Collection::Users, &channel_profile("Alice", None))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(profile["subscribersCount"], json!(1));
        assert_eq!(profile["channelsSubscribedToCount"], json!(0));
        assert_eq!(profile["isSubscribed"], json!(false));
        assert!(profile.get("watchHistory").is_none());

        let as_bob = db
            .aggregate(Collection::Users, &channel_profile("alice", Some(&bob)))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(as_bob["isSubscribed"], json!(true));
    }

    #[tokio::test]
    async fn test_subscribed_channels_latest_video() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let carol = user(&db, "carol").await;
        video(&db, &alice, "first", true).await;
        video(&db, &alice, "second", true).await;
        video(&db, &alice, "hidden", false).await;
        db.subscriptions().insert(&bob, &alice).await.unwrap();
        db.subscriptions().insert(&bob, &carol).await.unwrap();

        let out = db
            .aggregate(Collection::Subscriptions, &subscribed_channels(&bob, Window::new(1, 10)))
            .await
            .unwrap();
        assert_eq!(out.total, 2);
        assert_eq!(out.docs[0]["channel"]["username"], json!("carol"));
        assert_eq!(out.docs[0]["channel"]["latestVideo"], json!(null));
        assert_eq!(out.docs[1]["channel"]["latestVideo"]["title"], json!("second"));
    }

    #[tokio::test]
    async fn test_watch_history_and_liked_videos() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        let a = video(&db, &alice, "a", true).await;
        let b = video(&db, &alice, "b", true).await;
        db.users().append_watch_history(&alice, &b).await.unwrap();
        db.users().append_watch_history(&alice, &a).await.unwrap();
        db.users().append_watch_history(&alice, &new_id()).await.unwrap();
        db.likes().insert(LikeTarget::Video, &a, &alice).await.unwrap();
        let tweet = db.tweets().create(&alice, "hi").await.unwrap();
        db.likes().insert(LikeTarget::Tweet, &tweet.id, &alice).await.unwrap();

        let history = db
            .aggregate(Collection::Users, &watch_history(&alice))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        let titles: Vec<_> = history["watchHistory"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("b"), json!("a")]);
        assert_eq!(history["watchHistory"][0]["owner"]["username"], json!("alice"));

        let liked = db.aggregate(Collection::Likes, &liked_videos(&alice)).await.unwrap();
        assert_eq!(liked.docs.len(), 1);
        assert_eq!(liked.docs[0]["video"]["id"], json!(a));
    }

    #[tokio::test]
    async fn test_drafts_drop_out_of_other_users_lists() {
        let db = Database::connect_in_memory().await.unwrap();
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let v = video(&db, &alice, "t", true).await;
        for viewer in [&alice, &bob] {
            db.likes().insert(LikeTarget::Video, &v, viewer).await.unwrap();
            db.users().append_watch_history(viewer, &v).await.unwrap();
        }
        db.videos().toggle_published(&v).await.unwrap();

        let liked = db.aggregate(Collection::Likes, &liked_videos(&bob)).await.unwrap();
        assert!(liked.docs.is_empty());
        let history = db
            .aggregate(Collection::Users, &watch_history(&bob))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(history["watchHistory"], json!([]));

        // The owner still sees their own draft.
        let liked = db.aggregate(Collection::Likes, &liked_videos(&alice)).await.unwrap();
        assert_eq!(liked.docs[0]["video"]["title"], json!("t"));
        let history = db
            .aggregate(Collection::Users, &watch_history(&alice))
            .await
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(history["watchHistory"][0]["id"], json!(v));
    }
}
