//! Domain services

pub mod auth;
pub mod feed;
pub mod graph;
pub mod storage;
pub mod toggle;

pub use auth::{AuthService, AuthTokens, LoginResult, RegisterInput};
pub use feed::{FeedService, Page, PageRequest, PublishVideoInput, UpdateVideoInput, VideoListQuery};
pub use storage::{AssetStorage, InMemoryStorage, SharedStorage, StorageClient};
pub use toggle::ToggleCoordinator;
