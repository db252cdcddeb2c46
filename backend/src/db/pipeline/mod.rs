//! Typed aggregation pipelines over the document collections.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s evaluated against one
//! [`Collection`]. Stages are a closed set (filter, join, project, compute,
//! sort, paginate) so every plan is checked at compile time; the executor
//! decides which leading stages can be pushed into SQL and evaluates the
//! rest over JSON documents.
//!
//! ```rust,ignore
//! let plan = Pipeline::new()
//!     .filter(Predicate::eq("isPublished", true))
//!     .sort(SortKey::desc("createdAt"))
//!     .join(Join::new(Collection::Users, "owner", "id", "owner")
//!         .pipeline(Pipeline::new().project(["id", "username", "avatar"])))
//!     .compute([("owner", Expr::first("owner"))])
//!     .paginate(Window::new(1, 10));
//! let out = db.aggregate(Collection::Videos, &plan).await?;
//! ```

mod executor;
mod expr;
mod sql;

pub use executor::{Aggregation, execute};

use serde_json::Value;

/// A document as returned by the executor: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

// ============================================================================
// Collections
// ============================================================================

/// Storage representation of a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    /// INTEGER 0/1 surfaced as a JSON boolean
    Bool,
    /// JSON TEXT surfaced as a parsed JSON value
    Json,
}

/// Mapping from a document field to its column.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: ColumnKind,
}

const fn field(name: &'static str, column: &'static str, kind: ColumnKind) -> FieldDef {
    FieldDef { name, column, kind }
}

use ColumnKind::{Bool, Integer, Json, Real, Text};

// Credential columns (password_hash, refresh_token) are deliberately absent:
// pipelines can never surface them.
const USER_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("username", "username", Text),
    field("email", "email", Text),
    field("fullName", "full_name", Text),
    field("avatar", "avatar", Json),
    field("coverImage", "cover_image", Json),
    field("watchHistory", "watch_history", Json),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

const VIDEO_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("owner", "owner_id", Text),
    field("videoFile", "video_file", Json),
    field("thumbnail", "thumbnail", Json),
    field("title", "title", Text),
    field("description", "description", Text),
    field("duration", "duration", Real),
    field("views", "views", Integer),
    field("isPublished", "is_published", Bool),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

const COMMENT_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("video", "video_id", Text),
    field("owner", "owner_id", Text),
    field("content", "content", Text),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

const LIKE_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("video", "video_id", Text),
    field("comment", "comment_id", Text),
    field("tweet", "tweet_id", Text),
    field("likedBy", "liked_by", Text),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

const SUBSCRIPTION_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("subscriber", "subscriber_id", Text),
    field("channel", "channel_id", Text),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

const TWEET_FIELDS: &[FieldDef] = &[
    field("id", "id", Text),
    field("owner", "owner_id", Text),
    field("content", "content", Text),
    field("createdAt", "created_at", Text),
    field("updatedAt", "updated_at", Text),
];

/// The persisted collections a pipeline can start from or join to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Videos,
    Comments,
    Likes,
    Subscriptions,
    Tweets,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Videos => "videos",
            Collection::Comments => "comments",
            Collection::Likes => "likes",
            Collection::Subscriptions => "subscriptions",
            Collection::Tweets => "tweets",
        }
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            Collection::Users => USER_FIELDS,
            Collection::Videos => VIDEO_FIELDS,
            Collection::Comments => COMMENT_FIELDS,
            Collection::Likes => LIKE_FIELDS,
            Collection::Subscriptions => SUBSCRIPTION_FIELDS,
            Collection::Tweets => TWEET_FIELDS,
        }
    }

    /// Look up the stored definition of a document field.
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Predicates and expressions
// ============================================================================

/// Row filter. Evaluated in SQL when it only touches stored fields, in
/// memory otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Substring match over any of the listed fields. Case folding covers
    /// ASCII letters only, so `ÉCOLE` does not match `école`; SQLite's `LIKE`
    /// folds the same way and both evaluation paths agree.
    Search { fields: Vec<String>, term: String },
    /// Field is present and not null.
    NotNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn search<S: Into<String>>(fields: impl IntoIterator<Item = S>, term: impl Into<String>) -> Self {
        Predicate::Search {
            fields: fields.into_iter().map(Into::into).collect(),
            term: term.into(),
        }
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Predicate::NotNull(field.into())
    }

    /// Every field name this predicate reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Predicate::Eq(f, _) | Predicate::In(f, _) | Predicate::NotNull(f) => vec![f.as_str()],
            Predicate::Search { fields, .. } => fields.iter().map(String::as_str).collect(),
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().flat_map(|p| p.fields()).collect(),
        }
    }
}

/// Computed field expression, evaluated per document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Length of an array field (0 when absent).
    Size(String),
    /// First element of an array field, or null.
    First(String),
    /// Last element of an array field, or null.
    Last(String),
    /// True iff some element of `array` has `key == value`. A `None` value
    /// never matches, so viewer-relative flags are false for anonymous callers.
    AnyEq {
        array: String,
        key: String,
        value: Option<Value>,
    },
}

impl Expr {
    pub fn size(path: impl Into<String>) -> Self {
        Expr::Size(path.into())
    }

    pub fn first(path: impl Into<String>) -> Self {
        Expr::First(path.into())
    }

    pub fn last(path: impl Into<String>) -> Self {
        Expr::Last(path.into())
    }

    pub fn any_eq(array: impl Into<String>, key: impl Into<String>, value: Option<&str>) -> Self {
        Expr::AnyEq {
            array: array.into(),
            key: key.into(),
            value: value.map(|v| Value::String(v.to_string())),
        }
    }
}

// ============================================================================
// Sorting and pagination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Offset window over a result set; `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub page: u32,
    pub limit: u32,
}

impl Window {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page: page.max(1), limit }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Lookup of documents in another collection whose `foreign_field` equals the
/// local document's `local_field` (or any element of it, when it is an array).
/// Matches are stored as an array under `as_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub from: Collection,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
    pub pipeline: Pipeline,
}

impl Join {
    pub fn new(
        from: Collection,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
            pipeline: Pipeline::new(),
        }
    }

    /// Sub-pipeline applied to the joined side before grouping.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Filter(Predicate),
    Join(Box<Join>),
    /// Keep only the listed top-level fields.
    Project(Vec<String>),
    /// Add or overwrite fields; all expressions see the input document.
    Compute(Vec<(String, Expr)>),
    Sort(Vec<SortKey>),
    Paginate(Window),
}

/// Ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn filter(self, predicate: Predicate) -> Self {
        self.push(Stage::Filter(predicate))
    }

    pub fn join(self, join: Join) -> Self {
        self.push(Stage::Join(Box::new(join)))
    }

    pub fn project<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push(Stage::Project(fields.into_iter().map(Into::into).collect()))
    }

    pub fn compute<S: Into<String>>(self, fields: impl IntoIterator<Item = (S, Expr)>) -> Self {
        self.push(Stage::Compute(
            fields.into_iter().map(|(name, expr)| (name.into(), expr)).collect(),
        ))
    }

    pub fn sort(self, key: SortKey) -> Self {
        self.push(Stage::Sort(vec![key]))
    }

    pub fn paginate(self, window: Window) -> Self {
        self.push(Stage::Paginate(window))
    }

    /// True if any stage, at any nesting depth, windows its input.
    pub(crate) fn has_pagination(&self) -> bool {
        self.stages.iter().any(|s| match s {
            Stage::Paginate(_) => true,
            Stage::Join(j) => j.pipeline.has_pagination(),
            _ => false,
        })
    }
}
