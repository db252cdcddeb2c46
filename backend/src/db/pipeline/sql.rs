//! SQL source query for the pushed-down prefix of a pipeline.
//!
//! Builds parameterized `SELECT` / `COUNT(*)` statements from predicates,
//! sort keys and a window, and decodes rows into [`Document`]s.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{Collection, ColumnKind, Document, Predicate, SortDirection, SortKey, Window};

/// Represents a SQL value that can be bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Bind this value to a sqlx query builder
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SqlValue::String(s.clone()),
            other => SqlValue::String(other.to_string()),
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Translate a predicate into a WHERE fragment. Returns `None` when it reads
/// a field that is not a stored, comparable column of `collection`.
pub(super) fn predicate_to_sql(
    collection: Collection,
    predicate: &Predicate,
) -> Option<(String, Vec<SqlValue>)> {
    match predicate {
        Predicate::Eq(name, value) => {
            let def = collection.field(name).filter(|d| d.kind != ColumnKind::Json)?;
            if value.is_null() {
                Some((format!("{} IS NULL", def.column), Vec::new()))
            } else {
                Some((format!("{} = ?", def.column), vec![SqlValue::from_json(value)]))
            }
        }
        Predicate::In(name, values) => {
            let def = collection.field(name).filter(|d| d.kind != ColumnKind::Json)?;
            if values.is_empty() {
                return Some(("0".to_string(), Vec::new()));
            }
            let marks = vec!["?"; values.len()].join(", ");
            Some((
                format!("{} IN ({})", def.column, marks),
                values.iter().map(SqlValue::from_json).collect(),
            ))
        }
        Predicate::NotNull(name) => {
            let def = collection.field(name)?;
            Some((format!("{} IS NOT NULL", def.column), Vec::new()))
        }
        Predicate::Search { fields, term } => {
            let mut parts = Vec::with_capacity(fields.len());
            let mut binds = Vec::with_capacity(fields.len());
            let pattern = escape_like(term);
            for name in fields {
                let def = collection.field(name).filter(|d| d.kind == ColumnKind::Text)?;
                parts.push(format!("{} LIKE ? ESCAPE '\\'", def.column));
                binds.push(SqlValue::String(pattern.clone()));
            }
            if parts.is_empty() {
                return Some(("0".to_string(), Vec::new()));
            }
            Some((format!("({})", parts.join(" OR ")), binds))
        }
        Predicate::And(preds) => join_predicates(collection, preds, " AND ", "1"),
        Predicate::Or(preds) => join_predicates(collection, preds, " OR ", "0"),
    }
}

/// Combine predicates with `op`; an empty list yields `empty`, the identity
/// of that operator.
fn join_predicates(
    collection: Collection,
    preds: &[Predicate],
    op: &str,
    empty: &str,
) -> Option<(String, Vec<SqlValue>)> {
    let mut parts = Vec::with_capacity(preds.len());
    let mut binds = Vec::new();
    for p in preds {
        let (sql, values) = predicate_to_sql(collection, p)?;
        parts.push(sql);
        binds.extend(values);
    }
    if parts.is_empty() {
        return Some((empty.to_string(), Vec::new()));
    }
    Some((format!("({})", parts.join(op)), binds))
}

/// True when every key names a stored, orderable column.
pub(super) fn sort_is_pushable(collection: Collection, keys: &[SortKey]) -> bool {
    keys.iter().all(|k| {
        collection
            .field(&k.field)
            .is_some_and(|d| d.kind != ColumnKind::Json)
    })
}

/// The SQL half of a pipeline: filters, ordering and window on one table.
#[derive(Debug, Clone)]
pub(super) struct SourceQuery {
    collection: Collection,
    where_clauses: Vec<String>,
    values: Vec<SqlValue>,
    order_clauses: Vec<String>,
    window: Option<Window>,
}

impl SourceQuery {
    pub(super) fn new(collection: Collection) -> Self {
        Self {
            collection,
            where_clauses: Vec::new(),
            values: Vec::new(),
            order_clauses: Vec::new(),
            window: None,
        }
    }

    pub(super) fn where_clause(&mut self, sql: String, values: Vec<SqlValue>) {
        self.where_clauses.push(sql);
        self.values.extend(values);
    }

    /// Later sort stages take precedence over earlier ones, as they would if
    /// applied one after another with a stable sort.
    pub(super) fn order_by(&mut self, keys: &[SortKey]) {
        let mut clauses: Vec<String> = Vec::new();
        for key in keys {
            if let Some(def) = self.collection.field(&key.field) {
                clauses.push(format!("{} {}", def.column, key.direction.as_sql()));
            }
        }
        clauses.append(&mut self.order_clauses);
        self.order_clauses = clauses;
    }

    pub(super) fn window(&mut self, window: Window) {
        self.window = Some(window);
    }

    pub(super) fn is_windowed(&self) -> bool {
        self.window.is_some()
    }

    fn select_sql(&self) -> String {
        let columns: Vec<&str> = self.collection.fields().iter().map(|f| f.column).collect();
        format!("SELECT {} FROM {}", columns.join(", "), self.collection.table())
    }

    fn where_sql(&self) -> String {
        if self.where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_clauses.join(" AND "))
        }
    }

    pub(super) fn build_sql(&self) -> String {
        let mut sql = self.select_sql();
        sql.push_str(&self.where_sql());

        // Ties fall back to creation order via the time-ordered id.
        let tie_break = match self.order_clauses.first() {
            Some(first) if first.ends_with(SortDirection::Asc.as_sql()) => "id ASC",
            _ => "id DESC",
        };
        if self.order_clauses.is_empty() {
            if self.window.is_some() {
                sql.push_str(" ORDER BY rowid ASC");
            }
        } else {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_clauses.join(", "));
            sql.push_str(", ");
            sql.push_str(tie_break);
        }

        if let Some(window) = self.window {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", window.limit, window.offset()));
        }
        sql
    }

    pub(super) fn build_count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}{}", self.collection.table(), self.where_sql())
    }

    pub(super) async fn fetch_all(&self, pool: &SqlitePool) -> Result<Vec<Document>, sqlx::Error> {
        let sql = self.build_sql();
        tracing::debug!(sql = %sql, "Executing pipeline source query");

        let mut query = sqlx::query(&sql);
        for value in &self.values {
            query = value.bind_to_query(query);
        }
        let rows = query.fetch_all(pool).await?;
        rows.iter().map(|r| decode_row(self.collection, r)).collect()
    }

    pub(super) async fn count(&self, pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let sql = self.build_count_sql();
        tracing::debug!(sql = %sql, "Executing pipeline count query");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &self.values {
            query = match value {
                SqlValue::String(s) => query.bind(s.as_str()),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
                SqlValue::Null => query.bind(None::<String>),
            };
        }
        let total = query.fetch_one(pool).await?;
        Ok(total.max(0) as u64)
    }
}

fn decode_row(collection: Collection, row: &SqliteRow) -> Result<Document, sqlx::Error> {
    let mut doc = Document::new();
    for (i, def) in collection.fields().iter().enumerate() {
        let value = match def.kind {
            ColumnKind::Text => row.try_get::<Option<String>, _>(i)?.map(Value::String),
            ColumnKind::Integer => row.try_get::<Option<i64>, _>(i)?.map(Value::from),
            ColumnKind::Real => row.try_get::<Option<f64>, _>(i)?.map(Value::from),
            ColumnKind::Bool => row.try_get::<Option<i64>, _>(i)?.map(|v| Value::Bool(v != 0)),
            ColumnKind::Json => row
                .try_get::<Option<String>, _>(i)?
                .and_then(|s| serde_json::from_str(&s).ok()),
        };
        doc.insert(def.name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(doc)
}
