//! Pipeline executor.
//!
//! Planning splits the stages into a SQL source query and an in-memory tail.
//! A filter, sort or window is pushed into SQL when it only reads stored
//! columns that no earlier join/compute/project has overwritten, and no
//! earlier stage had to run in memory. Joins, computes and projections are
//! per-document and order preserving, so they never block pushdown.
//!
//! Joins run their sub-pipeline once for all parents (seeded with an `IN`
//! filter on the foreign field) and group the results back by key, which
//! avoids one query per parent document.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::SqlitePool;

use super::expr::{compare_docs, evaluate, matches};
use super::sql::{SourceQuery, predicate_to_sql, sort_is_pushable};
use super::{Collection, Document, Join, Pipeline, Predicate, Stage};

/// Result of executing a pipeline.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Documents in pipeline order (already windowed if the pipeline paginates)
    pub docs: Vec<Document>,
    /// Number of documents before the first pagination window was applied
    pub total: u64,
}

impl Aggregation {
    pub fn into_first(self) -> Option<Document> {
        self.docs.into_iter().next()
    }
}

struct Entry {
    /// Join key the document was fetched under (null at top level)
    key: Value,
    doc: Document,
}

/// Execute `pipeline` against `collection`.
pub async fn execute(pool: &SqlitePool, collection: Collection, pipeline: &Pipeline) -> Result<Aggregation> {
    let (entries, total) = run(pool, collection, pipeline, None).await?;
    Ok(Aggregation {
        docs: entries.into_iter().map(|e| e.doc).collect(),
        total,
    })
}

fn key_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn run<'a>(
    pool: &'a SqlitePool,
    collection: Collection,
    pipeline: &'a Pipeline,
    key_field: Option<&'a str>,
) -> BoxFuture<'a, Result<(Vec<Entry>, u64)>> {
    async move {
        let mut source = SourceQuery::new(collection);
        let mut remaining: Vec<&Stage> = Vec::new();
        let mut shadowed: HashSet<&str> = HashSet::new();
        let mut pushable = true;

        for stage in pipeline.stages() {
            match stage {
                Stage::Filter(p) if pushable && p.fields().iter().all(|f| !shadowed.contains(f)) => {
                    if let Some((sql, values)) = predicate_to_sql(collection, p) {
                        source.where_clause(sql, values);
                        continue;
                    }
                    pushable = false;
                }
                Stage::Sort(keys)
                    if pushable
                        && keys.iter().all(|k| !shadowed.contains(k.field.as_str()))
                        && sort_is_pushable(collection, keys) =>
                {
                    source.order_by(keys);
                    continue;
                }
                Stage::Paginate(window) if pushable => {
                    source.window(*window);
                    pushable = false;
                    continue;
                }
                Stage::Filter(_) | Stage::Sort(_) | Stage::Paginate(_) => pushable = false,
                Stage::Join(join) => {
                    if join.pipeline.has_pagination() {
                        bail!("pagination is not supported inside a join on '{}'", join.as_field);
                    }
                    shadowed.insert(join.as_field.as_str());
                }
                Stage::Compute(fields) => {
                    shadowed.extend(fields.iter().map(|(name, _)| name.as_str()));
                }
                Stage::Project(keep) => {
                    for def in collection.fields() {
                        if !keep.iter().any(|k| k == def.name) {
                            shadowed.insert(def.name);
                        }
                    }
                }
            }
            remaining.push(stage);
        }

        tracing::debug!(
            collection = collection.table(),
            pushed = pipeline.stages().len() - remaining.len(),
            in_memory = remaining.len(),
            "Planned pipeline"
        );

        let mut total = if source.is_windowed() {
            Some(source.count(pool).await?)
        } else {
            None
        };

        let mut entries: Vec<Entry> = source
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|doc| Entry {
                key: key_field
                    .and_then(|k| doc.get(k).cloned())
                    .unwrap_or(Value::Null),
                doc,
            })
            .collect();

        for stage in remaining {
            match stage {
                Stage::Filter(p) => entries.retain(|e| matches(&e.doc, p)),
                Stage::Sort(keys) => entries.sort_by(|a, b| compare_docs(&a.doc, &b.doc, keys)),
                Stage::Paginate(window) => {
                    total.get_or_insert(entries.len() as u64);
                    entries = entries
                        .into_iter()
                        .skip(window.offset() as usize)
                        .take(window.limit as usize)
                        .collect();
                }
                Stage::Project(keep) => {
                    for e in &mut entries {
                        e.doc.retain(|k, _| keep.iter().any(|f| f == k));
                    }
                }
                Stage::Compute(fields) => {
                    for e in &mut entries {
                        let computed: Vec<(String, Value)> = fields
                            .iter()
                            .map(|(name, expr)| (name.clone(), evaluate(&e.doc, expr)))
                            .collect();
                        e.doc.extend(computed);
                    }
                }
                Stage::Join(join) => apply_join(pool, join, &mut entries).await?,
            }
        }

        let total = total.unwrap_or(entries.len() as u64);
        Ok((entries, total))
    }
    .boxed()
}

async fn apply_join(pool: &SqlitePool, join: &Join, entries: &mut [Entry]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for e in entries.iter() {
        let local = e.doc.get(&join.local_field).unwrap_or(&Value::Null);
        let candidates: Vec<&Value> = match local {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            scalar => vec![scalar],
        };
        for k in candidates {
            if seen.insert(key_string(k)) {
                keys.push(k.clone());
            }
        }
    }

    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    if !keys.is_empty() {
        let mut sub = Pipeline::new().filter(Predicate::In(join.foreign_field.clone(), keys));
        for stage in join.pipeline.stages() {
            sub = sub.push(stage.clone());
        }
        let (children, _) = run(pool, join.from, &sub, Some(join.foreign_field.as_str())).await?;
        for child in children {
            groups
                .entry(key_string(&child.key))
                .or_default()
                .push(Value::Object(child.doc));
        }
    }

    for e in entries.iter_mut() {
        let local = e.doc.get(&join.local_field).cloned().unwrap_or(Value::Null);
        let matched: Vec<Value> = match local {
            // Array-valued locals keep the local array's order.
            Value::Array(items) => items
                .iter()
                .flat_map(|k| groups.get(&key_string(k)).cloned().unwrap_or_default())
                .collect(),
            Value::Null => Vec::new(),
            scalar => groups.get(&key_string(&scalar)).cloned().unwrap_or_default(),
        };
        e.doc.insert(join.as_field.clone(), Value::Array(matched));
    }
    Ok(())
}
