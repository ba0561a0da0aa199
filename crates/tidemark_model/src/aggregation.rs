//! Grouped aggregation.

use crate::entity::{Entity, JsonObject};
use crate::error::ModelResult;
use crate::filter::Filter;
use serde_json::Value;
use std::collections::HashMap;

/// The reduce step applied per entity within a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduce {
    /// Count of entities, accumulated into `count`.
    Count,
    /// Sum of a numeric field, accumulated into `result`.
    Sum(String),
    /// Minimum of a numeric field, accumulated into `result`.
    Min(String),
    /// Maximum of a numeric field, accumulated into `result`.
    Max(String),
    /// Running average of a numeric field (`count` + `result`).
    Average(String),
}

/// A grouped aggregation over a collection.
///
/// Entities are grouped by one or more key fields; each group folds its
/// members through the [`Reduce`] expression starting from the initial
/// accumulator. The same structure renders the `_group` request body the
/// backend expects and evaluates locally over cached entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    keys: Vec<String>,
    reduce: Reduce,
    condition: Option<Filter>,
}

impl Aggregation {
    /// Counts entities per group.
    pub fn count<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Reduce::Count)
    }

    /// Sums `field` per group.
    pub fn sum<I, S>(keys: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Reduce::Sum(field.into()))
    }

    /// Takes the minimum of `field` per group.
    pub fn min<I, S>(keys: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Reduce::Min(field.into()))
    }

    /// Takes the maximum of `field` per group.
    pub fn max<I, S>(keys: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Reduce::Max(field.into()))
    }

    /// Averages `field` per group.
    pub fn average<I, S>(keys: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Reduce::Average(field.into()))
    }

    fn new<I, S>(keys: I, reduce: Reduce) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            reduce,
            condition: None,
        }
    }

    /// Restricts the aggregation to entities matching `filter`.
    #[must_use]
    pub fn condition(mut self, filter: Filter) -> Self {
        self.condition = Some(filter);
        self
    }

    /// Returns the group-by key fields.
    #[must_use]
    pub fn keys_ref(&self) -> &[String] {
        &self.keys
    }

    /// Renders the `_group` request body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut key = JsonObject::new();
        for field in &self.keys {
            key.insert(field.clone(), Value::Bool(true));
        }

        let mut body = JsonObject::new();
        body.insert("key".into(), Value::Object(key));
        body.insert("initial".into(), Value::Object(self.initial()));
        body.insert("reduce".into(), Value::String(self.reduce_source()));
        if let Some(condition) = &self.condition {
            body.insert("condition".into(), condition.to_value());
        }
        Value::Object(body)
    }

    fn initial(&self) -> JsonObject {
        let mut initial = JsonObject::new();
        match &self.reduce {
            Reduce::Count => {
                initial.insert("count".into(), 0.into());
            }
            Reduce::Sum(_) => {
                initial.insert("result".into(), 0.into());
            }
            Reduce::Min(_) => {
                initial.insert("result".into(), Value::String("Infinity".into()));
            }
            Reduce::Max(_) => {
                initial.insert("result".into(), Value::String("-Infinity".into()));
            }
            Reduce::Average(_) => {
                initial.insert("count".into(), 0.into());
                initial.insert("result".into(), 0.into());
            }
        }
        initial
    }

    /// The server-side reduce function, as the backend's map/reduce
    /// endpoint expects it.
    fn reduce_source(&self) -> String {
        match &self.reduce {
            Reduce::Count => "function(doc, out) { out.count += 1; }".to_string(),
            Reduce::Sum(field) => {
                format!("function(doc, out) {{ out.result += doc[\"{field}\"]; }}")
            }
            Reduce::Min(field) => format!(
                "function(doc, out) {{ out.result = Math.min(out.result, doc[\"{field}\"]); }}"
            ),
            Reduce::Max(field) => format!(
                "function(doc, out) {{ out.result = Math.max(out.result, doc[\"{field}\"]); }}"
            ),
            Reduce::Average(field) => format!(
                "function(doc, out) {{ out.count += 1; out.result = (((out.count - 1) * out.result) + doc[\"{field}\"]) / out.count; }}"
            ),
        }
    }

    /// Evaluates the aggregation over a set of entities.
    ///
    /// Returns one JSON object per group carrying the group keys plus the
    /// accumulator fields, matching the backend's `_group` response shape.
    pub fn evaluate(&self, entities: &[Entity]) -> ModelResult<Vec<JsonObject>> {
        let mut groups: Vec<(Vec<Value>, Vec<&Entity>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for entity in entities {
            if let Some(condition) = &self.condition {
                if !condition.matches(entity)? {
                    continue;
                }
            }
            let key_values: Vec<Value> = self
                .keys
                .iter()
                .map(|k| entity.get(k).cloned().unwrap_or(Value::Null))
                .collect();
            let discriminant = Value::Array(key_values.clone()).to_string();
            let slot = *index.entry(discriminant).or_insert_with(|| {
                groups.push((key_values, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(entity);
        }

        Ok(groups
            .into_iter()
            .map(|(key_values, members)| self.fold_group(key_values, &members))
            .collect())
    }

    fn fold_group(&self, key_values: Vec<Value>, members: &[&Entity]) -> JsonObject {
        let mut out = JsonObject::new();
        for (field, value) in self.keys.iter().zip(key_values) {
            out.insert(field.clone(), value);
        }

        let numbers = |field: &str| {
            members
                .iter()
                .filter_map(|e| e.get(field).and_then(Value::as_f64))
                .collect::<Vec<f64>>()
        };
        let number = |n: f64| {
            serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
        };

        match &self.reduce {
            Reduce::Count => {
                out.insert("count".into(), (members.len() as u64).into());
            }
            Reduce::Sum(field) => {
                out.insert("result".into(), number(numbers(field).iter().sum()));
            }
            Reduce::Min(field) => {
                let min = numbers(field).into_iter().fold(f64::INFINITY, f64::min);
                out.insert("result".into(), number(min));
            }
            Reduce::Max(field) => {
                let max = numbers(field).into_iter().fold(f64::NEG_INFINITY, f64::max);
                out.insert("result".into(), number(max));
            }
            Reduce::Average(field) => {
                let values = numbers(field);
                let avg = if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                };
                out.insert("count".into(), (values.len() as u64).into());
                out.insert("result".into(), number(avg));
            }
        }
        out
    }
}
