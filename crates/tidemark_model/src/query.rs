//! Queries: filter + sort + projection + windowing.

use crate::compare::cmp_values;
use crate::entity::{Entity, JsonObject};
use crate::error::{ModelError, ModelResult};
use crate::filter::Filter;
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending (wire form `1`).
    Ascending,
    /// Descending (wire form `-1`).
    Descending,
}

impl SortOrder {
    fn wire_code(self) -> i64 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }

    fn from_wire_code(code: i64) -> ModelResult<Self> {
        match code {
            1 => Ok(SortOrder::Ascending),
            -1 => Ok(SortOrder::Descending),
            other => Err(ModelError::invalid_query(format!(
                "sort direction must be 1 or -1, got {other}"
            ))),
        }
    }
}

/// A query over a collection.
///
/// Composed of an optional [`Filter`], an ordered sort list, a field
/// projection, and a `skip`/`limit` window. A query with either `skip` or
/// `limit` set is *bounded*; bounded queries are excluded from delta-set
/// and never cause destructive cache replacement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    filter: Option<Filter>,
    sort: Vec<(String, SortOrder)>,
    fields: Vec<String>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl Query {
    /// Creates an empty (match-all) query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends an ascending sort field.
    #[must_use]
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Ascending));
        self
    }

    /// Appends a descending sort field.
    #[must_use]
    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Descending));
        self
    }

    /// Sets the projected fields. `_id` is always retained.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the number of leading matches to skip.
    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the maximum number of matches returned.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the filter, if any.
    #[must_use]
    pub fn filter_ref(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Returns the sort list.
    #[must_use]
    pub fn sort_ref(&self) -> &[(String, SortOrder)] {
        &self.sort
    }

    /// Returns the skip value, if set.
    #[must_use]
    pub fn skip_value(&self) -> Option<u64> {
        self.skip
    }

    /// Returns the limit value, if set.
    #[must_use]
    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Returns true if `skip` or `limit` is set.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.skip.is_some() || self.limit.is_some()
    }

    /// Returns a copy with `_id` ascending appended when no sort is set.
    ///
    /// Paginated pulls need a stable order across page requests.
    #[must_use]
    pub fn with_stable_sort(&self) -> Self {
        let mut query = self.clone();
        if query.sort.is_empty() {
            query.sort.push(("_id".into(), SortOrder::Ascending));
        }
        query
    }

    /// Tests whether an entity matches the filter.
    ///
    /// Sort, projection and windowing are ignored here.
    pub fn matches(&self, entity: &Entity) -> ModelResult<bool> {
        match &self.filter {
            Some(filter) => filter.matches(entity),
            None => Ok(true),
        }
    }

    /// Evaluates the full query over a set of entities.
    ///
    /// Applies filter, then sort, then `skip`/`limit`, then projection.
    pub fn apply(&self, entities: Vec<Entity>) -> ModelResult<Vec<Entity>> {
        let mut matched = Vec::with_capacity(entities.len());
        for entity in entities {
            if self.matches(&entity)? {
                matched.push(entity);
            }
        }

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.cmp_entities(a, b));
        }

        let skip = self.skip.unwrap_or(0) as usize;
        let mut windowed: Vec<Entity> = matched.into_iter().skip(skip).collect();
        if let Some(limit) = self.limit {
            windowed.truncate(limit as usize);
        }

        if self.fields.is_empty() {
            return Ok(windowed);
        }
        Ok(windowed.into_iter().map(|e| self.project(e)).collect())
    }

    fn cmp_entities(&self, a: &Entity, b: &Entity) -> Ordering {
        for (field, order) in &self.sort {
            let va = a.get(field).unwrap_or(&Value::Null);
            let vb = b.get(field).unwrap_or(&Value::Null);
            let ord = match order {
                SortOrder::Ascending => cmp_values(va, vb),
                SortOrder::Descending => cmp_values(vb, va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn project(&self, entity: Entity) -> Entity {
        let mut object = JsonObject::new();
        let source = entity.into_object();
        for (key, value) in source {
            if key == "_id" || self.fields.iter().any(|f| *f == key) {
                object.insert(key, value);
            }
        }
        Entity::from_object(object)
    }

    /// Canonical serialization of the query.
    ///
    /// Stable across processes: object keys sort lexicographically and the
    /// sort list keeps its order as an array of pairs. Used as the
    /// query-cache key for delta-set bookkeeping.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut map = JsonObject::new();
        map.insert(
            "filter".into(),
            self.filter
                .as_ref()
                .map_or_else(|| Value::Object(JsonObject::new()), Filter::to_value),
        );
        map.insert(
            "sort".into(),
            Value::Array(
                self.sort
                    .iter()
                    .map(|(f, o)| Value::Array(vec![Value::String(f.clone()), o.wire_code().into()]))
                    .collect(),
            ),
        );
        map.insert(
            "fields".into(),
            Value::Array(self.fields.iter().cloned().map(Value::String).collect()),
        );
        map.insert("skip".into(), self.skip.map_or(Value::Null, Into::into));
        map.insert("limit".into(), self.limit.map_or(Value::Null, Into::into));
        Value::Object(map).to_string()
    }

    /// Renders the query-string parameters the backend expects.
    ///
    /// Values are not percent-encoded here; the request layer owns URL
    /// assembly.
    #[must_use]
    pub fn to_wire_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(filter) = &self.filter {
            params.push(("query".to_string(), filter.to_value().to_string()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".to_string(), self.sort_wire_json()));
        }
        if !self.fields.is_empty() {
            params.push(("fields".to_string(), self.fields.join(",")));
        }
        if let Some(skip) = self.skip {
            params.push(("skip".to_string(), skip.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Renders the sort list as the backend's JSON object, preserving
    /// field order.
    fn sort_wire_json(&self) -> String {
        let mut out = String::from("{");
        for (i, (field, order)) in self.sort.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::String(field.clone()).to_string());
            out.push(':');
            out.push_str(&order.wire_code().to_string());
        }
        out.push('}');
        out
    }

    /// Reconstructs a query from its wire parameters.
    ///
    /// Used by in-process servers that must evaluate serialized queries.
    /// Multi-field sort order is not preserved (JSON objects carry no
    /// order), which is acceptable for test backends.
    pub fn from_wire(
        query: Option<&str>,
        sort: Option<&str>,
        fields: Option<&str>,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> ModelResult<Self> {
        let mut built = Query::new();

        if let Some(text) = query {
            let value: Value = serde_json::from_str(text)?;
            let empty = value.as_object().is_some_and(JsonObject::is_empty);
            if !empty {
                built.filter = Some(Filter::from_value(&value)?);
            }
        }
        if let Some(text) = sort {
            let value: Value = serde_json::from_str(text)?;
            let map = value
                .as_object()
                .ok_or_else(|| ModelError::invalid_query("sort must be a JSON object"))?;
            for (field, code) in map {
                let code = code
                    .as_i64()
                    .ok_or_else(|| ModelError::invalid_query("sort direction must be a number"))?;
                built.sort.push((field.clone(), SortOrder::from_wire_code(code)?));
            }
        }
        if let Some(csv) = fields {
            built.fields = csv
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        built.skip = skip;
        built.limit = limit;
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entities(values: Vec<Value>) -> Vec<Entity> {
        values
            .into_iter()
            .map(|v| Entity::from_value(v).unwrap())
            .collect()
    }

    #[test]
    fn empty_query_matches_all() {
        let q = Query::new();
        let items = entities(vec![json!({"_id": "1"}), json!({"_id": "2"})]);
        assert_eq!(q.apply(items).unwrap().len(), 2);
        assert!(!q.is_bounded());
    }

    #[test]
    fn filter_then_sort_then_window() {
        let q = Query::new()
            .filter(Filter::gt("n", 0))
            .descending("n")
            .skip(1)
            .limit(2);
        let items = entities(vec![
            json!({"_id": "a", "n": 3}),
            json!({"_id": "b", "n": -1}),
            json!({"_id": "c", "n": 5}),
            json!({"_id": "d", "n": 1}),
            json!({"_id": "e", "n": 4}),
        ]);

        let result = q.apply(items).unwrap();
        let ids: Vec<_> = result.iter().map(|e| e.id().unwrap()).collect();
        // n desc: c(5), e(4), a(3), d(1); skip 1, limit 2
        assert_eq!(ids, vec!["e", "a"]);
        assert!(q.is_bounded());
    }

    #[test]
    fn multi_field_sort() {
        let q = Query::new().ascending("group").descending("n");
        let items = entities(vec![
            json!({"_id": "a", "group": 1, "n": 1}),
            json!({"_id": "b", "group": 0, "n": 1}),
            json!({"_id": "c", "group": 1, "n": 2}),
        ]);
        let ids: Vec<String> = q
            .apply(items)
            .unwrap()
            .iter()
            .map(|e| e.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn missing_sort_field_sorts_first() {
        let q = Query::new().ascending("n");
        let items = entities(vec![
            json!({"_id": "a", "n": 1}),
            json!({"_id": "b"}),
        ]);
        let ids: Vec<String> = q
            .apply(items)
            .unwrap()
            .iter()
            .map(|e| e.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn projection_retains_id() {
        let q = Query::new().fields(["title"]);
        let items = entities(vec![json!({"_id": "1", "title": "A", "pages": 10})]);
        let result = q.apply(items).unwrap();
        assert_eq!(result[0].to_value(), json!({"_id": "1", "title": "A"}));
    }

    #[test]
    fn canonical_is_stable_and_discriminating() {
        let a = Query::new().filter(Filter::eq("x", 1)).ascending("a");
        let b = Query::new().filter(Filter::eq("x", 1)).ascending("a");
        assert_eq!(a.canonical(), b.canonical());

        let c = Query::new().filter(Filter::eq("x", 1)).descending("a");
        assert_ne!(a.canonical(), c.canonical());

        let bounded = Query::new().filter(Filter::eq("x", 1)).ascending("a").limit(5);
        assert_ne!(a.canonical(), bounded.canonical());
    }

    #[test]
    fn wire_params() {
        let q = Query::new()
            .filter(Filter::eq("title", "A"))
            .ascending("title")
            .descending("n")
            .fields(["title", "n"])
            .skip(2)
            .limit(10);
        let params = q.to_wire_params();
        assert_eq!(
            params,
            vec![
                ("query".to_string(), r#"{"title":"A"}"#.to_string()),
                ("sort".to_string(), r#"{"title":1,"n":-1}"#.to_string()),
                ("fields".to_string(), "title,n".to_string()),
                ("skip".to_string(), "2".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn from_wire_roundtrip() {
        let q = Query::new().filter(Filter::gt("n", 1)).ascending("n").limit(3);
        let params = q.to_wire_params();
        let lookup = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let parsed = Query::from_wire(
            lookup("query"),
            lookup("sort"),
            lookup("fields"),
            None,
            Some(3),
        )
        .unwrap();
        assert_eq!(parsed, q);
    }

    #[test]
    fn from_wire_empty_filter_is_match_all() {
        let parsed = Query::from_wire(Some("{}"), None, None, None, None).unwrap();
        assert_eq!(parsed, Query::new());
    }

    #[test]
    fn stable_sort_injected_only_when_absent() {
        let q = Query::new();
        assert_eq!(
            q.with_stable_sort().sort_ref(),
            &[("_id".to_string(), SortOrder::Ascending)]
        );

        let sorted = Query::new().descending("n");
        assert_eq!(sorted.with_stable_sort().sort_ref(), sorted.sort_ref());
    }
}
