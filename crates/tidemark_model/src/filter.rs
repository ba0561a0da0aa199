//! The filter tree.

use crate::compare::partial_cmp_values;
use crate::entity::{Entity, JsonObject};
use crate::error::{ModelError, ModelResult};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// A filter over entities.
///
/// Filters form a closed tree of comparisons and logical combinators.
/// The wire form is the backend's MongoDB-style JSON (see [`Filter::to_value`]);
/// the same tree evaluates locally against cached entities.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value. For array-valued fields this also matches
    /// containment, mirroring the backend's behavior.
    Eq(String, Value),
    /// Field is not equal to value.
    Ne(String, Value),
    /// Field is greater than value.
    Gt(String, Value),
    /// Field is greater than or equal to value.
    Gte(String, Value),
    /// Field is less than value.
    Lt(String, Value),
    /// Field is less than or equal to value.
    Lte(String, Value),
    /// Field value is one of the listed values.
    In(String, Vec<Value>),
    /// Field value is none of the listed values.
    Nin(String, Vec<Value>),
    /// Field presence check.
    Exists(String, bool),
    /// Field matches the regular expression.
    Regex(String, String),
    /// All child filters match.
    And(Vec<Filter>),
    /// At least one child filter matches.
    Or(Vec<Filter>),
    /// The child filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// Greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    /// Greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    /// Less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    /// Less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    /// Membership filter.
    pub fn within(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(field.into(), values)
    }

    /// Negated membership filter.
    pub fn not_within(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::Nin(field.into(), values)
    }

    /// Presence filter.
    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::Exists(field.into(), present)
    }

    /// Regular-expression filter.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Regex(field.into(), pattern.into())
    }

    /// Conjunction with another filter.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut children) => {
                children.push(other);
                Filter::And(children)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Disjunction with another filter.
    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut children) => {
                children.push(other);
                Filter::Or(children)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluates the filter against an entity.
    pub fn matches(&self, entity: &Entity) -> ModelResult<bool> {
        let lookup = |field: &str| entity.get(field).unwrap_or(&Value::Null);
        Ok(match self {
            Filter::Eq(field, value) => eq_matches(entity.get(field), value),
            Filter::Ne(field, value) => !eq_matches(entity.get(field), value),
            Filter::Gt(field, value) => {
                partial_cmp_values(lookup(field), value) == Some(Ordering::Greater)
            }
            Filter::Gte(field, value) => matches!(
                partial_cmp_values(lookup(field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(field, value) => {
                partial_cmp_values(lookup(field), value) == Some(Ordering::Less)
            }
            Filter::Lte(field, value) => matches!(
                partial_cmp_values(lookup(field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In(field, values) => values.iter().any(|v| eq_matches(entity.get(field), v)),
            Filter::Nin(field, values) => !values.iter().any(|v| eq_matches(entity.get(field), v)),
            Filter::Exists(field, present) => entity.get(field).is_some() == *present,
            Filter::Regex(field, pattern) => {
                let re = Regex::new(pattern).map_err(|source| ModelError::InvalidRegex {
                    pattern: pattern.clone(),
                    source,
                })?;
                match lookup(field) {
                    Value::String(s) => re.is_match(s),
                    _ => false,
                }
            }
            Filter::And(children) => {
                for child in children {
                    if !child.matches(entity)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(children) => {
                for child in children {
                    if child.matches(entity)? {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::Not(child) => !child.matches(entity)?,
        })
    }

    /// Renders the backend's MongoDB-style JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Filter::Eq(field, value) => object(field, value.clone()),
            Filter::Ne(field, value) => operator(field, "$ne", value.clone()),
            Filter::Gt(field, value) => operator(field, "$gt", value.clone()),
            Filter::Gte(field, value) => operator(field, "$gte", value.clone()),
            Filter::Lt(field, value) => operator(field, "$lt", value.clone()),
            Filter::Lte(field, value) => operator(field, "$lte", value.clone()),
            Filter::In(field, values) => operator(field, "$in", Value::Array(values.clone())),
            Filter::Nin(field, values) => operator(field, "$nin", Value::Array(values.clone())),
            Filter::Exists(field, present) => operator(field, "$exists", Value::Bool(*present)),
            Filter::Regex(field, pattern) => {
                operator(field, "$regex", Value::String(pattern.clone()))
            }
            Filter::And(children) => combinator("$and", children),
            Filter::Or(children) => combinator("$or", children),
            Filter::Not(child) => combinator("$nor", std::slice::from_ref(&**child)),
        }
    }

    /// Parses the MongoDB-style JSON form back into a filter tree.
    ///
    /// Accepts the subset produced by [`Filter::to_value`]; used by tests
    /// and in-process servers that must evaluate serialized queries.
    pub fn from_value(value: &Value) -> ModelResult<Filter> {
        let map = value
            .as_object()
            .ok_or_else(|| ModelError::invalid_query("filter must be a JSON object"))?;

        let mut parts = Vec::new();
        for (key, entry) in map {
            match key.as_str() {
                "$and" => parts.push(Filter::And(parse_filter_list(entry)?)),
                "$or" => parts.push(Filter::Or(parse_filter_list(entry)?)),
                "$nor" => {
                    let children = parse_filter_list(entry)?;
                    let inner = if children.len() == 1 {
                        children.into_iter().next().unwrap_or(Filter::And(vec![]))
                    } else {
                        Filter::Or(children)
                    };
                    parts.push(inner.negate());
                }
                field => parts.push(parse_field_entry(field, entry)?),
            }
        }

        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Filter::And(parts),
        })
    }
}

/// Equality with the backend's array-containment semantics.
fn eq_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|v| v == expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    }
}

fn object(field: &str, value: Value) -> Value {
    let mut map = JsonObject::new();
    map.insert(field.to_string(), value);
    Value::Object(map)
}

fn operator(field: &str, op: &str, value: Value) -> Value {
    let mut inner = JsonObject::new();
    inner.insert(op.to_string(), value);
    object(field, Value::Object(inner))
}

fn combinator(op: &str, children: &[Filter]) -> Value {
    let mut map = JsonObject::new();
    map.insert(
        op.to_string(),
        Value::Array(children.iter().map(Filter::to_value).collect()),
    );
    Value::Object(map)
}

fn parse_filter_list(value: &Value) -> ModelResult<Vec<Filter>> {
    value
        .as_array()
        .ok_or_else(|| ModelError::invalid_query("logical operator expects an array"))?
        .iter()
        .map(Filter::from_value)
        .collect()
}

fn parse_field_entry(field: &str, value: &Value) -> ModelResult<Filter> {
    let Some(map) = value.as_object() else {
        return Ok(Filter::Eq(field.to_string(), value.clone()));
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(Filter::Eq(field.to_string(), value.clone()));
    }

    let mut parts = Vec::new();
    for (op, operand) in map {
        let field = field.to_string();
        let filter = match op.as_str() {
            "$ne" => Filter::Ne(field, operand.clone()),
            "$gt" => Filter::Gt(field, operand.clone()),
            "$gte" => Filter::Gte(field, operand.clone()),
            "$lt" => Filter::Lt(field, operand.clone()),
            "$lte" => Filter::Lte(field, operand.clone()),
            "$in" => Filter::In(field, parse_value_list(operand)?),
            "$nin" => Filter::Nin(field, parse_value_list(operand)?),
            "$exists" => Filter::Exists(field, operand.as_bool().unwrap_or(true)),
            "$regex" => Filter::Regex(
                field,
                operand
                    .as_str()
                    .ok_or_else(|| ModelError::invalid_query("$regex expects a string"))?
                    .to_string(),
            ),
            other => {
                return Err(ModelError::invalid_query(format!(
                    "unsupported operator {other}"
                )))
            }
        };
        parts.push(filter);
    }

    Ok(match parts.len() {
        1 => parts.remove(0),
        _ => Filter::And(parts),
    })
}

fn parse_value_list(value: &Value) -> ModelResult<Vec<Value>> {
    Ok(value
        .as_array()
        .ok_or_else(|| ModelError::invalid_query("$in/$nin expect an array"))?
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    #[test]
    fn equality() {
        let e = entity(json!({"title": "A", "n": 3}));
        assert!(Filter::eq("title", "A").matches(&e).unwrap());
        assert!(!Filter::eq("title", "B").matches(&e).unwrap());
        assert!(Filter::ne("n", 4).matches(&e).unwrap());
    }

    #[test]
    fn equality_matches_array_containment() {
        let e = entity(json!({"tags": ["a", "b"]}));
        assert!(Filter::eq("tags", "a").matches(&e).unwrap());
        assert!(!Filter::eq("tags", "c").matches(&e).unwrap());
    }

    #[test]
    fn range_operators() {
        let e = entity(json!({"n": 5}));
        assert!(Filter::gt("n", 4).matches(&e).unwrap());
        assert!(Filter::gte("n", 5).matches(&e).unwrap());
        assert!(Filter::lt("n", 6).matches(&e).unwrap());
        assert!(!Filter::lte("n", 4).matches(&e).unwrap());
    }

    #[test]
    fn range_against_missing_field_is_false() {
        let e = entity(json!({}));
        assert!(!Filter::gt("n", 0).matches(&e).unwrap());
        assert!(!Filter::lt("n", 0).matches(&e).unwrap());
    }

    #[test]
    fn membership() {
        let e = entity(json!({"n": 2}));
        assert!(Filter::within("n", vec![json!(1), json!(2)])
            .matches(&e)
            .unwrap());
        assert!(Filter::not_within("n", vec![json!(3)]).matches(&e).unwrap());
    }

    #[test]
    fn exists() {
        let e = entity(json!({"a": null, "b": 1}));
        assert!(Filter::exists("a", true).matches(&e).unwrap());
        assert!(Filter::exists("c", false).matches(&e).unwrap());
        assert!(!Filter::exists("b", false).matches(&e).unwrap());
    }

    #[test]
    fn regex() {
        let e = entity(json!({"title": "Moby Dick"}));
        assert!(Filter::regex("title", "^Moby").matches(&e).unwrap());
        assert!(!Filter::regex("title", "^Dick").matches(&e).unwrap());
        assert!(Filter::regex("title", "(").matches(&e).is_err());
    }

    #[test]
    fn logical_combinators() {
        let e = entity(json!({"a": 1, "b": 2}));
        let both = Filter::eq("a", 1).and(Filter::eq("b", 2));
        assert!(both.matches(&e).unwrap());

        let either = Filter::eq("a", 9).or(Filter::eq("b", 2));
        assert!(either.matches(&e).unwrap());

        assert!(!Filter::eq("a", 1).negate().matches(&e).unwrap());
    }

    #[test]
    fn wire_form() {
        let f = Filter::eq("a", 1).and(Filter::gt("b", 2));
        assert_eq!(
            f.to_value(),
            json!({"$and": [{"a": 1}, {"b": {"$gt": 2}}]})
        );

        let not = Filter::eq("a", 1).negate();
        assert_eq!(not.to_value(), json!({"$nor": [{"a": 1}]}));
    }

    #[test]
    fn wire_roundtrip() {
        let filters = vec![
            Filter::eq("a", 1),
            Filter::ne("a", json!("x")),
            Filter::within("n", vec![json!(1), json!(2)]),
            Filter::exists("f", false),
            Filter::regex("t", "^a"),
            Filter::eq("a", 1).and(Filter::lt("b", 9)),
            Filter::eq("a", 1).or(Filter::eq("a", 2)),
            Filter::gt("n", 0).negate(),
        ];
        for filter in filters {
            let wire = filter.to_value();
            let parsed = Filter::from_value(&wire).unwrap();
            assert_eq!(parsed.to_value(), wire);
        }
    }

    #[test]
    fn parse_compound_field_entry() {
        let parsed = Filter::from_value(&json!({"n": {"$gte": 1, "$lt": 10}})).unwrap();
        let e = entity(json!({"n": 5}));
        assert!(parsed.matches(&e).unwrap());
        let e = entity(json!({"n": 10}));
        assert!(!parsed.matches(&e).unwrap());
    }

    #[test]
    fn parse_rejects_unknown_operator() {
        assert!(Filter::from_value(&json!({"n": {"$near": [0, 0]}})).is_err());
    }
}
