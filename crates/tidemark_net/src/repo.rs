//! Typed facade over the backend's data API.

use crate::error::{NetError, NetResult};
use crate::http::Method;
use crate::request::{ApiRequest, RequestExecutor};
use serde_json::Value;
use std::sync::Arc;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};

/// A response payload paired with the server's request-start timestamp.
///
/// The timestamp comes verbatim from the `X-Kinvey-Request-Start` header;
/// the client never derives it. Delta-set bookkeeping persists it as the
/// high-water mark for the issuing query.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    /// The decoded payload.
    pub data: T,
    /// The server timestamp, when the backend provided one.
    pub request_start: Option<String>,
}

/// The result of a delta-set request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaSetPage {
    /// Entities created or updated since the `since` timestamp.
    pub changed: Vec<Entity>,
    /// Ids of entities deleted since the `since` timestamp.
    pub deleted: Vec<String>,
}

/// Thin typed facade over authenticated HTTP to the backend's data API.
pub struct NetworkRepository {
    executor: Arc<RequestExecutor>,
    /// TTL for returned file links, appended as `kinveyfile_ttl`.
    file_ttl: Option<u64>,
    /// TLS preference for returned file links, appended as `kinveyfile_tls`.
    file_tls: Option<bool>,
    /// Per-repository timeout override.
    timeout: Option<std::time::Duration>,
}

impl NetworkRepository {
    /// Creates a repository over the executor.
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self {
            executor,
            file_ttl: None,
            file_tls: None,
            timeout: None,
        }
    }

    /// Overrides the request timeout for this repository.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn finalize(&self, request: ApiRequest) -> ApiRequest {
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    fn execute(&self, request: ApiRequest) -> NetResult<crate::Response> {
        self.executor.execute(&self.finalize(request))
    }

    fn execute_json(&self, request: ApiRequest) -> NetResult<Value> {
        self.executor.execute_json(&self.finalize(request))
    }

    /// Sets the file-link TTL forwarded on reads.
    #[must_use]
    pub fn with_file_ttl(mut self, ttl: Option<u64>) -> Self {
        self.file_ttl = ttl;
        self
    }

    /// Sets the file-link TLS preference forwarded on reads.
    #[must_use]
    pub fn with_file_tls(mut self, tls: Option<bool>) -> Self {
        self.file_tls = tls;
        self
    }

    /// Returns the underlying executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    fn path(&self, collection: &str, suffix: Option<&str>) -> String {
        let app_key = self.executor.app_key();
        match suffix {
            Some(suffix) => format!("/appdata/{app_key}/{collection}/{suffix}"),
            None => format!("/appdata/{app_key}/{collection}"),
        }
    }

    fn with_query(&self, mut request: ApiRequest, query: Option<&Query>) -> ApiRequest {
        if let Some(query) = query {
            request = request.params(query.to_wire_params());
        }
        request
    }

    fn with_file_params(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(ttl) = self.file_ttl {
            request = request.param("kinveyfile_ttl", ttl.to_string());
        }
        if let Some(tls) = self.file_tls {
            request = request.param("kinveyfile_tls", tls.to_string());
        }
        request
    }

    /// Fetches entities matching the query.
    pub fn find(&self, collection: &str, query: Option<&Query>) -> NetResult<Fetched<Vec<Entity>>> {
        let request = self.with_file_params(
            self.with_query(ApiRequest::new(Method::Get, self.path(collection, None)), query),
        );
        let response = self.execute(request)?;
        let request_start = response.request_start().map(str::to_string);
        Ok(Fetched {
            data: parse_entity_array(response.json_body()?)?,
            request_start,
        })
    }

    /// Fetches one entity by id.
    pub fn find_by_id(&self, collection: &str, id: &str) -> NetResult<Entity> {
        let request =
            self.with_file_params(ApiRequest::new(Method::Get, self.path(collection, Some(id))));
        let value = self.execute_json(request)?;
        Ok(Entity::from_value(value)?)
    }

    /// Counts entities matching the query.
    pub fn count(&self, collection: &str, query: Option<&Query>) -> NetResult<Fetched<u64>> {
        let request = self.with_query(
            ApiRequest::new(Method::Get, self.path(collection, Some("_count"))),
            query,
        );
        let response = self.execute(request)?;
        let request_start = response.request_start().map(str::to_string);
        let body = response.json_body()?;
        let count = body
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| NetError::invalid_argument("count response missing count member"))?;
        Ok(Fetched {
            data: count,
            request_start,
        })
    }

    /// Creates an entity.
    pub fn create(&self, collection: &str, entity: &Entity) -> NetResult<Entity> {
        let request =
            ApiRequest::new(Method::Post, self.path(collection, None)).body(entity.to_value());
        let value = self.execute_json(request)?;
        Ok(Entity::from_value(value)?)
    }

    /// Replaces an entity by its id.
    pub fn update(&self, collection: &str, entity: &Entity) -> NetResult<Entity> {
        let id = entity
            .id()
            .ok_or_else(|| NetError::invalid_argument("update requires an entity with _id"))?;
        let request = ApiRequest::new(Method::Put, self.path(collection, Some(id)))
            .body(entity.to_value());
        let value = self.execute_json(request)?;
        Ok(Entity::from_value(value)?)
    }

    /// Deletes entities matching the query. Returns the deleted count.
    pub fn delete(&self, collection: &str, query: Option<&Query>) -> NetResult<u64> {
        let request = self.with_query(
            ApiRequest::new(Method::Delete, self.path(collection, None)),
            query,
        );
        let body = self.execute_json(request)?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    /// Deletes one entity by id. Returns the deleted count (0 or 1).
    pub fn delete_by_id(&self, collection: &str, id: &str) -> NetResult<u64> {
        let request = ApiRequest::new(Method::Delete, self.path(collection, Some(id)));
        let body = self.execute_json(request)?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    /// Runs a grouped aggregation server-side.
    pub fn group(&self, collection: &str, aggregation: &Aggregation) -> NetResult<Vec<JsonObject>> {
        let request = ApiRequest::new(Method::Post, self.path(collection, Some("_group")))
            .body(aggregation.to_body());
        let body = self.execute_json(request)?;
        let rows = body
            .as_array()
            .ok_or_else(|| NetError::invalid_argument("group response must be an array"))?;
        rows.iter()
            .map(|row| {
                row.as_object()
                    .cloned()
                    .ok_or_else(|| NetError::invalid_argument("group row must be an object"))
            })
            .collect()
    }

    /// Fetches the changes since a server timestamp.
    pub fn delta_set(
        &self,
        collection: &str,
        since: &str,
        query: Option<&Query>,
    ) -> NetResult<Fetched<DeltaSetPage>> {
        let request = self.with_query(
            ApiRequest::new(Method::Get, self.path(collection, Some("_deltaset")))
                .param("since", since),
            query,
        );
        let response = self.execute(request)?;
        let request_start = response.request_start().map(str::to_string);
        let body = response.json_body()?;

        let changed = parse_entity_array(body.get("changed").cloned().unwrap_or(Value::Array(vec![])))?;
        let deleted = body
            .get("deleted")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Fetched {
            data: DeltaSetPage { changed, deleted },
            request_start,
        })
    }

    /// Drops all backend data for the app. Requires the master secret.
    pub fn clear_all(&self) -> NetResult<()> {
        let app_key = self.executor.app_key();
        let request = ApiRequest::new(Method::Delete, format!("/appdata/{app_key}"))
            .auth(crate::AuthScheme::Master);
        self.execute(request)?;
        Ok(())
    }
}

fn parse_entity_array(value: Value) -> NetResult<Vec<Entity>> {
    let rows = match value {
        Value::Array(rows) => rows,
        other => {
            return Err(NetError::invalid_argument(format!(
                "expected a JSON array of entities, got {other}"
            )))
        }
    };
    rows.into_iter()
        .map(|row| Entity::from_value(row).map_err(NetError::from))
        .collect()
}
