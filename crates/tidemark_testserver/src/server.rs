//! Request routing and the public test surface.

use crate::state::{format_instant, parse_instant, ServerState};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tidemark_model::{Aggregation, Entity, Filter, Query};
use tidemark_net::{headers, HttpClient, NetResult, Request, Response};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    /// HTTP method name.
    pub method: String,
    /// Decoded path (no host, no query string).
    pub path: String,
    /// Decoded query parameters, in order.
    pub query: Vec<(String, String)>,
    /// The `Authorization` header, if any.
    pub authorization: Option<String>,
}

impl LoggedRequest {
    /// Looks up a query parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the request targeted the given path suffix.
    #[must_use]
    pub fn is(&self, method: &str, path_suffix: &str) -> bool {
        self.method == method && self.path.ends_with(path_suffix)
    }
}

/// The in-process backend.
///
/// Plug an instance into the client as its [`HttpClient`]; drive and
/// inspect it directly from the test body.
pub struct TestServer {
    app_key: String,
    state: Mutex<ServerState>,
    log: Mutex<Vec<LoggedRequest>>,
}

impl TestServer {
    /// Creates a server for one app key.
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            state: Mutex::new(ServerState::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    // ---- test surface -------------------------------------------------

    /// Seeds an entity server-side. Returns its id.
    pub fn insert(&self, collection: &str, entity: Value) -> String {
        let mut state = self.state.lock();
        let at = state.step();
        let entity = state.stamp(as_object(entity), at);
        let id = entity
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(entity);
        id
    }

    /// Mutates an entity server-side (upsert by `_id`), advancing its
    /// last-modified time. Used to stage delta-set changes.
    pub fn mutate(&self, collection: &str, entity: Value) {
        let mut state = self.state.lock();
        let at = state.step();
        let stamped = state.stamp(as_object(entity), at);
        let rows = state
            .collections
            .entry(collection.to_string())
            .or_default();
        match rows
            .iter_mut()
            .find(|row| row.get("_id") == stamped.get("_id"))
        {
            Some(row) => *row = stamped,
            None => rows.push(stamped),
        }
    }

    /// Deletes an entity server-side, journaling the tombstone.
    pub fn erase(&self, collection: &str, entity_id: &str) {
        let mut state = self.state.lock();
        let at = state.step();
        if let Some(rows) = state.collections.get_mut(collection) {
            rows.retain(|row| row.get("_id").and_then(Value::as_str) != Some(entity_id));
        }
        state.bury(collection, entity_id.to_string(), at);
    }

    /// Returns the entities currently stored in a collection.
    #[must_use]
    pub fn entities(&self, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Counts the entities in a collection.
    #[must_use]
    pub fn entity_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Issues a session token the server will accept.
    pub fn issue_session(&self) -> String {
        let mut state = self.state.lock();
        state.sessions_issued += 1;
        let token = format!("tok-{}", state.sessions_issued);
        state.valid_tokens.insert(token.clone());
        token
    }

    /// Invalidates every session token; session requests 401 until a
    /// refresh logs in again.
    pub fn expire_sessions(&self) {
        self.state.lock().valid_tokens.clear();
    }

    /// Makes the next refresh POST fail with `InvalidGrant`.
    pub fn fail_next_refresh(&self) {
        self.state.lock().fail_refresh = true;
    }

    /// Disables delta sync for a collection.
    pub fn disable_delta_set(&self, collection: &str) {
        self.state
            .lock()
            .delta_disabled
            .insert(collection.to_string());
    }

    /// Rejects the next `_deltaset` request as stale.
    pub fn reject_next_delta_set(&self) {
        self.state.lock().reject_next_delta_set = true;
    }

    /// Number of refresh POSTs observed.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.state.lock().refresh_count
    }

    /// Every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().clone()
    }

    /// Number of requests seen so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    // ---- routing ------------------------------------------------------

    fn handle(&self, request: &Request) -> Response {
        let (path, params) = split_url(&request.url);
        self.log.lock().push(LoggedRequest {
            method: request.method.as_str().to_string(),
            path: path.clone(),
            query: params.clone(),
            authorization: request.header("Authorization").map(str::to_string),
        });

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["oauth", "token"] => self.handle_token(),
            ["user", _, "login"] => self.handle_login(),
            ["appdata", app, rest @ ..] if *app == self.app_key => {
                self.handle_appdata(request, rest, &params)
            }
            _ => error_response(404, "NotFound", "no such route"),
        }
    }

    fn handle_token(&self) -> Response {
        let mut state = self.state.lock();
        state.refresh_count += 1;
        if state.fail_refresh {
            state.fail_refresh = false;
            return error_response(400, "InvalidGrant", "refresh token rejected");
        }
        let n = state.refresh_count;
        Response::json(
            200,
            &json!({
                "access_token": format!("at-{n}"),
                "refresh_token": format!("rt-{n}"),
                "token_type": "Bearer",
                "expires_in": 3600
            }),
        )
    }

    fn handle_login(&self) -> Response {
        let mut state = self.state.lock();
        state.sessions_issued += 1;
        let token = format!("tok-{}", state.sessions_issued);
        state.valid_tokens.insert(token.clone());
        Response::json(
            200,
            &json!({
                "_id": "user1",
                "username": "refreshed",
                "_kmd": {"authtoken": token}
            }),
        )
    }

    fn handle_appdata(
        &self,
        request: &Request,
        rest: &[&str],
        params: &[(String, String)],
    ) -> Response {
        let mut state = self.state.lock();

        // Session tokens must be ones this server issued and not expired.
        if let Some(auth) = request.header("Authorization") {
            if let Some(token) = auth.strip_prefix("Kinvey ") {
                if !state.valid_tokens.contains(token) {
                    return error_response(401, "InvalidCredentials", "session token expired");
                }
            }
        }

        let at = state.step();
        let stamp = format_instant(at);
        let method = request.method.as_str();
        let body: Option<Value> = request
            .body
            .as_ref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok());

        let response = match (method, rest) {
            ("DELETE", []) => {
                state.collections.clear();
                state.tombstones.clear();
                Response::json(200, &json!({}))
            }
            ("GET", [collection]) => match parse_query(params) {
                Ok(query) => {
                    let rows = collection_entities(&state, collection);
                    match query.apply(rows) {
                        Ok(found) => Response::json(200, &entities_value(found)),
                        Err(_) => error_response(400, "IncompleteRequestBody", "bad query"),
                    }
                }
                Err(response) => response,
            },
            ("POST", [collection]) => match body {
                Some(Value::Object(entity)) => {
                    let stamped = state.stamp(entity, at);
                    let value = Value::Object(stamped.clone());
                    state
                        .collections
                        .entry((*collection).to_string())
                        .or_default()
                        .push(stamped);
                    Response::json(201, &value)
                }
                _ => error_response(400, "IncompleteRequestBody", "expected an entity body"),
            },
            ("DELETE", [collection]) => match parse_query(params) {
                Ok(query) => {
                    let rows = collection_entities(&state, collection);
                    let mut doomed = Vec::new();
                    for row in rows {
                        match query.matches(&row) {
                            Ok(true) => {
                                if let Some(id) = row.id() {
                                    doomed.push(id.to_string());
                                }
                            }
                            Ok(false) => {}
                            Err(_) => {
                                return error_response(400, "IncompleteRequestBody", "bad query")
                            }
                        }
                    }
                    if let Some(rows) = state.collections.get_mut(*collection) {
                        rows.retain(|row| {
                            row.get("_id")
                                .and_then(Value::as_str)
                                .map_or(true, |id| !doomed.iter().any(|d| d == id))
                        });
                    }
                    for id in &doomed {
                        state.bury(collection, id.clone(), at);
                    }
                    Response::json(200, &json!({"count": doomed.len()}))
                }
                Err(response) => response,
            },
            ("GET", [collection, "_count"]) => match parse_query(params) {
                Ok(query) => {
                    let rows = collection_entities(&state, collection);
                    let mut count = 0;
                    for row in &rows {
                        if query.matches(row).unwrap_or(false) {
                            count += 1;
                        }
                    }
                    Response::json(200, &json!({"count": count}))
                }
                Err(response) => response,
            },
            ("POST", [collection, "_group"]) => match body.as_ref().and_then(parse_aggregation) {
                Some(aggregation) => {
                    let rows = collection_entities(&state, collection);
                    match aggregation.evaluate(&rows) {
                        Ok(groups) => Response::json(
                            200,
                            &Value::Array(groups.into_iter().map(Value::Object).collect()),
                        ),
                        Err(_) => error_response(400, "IncompleteRequestBody", "bad aggregation"),
                    }
                }
                None => error_response(400, "IncompleteRequestBody", "bad aggregation body"),
            },
            ("GET", [collection, "_deltaset"]) => {
                self.handle_delta_set(&mut state, collection, params)
            }
            ("GET", [collection, id]) => {
                match find_entity(&state, collection, id) {
                    Some(entity) => Response::json(200, &Value::Object(entity)),
                    None => error_response(404, "EntityNotFound", "no such entity"),
                }
            }
            ("PUT", [collection, id]) => match body {
                Some(Value::Object(mut entity)) => {
                    if find_entity(&state, collection, id).is_none() {
                        error_response(404, "EntityNotFound", "no such entity")
                    } else {
                        entity.insert("_id".into(), Value::String((*id).to_string()));
                        let stamped = state.stamp(entity, at);
                        let value = Value::Object(stamped.clone());
                        if let Some(rows) = state.collections.get_mut(*collection) {
                            if let Some(row) = rows
                                .iter_mut()
                                .find(|row| row.get("_id").and_then(Value::as_str) == Some(*id))
                            {
                                *row = stamped;
                            }
                        }
                        Response::json(200, &value)
                    }
                }
                _ => error_response(400, "IncompleteRequestBody", "expected an entity body"),
            },
            ("DELETE", [collection, id]) => {
                if find_entity(&state, collection, id).is_some() {
                    if let Some(rows) = state.collections.get_mut(*collection) {
                        rows.retain(|row| row.get("_id").and_then(Value::as_str) != Some(*id));
                    }
                    state.bury(collection, (*id).to_string(), at);
                    Response::json(200, &json!({"count": 1}))
                } else {
                    error_response(404, "EntityNotFound", "no such entity")
                }
            }
            _ => error_response(404, "NotFound", "no such route"),
        };

        response.with_header(canonical_request_start(), stamp)
    }

    fn handle_delta_set(
        &self,
        state: &mut ServerState,
        collection: &str,
        params: &[(String, String)],
    ) -> Response {
        if state.delta_disabled.contains(collection) {
            return error_response(
                403,
                "MissingConfiguration",
                "delta sync is not configured for this collection",
            );
        }
        if state.reject_next_delta_set {
            state.reject_next_delta_set = false;
            return error_response(400, "ParameterValueOutOfRange", "since is too old");
        }

        let since = params
            .iter()
            .find(|(name, _)| name == "since")
            .and_then(|(_, value)| parse_instant(value));
        let Some(since) = since else {
            return error_response(400, "ParameterValueOutOfRange", "missing or malformed since");
        };

        let filter = match parse_query(params) {
            Ok(query) => query,
            Err(response) => return response,
        };

        let mut changed = Vec::new();
        for row in collection_entities(state, collection) {
            let modified = ServerState::modified_at(row.as_object());
            if modified.is_some_and(|at| at > since) && filter.matches(&row).unwrap_or(false) {
                changed.push(row);
            }
        }
        let deleted: Vec<Value> = state
            .tombstones
            .get(collection)
            .map(|stones| {
                stones
                    .iter()
                    .filter(|stone| stone.at > since)
                    .map(|stone| json!({"_id": stone.entity_id}))
                    .collect()
            })
            .unwrap_or_default();

        Response::json(
            200,
            &json!({
                "changed": entities_value(changed),
                "deleted": deleted
            }),
        )
    }
}

impl HttpClient for TestServer {
    fn send(&self, request: &Request) -> NetResult<Response> {
        Ok(self.handle(request))
    }
}

// ---- helpers ----------------------------------------------------------

fn as_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn collection_entities(state: &ServerState, collection: &str) -> Vec<Entity> {
    state
        .collections
        .get(collection)
        .map(|rows| rows.iter().cloned().map(Entity::from_object).collect())
        .unwrap_or_default()
}

fn find_entity(state: &ServerState, collection: &str, id: &str) -> Option<Map<String, Value>> {
    state
        .collections
        .get(collection)?
        .iter()
        .find(|row| row.get("_id").and_then(Value::as_str) == Some(id))
        .cloned()
}

fn entities_value(entities: Vec<Entity>) -> Value {
    Value::Array(entities.into_iter().map(Entity::into_object).map(Value::Object).collect())
}

fn parse_query(params: &[(String, String)]) -> Result<Query, Response> {
    let lookup = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    let number = |name: &str| lookup(name).and_then(|v| v.parse::<u64>().ok());

    Query::from_wire(
        lookup("query"),
        lookup("sort"),
        lookup("fields"),
        number("skip"),
        number("limit"),
    )
    .map_err(|_| error_response(400, "IncompleteRequestBody", "malformed query"))
}

/// Reconstructs an [`Aggregation`] from the `_group` wire body by
/// recognizing the canned reduce functions.
fn parse_aggregation(body: &Value) -> Option<Aggregation> {
    let keys: Vec<String> = body.get("key")?.as_object()?.keys().cloned().collect();
    let reduce = body.get("reduce")?.as_str()?;
    let field = reduce
        .split_once("doc[\"")
        .and_then(|(_, rest)| rest.split_once("\"]"))
        .map(|(field, _)| field.to_string());

    let aggregation = if reduce.contains("Math.min") {
        Aggregation::min(keys, field?)
    } else if reduce.contains("Math.max") {
        Aggregation::max(keys, field?)
    } else if reduce.contains("out.count") && reduce.contains("out.result") {
        Aggregation::average(keys, field?)
    } else if reduce.contains("out.result +=") {
        Aggregation::sum(keys, field?)
    } else if reduce.contains("out.count += 1") {
        Aggregation::count(keys)
    } else {
        return None;
    };

    match body.get("condition") {
        Some(condition) => Filter::from_value(condition)
            .ok()
            .map(|filter| aggregation.condition(filter)),
        None => Some(aggregation),
    }
}

fn canonical_request_start() -> String {
    // "x-kinvey-request-start" in the casing real servers send.
    let mut out = String::new();
    let mut upper = true;
    for ch in headers::REQUEST_START.chars() {
        if ch == '-' {
            out.push('-');
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn split_url(url: &str) -> (String, Vec<(String, String)>) {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path_and_query = after_scheme
        .find('/')
        .map_or("/", |index| &after_scheme[index..]);
    let (path, query) = path_and_query
        .split_once('?')
        .map_or((path_and_query, ""), |(p, q)| (p, q));

    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((urldecode(name), urldecode(value)))
        })
        .collect();
    (path.to_string(), params)
}

fn urldecode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 3 <= bytes.len() {
            let hex = &raw[index + 1..index + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| raw.to_string())
}

fn error_response(status: u16, name: &str, description: &str) -> Response {
    Response::json(
        status,
        &json!({"error": name, "description": description}),
    )
}
