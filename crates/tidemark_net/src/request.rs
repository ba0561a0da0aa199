//! The authenticated request executor.
//!
//! Owns header assembly, timeouts, response→error mapping, and the
//! single-flight token refresh triggered by a 401.

use crate::auth::{AppCredentials, AuthScheme};
use crate::error::{map_error_response, NetError, NetResult};
use crate::http::{headers, HttpClient, Method, Request, Response};
use crate::session::{ActiveUser, ActiveUserStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on the serialized custom request properties header.
pub const MAX_CUSTOM_PROPERTIES_BYTES: usize = 2000;

const API_VERSION: &str = "4";

/// Static configuration for the request layer.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Base URL of the data API (no trailing slash).
    pub api_host: String,
    /// Base URL of the OAuth token endpoint host.
    pub auth_host: String,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Serialized custom request properties, forwarded on every request.
    pub custom_properties: Option<String>,
    /// Client application version, forwarded for server-side hooks.
    pub client_app_version: Option<String>,
}

impl NetConfig {
    /// Creates a configuration with the given hosts.
    pub fn new(api_host: impl Into<String>, auth_host: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into(),
            auth_host: auth_host.into(),
            timeout: Duration::from_secs(60),
            custom_properties: None,
            client_app_version: None,
        }
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the custom request properties from a JSON object.
    #[must_use]
    pub fn with_custom_properties(mut self, properties: &Value) -> Self {
        self.custom_properties = Some(properties.to_string());
        self
    }

    /// Sets the client app version header value.
    #[must_use]
    pub fn with_client_app_version(mut self, version: impl Into<String>) -> Self {
        self.client_app_version = Some(version.into());
        self
    }

    fn validate(&self) -> NetResult<()> {
        if let Some(properties) = &self.custom_properties {
            if properties.len() >= MAX_CUSTOM_PROPERTIES_BYTES {
                return Err(NetError::invalid_argument(format!(
                    "custom request properties are {} bytes; limit is {}",
                    properties.len(),
                    MAX_CUSTOM_PROPERTIES_BYTES
                )));
            }
        }
        Ok(())
    }
}

/// A request against the backend API, before URL and header assembly.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the API host, starting with `/`.
    pub path: String,
    /// Query parameters (unencoded).
    pub query: Vec<(String, String)>,
    /// Auth scheme.
    pub auth: AuthScheme,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Creates a request with [`AuthScheme::Default`].
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            auth: AuthScheme::Default,
            body: None,
            timeout: None,
        }
    }

    /// Sets the auth scheme.
    #[must_use]
    pub fn auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Appends several query parameters.
    #[must_use]
    pub fn params(mut self, params: Vec<(String, String)>) -> Self {
        self.query.extend(params);
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Overrides the timeout for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes [`ApiRequest`]s with credentials attached.
///
/// A 401 on a session-authenticated request triggers the refresh flow:
/// the process-wide gate pauses all further requests, one refresh POST
/// goes to the token endpoint, the active user is re-logged-in, and the
/// original request is re-executed exactly once. Requests that already
/// consumed their retry map a second 401 straight to
/// [`NetError::InvalidCredentials`].
pub struct RequestExecutor {
    config: NetConfig,
    credentials: AppCredentials,
    client: Arc<dyn HttpClient>,
    session: Arc<ActiveUserStore>,
    refresh_gate: Mutex<()>,
}

impl RequestExecutor {
    /// Creates an executor. Fails if the configuration is invalid
    /// (oversized custom request properties).
    pub fn new(
        config: NetConfig,
        credentials: AppCredentials,
        client: Arc<dyn HttpClient>,
        session: Arc<ActiveUserStore>,
    ) -> NetResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            credentials,
            client,
            session,
            refresh_gate: Mutex::new(()),
        })
    }

    /// Returns the app key these requests identify as.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.credentials.app_key
    }

    /// Returns the session store.
    #[must_use]
    pub fn session(&self) -> &Arc<ActiveUserStore> {
        &self.session
    }

    /// Executes a request, refreshing the session once on a 401.
    pub fn execute(&self, request: &ApiRequest) -> NetResult<Response> {
        // Wait out any refresh in flight before attaching credentials.
        drop(self.refresh_gate.lock());

        let session_token = if request.auth.prefers_session() {
            self.session.auth_token()?
        } else {
            None
        };

        let response = self.send_once(request, session_token.as_deref())?;
        if response.status == 401 {
            if let Some(used_token) = session_token {
                return self.refresh_and_retry(request, &used_token);
            }
        }
        finish(response)
    }

    /// Executes a request and parses the body as JSON.
    pub fn execute_json(&self, request: &ApiRequest) -> NetResult<Value> {
        self.execute(request)?.json_body()
    }

    /// Assembles and sends the request once; transport errors propagate,
    /// HTTP statuses do not.
    fn send_once(&self, request: &ApiRequest, session_token: Option<&str>) -> NetResult<Response> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json; charset=utf-8".to_string()),
            (canonical(headers::API_VERSION), API_VERSION.to_string()),
        ];
        if request.body.is_some() {
            headers.push((
                "Content-Type".to_string(),
                "application/json; charset=utf-8".to_string(),
            ));
        }
        if let Some(version) = &self.config.client_app_version {
            headers.push((canonical(headers::CLIENT_APP_VERSION), version.clone()));
        }
        if let Some(properties) = &self.config.custom_properties {
            headers.push((
                canonical(headers::CUSTOM_REQUEST_PROPERTIES),
                properties.clone(),
            ));
        }
        if let Some(authorization) = self.authorization(request.auth, session_token)? {
            headers.push(("Authorization".to_string(), authorization));
        }

        let assembled = Request {
            method: request.method,
            url: format!(
                "{}{}{}",
                self.config.api_host,
                request.path,
                query_string(&request.query)
            ),
            headers,
            body: request
                .body
                .as_ref()
                .map(|body| serde_json::to_vec(body))
                .transpose()?,
            timeout: request.timeout.unwrap_or(self.config.timeout),
        };

        debug!(method = assembled.method.as_str(), url = %assembled.url, "dispatching request");
        self.client.send(&assembled)
    }

    /// Renders the `Authorization` header for the scheme.
    fn authorization(
        &self,
        auth: AuthScheme,
        session_token: Option<&str>,
    ) -> NetResult<Option<String>> {
        let session = || session_token.map(|token| format!("Kinvey {token}"));
        Ok(match auth {
            AuthScheme::None => None,
            AuthScheme::App | AuthScheme::Basic => Some(self.credentials.app_authorization()),
            AuthScheme::Client => Some(self.credentials.client_authorization()),
            AuthScheme::Master => Some(
                self.credentials
                    .master_authorization()
                    .ok_or_else(|| NetError::invalid_argument("master secret not configured"))?,
            ),
            AuthScheme::Session => Some(session().ok_or(NetError::NoActiveUser)?),
            AuthScheme::Default => match session() {
                Some(header) => Some(header),
                None => Some(
                    self.credentials
                        .master_authorization()
                        .ok_or(NetError::NoActiveUser)?,
                ),
            },
            AuthScheme::All => {
                Some(session().unwrap_or_else(|| self.credentials.app_authorization()))
            }
        })
    }

    /// Single-flight refresh: the first 401 holder performs the refresh,
    /// everyone else re-sends with the token it produced.
    fn refresh_and_retry(&self, request: &ApiRequest, used_token: &str) -> NetResult<Response> {
        let _gate = self.refresh_gate.lock();

        if let Some(current) = self.session.auth_token()? {
            if current != used_token {
                // Another request already refreshed the session.
                let response = self.send_once(request, Some(&current))?;
                return finish(response);
            }
        }

        match self.refresh_session() {
            Ok(token) => {
                let response = self.send_once(request, Some(&token))?;
                finish(response)
            }
            Err(error) => {
                warn!(%error, "session refresh failed; logging out active user");
                let _ = self.session.clear();
                self.session.notify_expired();
                Err(NetError::InvalidCredentials)
            }
        }
    }

    /// Exchanges the stored refresh token for a new session.
    ///
    /// Returns the new session auth token.
    fn refresh_session(&self) -> NetResult<String> {
        let user = self.session.get()?.ok_or(NetError::NoActiveUser)?;
        let mut oauth = user
            .oauth_session()
            .cloned()
            .ok_or(NetError::InvalidCredentials)?;
        let refresh_token = user
            .refresh_token()
            .ok_or(NetError::InvalidCredentials)?
            .to_string();
        let client_id = user
            .oauth_client_id()
            .unwrap_or_else(|| self.credentials.effective_client_id())
            .to_string();

        let form = format!(
            "grant_type=refresh_token&client_id={}&refresh_token={}",
            urlencode(&client_id),
            urlencode(&refresh_token)
        );
        let token_request = Request {
            method: Method::Post,
            url: format!("{}/oauth/token", self.config.auth_host),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                (
                    "Authorization".to_string(),
                    self.credentials.client_authorization_for(&client_id),
                ),
            ],
            body: Some(form.into_bytes()),
            timeout: self.config.timeout,
        };
        let response = self.client.send(&token_request)?;
        if !response.is_success() {
            return Err(map_error_response(response.status, &response.body));
        }
        let tokens = response.json_body()?;

        // Carry the fresh token pair into the stored OAuth session.
        if let Some(envelope) = oauth.as_object_mut() {
            if let Some(access) = tokens.get("access_token") {
                envelope.insert("access_token".into(), access.clone());
            }
            if let Some(refresh) = tokens.get("refresh_token") {
                envelope.insert("refresh_token".into(), refresh.clone());
            }
        }

        // Re-login to obtain a fresh session token for the user.
        let login = ApiRequest::new(
            Method::Post,
            format!("/user/{}/login", self.credentials.app_key),
        )
        .auth(AuthScheme::App)
        .body(json!({"_socialIdentity": {"kinveyAuth": oauth.clone()}}));
        let response = finish(self.send_once(&login, None)?)?;

        let mut refreshed = ActiveUser::new(response.json_body()?);
        refreshed.set_oauth_session(oauth);
        self.session.set(&refreshed)?;

        refreshed
            .auth_token()
            .map(str::to_string)
            .ok_or(NetError::InvalidCredentials)
    }
}

/// Maps a terminal response to `Ok` or a typed error.
fn finish(response: Response) -> NetResult<Response> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(map_error_response(response.status, &response.body))
    }
}

fn canonical(lower: &str) -> String {
    // Render a lower-cased header name in canonical dashed casing.
    let mut out = String::with_capacity(lower.len());
    let mut upper_next = true;
    for ch in lower.chars() {
        if ch == '-' {
            out.push('-');
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Percent-encodes a query-string component.
pub(crate) fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

fn query_string(params: &[(String, String)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut out = String::from("?");
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(&urlencode(name));
        out.push('=');
        out.push_str(&urlencode(value));
    }
    out
}
