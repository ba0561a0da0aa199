//! Auth schemes and credential rendering.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// How a request authenticates against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Session auth when an active user exists, app secret otherwise.
    All,
    /// App secret (`Basic appKey:appSecret`).
    App,
    /// Alias for app-secret auth.
    Basic,
    /// OAuth client credentials (`Basic clientId:appSecret`).
    Client,
    /// Session auth when an active user exists, master secret otherwise.
    Default,
    /// Master secret (`Basic appKey:masterSecret`).
    Master,
    /// No `Authorization` header.
    None,
    /// The active user's session token (`Kinvey <authtoken>`).
    Session,
}

impl AuthScheme {
    /// Returns true if this scheme attaches a session token when an
    /// active user is present.
    #[must_use]
    pub fn prefers_session(self) -> bool {
        matches!(self, AuthScheme::All | AuthScheme::Default | AuthScheme::Session)
    }
}

/// Tenant credentials identifying the application.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    /// The app key.
    pub app_key: String,
    /// The app secret, for client-grade operations.
    pub app_secret: String,
    /// The master secret, for elevated operations.
    pub master_secret: Option<String>,
    /// OAuth client id; defaults to the app key when absent.
    pub client_id: Option<String>,
}

impl AppCredentials {
    /// Creates credentials from an app key and secret.
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            master_secret: None,
            client_id: None,
        }
    }

    /// Sets the master secret.
    #[must_use]
    pub fn with_master_secret(mut self, secret: impl Into<String>) -> Self {
        self.master_secret = Some(secret.into());
        self
    }

    /// Sets the OAuth client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Returns the effective OAuth client id.
    #[must_use]
    pub fn effective_client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.app_key)
    }

    /// Renders `Basic appKey:appSecret`.
    #[must_use]
    pub fn app_authorization(&self) -> String {
        basic(&self.app_key, &self.app_secret)
    }

    /// Renders `Basic appKey:masterSecret`, if a master secret is set.
    #[must_use]
    pub fn master_authorization(&self) -> Option<String> {
        self.master_secret
            .as_deref()
            .map(|secret| basic(&self.app_key, secret))
    }

    /// Renders `Basic clientId:appSecret`.
    #[must_use]
    pub fn client_authorization(&self) -> String {
        self.client_authorization_for(self.effective_client_id())
    }

    /// Renders `Basic <clientId>:appSecret` for a specific client id,
    /// e.g. the one recorded with an OAuth session.
    #[must_use]
    pub fn client_authorization_for(&self, client_id: &str) -> String {
        basic(client_id, &self.app_secret)
    }
}

fn basic(id: &str, secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{id}:{secret}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_authorization_encodes_key_and_secret() {
        let creds = AppCredentials::new("kid_123", "secret");
        assert_eq!(
            creds.app_authorization(),
            format!("Basic {}", BASE64.encode("kid_123:secret"))
        );
    }

    #[test]
    fn master_authorization_requires_master_secret() {
        let creds = AppCredentials::new("kid_123", "secret");
        assert_eq!(creds.master_authorization(), None);

        let creds = creds.with_master_secret("master");
        assert_eq!(
            creds.master_authorization(),
            Some(format!("Basic {}", BASE64.encode("kid_123:master")))
        );
    }

    #[test]
    fn client_id_falls_back_to_app_key() {
        let creds = AppCredentials::new("kid_123", "secret");
        assert_eq!(creds.effective_client_id(), "kid_123");

        let creds = creds.with_client_id("mic-client");
        assert_eq!(creds.effective_client_id(), "mic-client");
        assert_eq!(
            creds.client_authorization(),
            format!("Basic {}", BASE64.encode("mic-client:secret"))
        );
    }

    #[test]
    fn session_preference() {
        assert!(AuthScheme::Session.prefers_session());
        assert!(AuthScheme::Default.prefers_session());
        assert!(AuthScheme::All.prefers_session());
        assert!(!AuthScheme::App.prefers_session());
        assert!(!AuthScheme::Master.prefers_session());
        assert!(!AuthScheme::None.prefers_session());
    }
}
