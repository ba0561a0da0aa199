//! The active-user session.

use crate::error::NetResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tidemark_persist::KeyValuePersister;

/// Reserved persister slot (suffix) holding the serialized active user.
///
/// This slot survives cache clears.
pub const ACTIVE_USER_SLOT: &str = "active_user";

/// The active user: the session whose token authenticates
/// [`crate::AuthScheme::Session`] requests. One per app key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveUser(Value);

impl ActiveUser {
    /// Wraps a user object received from the backend.
    #[must_use]
    pub fn new(user: Value) -> Self {
        Self(user)
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns the user id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    /// Returns the session token (`_kmd.authtoken`).
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.0
            .get("_kmd")
            .and_then(|kmd| kmd.get("authtoken"))
            .and_then(Value::as_str)
    }

    /// Returns the OAuth session envelope (`_socialIdentity.kinveyAuth`).
    #[must_use]
    pub fn oauth_session(&self) -> Option<&Value> {
        self.0
            .get("_socialIdentity")
            .and_then(|identity| identity.get("kinveyAuth"))
    }

    /// Returns the refresh token from the OAuth session.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.oauth_session()?.get("refresh_token")?.as_str()
    }

    /// Returns the OAuth client id recorded with the session, if any.
    #[must_use]
    pub fn oauth_client_id(&self) -> Option<&str> {
        self.oauth_session()?.get("client_id")?.as_str()
    }

    /// Replaces the OAuth session envelope.
    pub fn set_oauth_session(&mut self, session: Value) {
        if !self.0.is_object() {
            self.0 = Value::Object(serde_json::Map::new());
        }
        if let Some(object) = self.0.as_object_mut() {
            let identity = object
                .entry("_socialIdentity")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(identity) = identity.as_object_mut() {
                identity.insert("kinveyAuth".into(), session);
            }
        }
    }
}

/// Persisted storage of the active user, with session-expiry observers.
///
/// Stored under `<appKey>.active_user`. Cache clears preserve this slot.
pub struct ActiveUserStore {
    key: String,
    persister: Arc<dyn KeyValuePersister>,
    observers: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl ActiveUserStore {
    /// Creates a store for the given app key.
    pub fn new(app_key: &str, persister: Arc<dyn KeyValuePersister>) -> Self {
        Self {
            key: format!("{app_key}.{ACTIVE_USER_SLOT}"),
            persister,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Loads the active user, if one is stored.
    pub fn get(&self) -> NetResult<Option<ActiveUser>> {
        match self.persister.read(&self.key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores the active user.
    pub fn set(&self, user: &ActiveUser) -> NetResult<()> {
        let bytes = serde_json::to_vec(user)?;
        self.persister.write(&self.key, &bytes)?;
        Ok(())
    }

    /// Removes the active user. Returns true if one was stored.
    pub fn clear(&self) -> NetResult<bool> {
        Ok(self.persister.remove(&self.key)?)
    }

    /// Returns the current session token, if any.
    pub fn auth_token(&self) -> NetResult<Option<String>> {
        Ok(self
            .get()?
            .and_then(|user| user.auth_token().map(str::to_string)))
    }

    /// Registers a callback fired when a failed refresh invalidates the
    /// session.
    pub fn on_session_expired(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(observer));
    }

    /// Notifies every expiry observer.
    pub(crate) fn notify_expired(&self) {
        for observer in self.observers.lock().iter() {
            observer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tidemark_persist::MemoryPersister;

    fn user() -> ActiveUser {
        ActiveUser::new(json!({
            "_id": "user1",
            "_kmd": {"authtoken": "tok-1"},
            "_socialIdentity": {
                "kinveyAuth": {
                    "access_token": "at-1",
                    "refresh_token": "rt-1",
                    "client_id": "mic-client"
                }
            }
        }))
    }

    #[test]
    fn accessors() {
        let user = user();
        assert_eq!(user.id(), Some("user1"));
        assert_eq!(user.auth_token(), Some("tok-1"));
        assert_eq!(user.refresh_token(), Some("rt-1"));
        assert_eq!(user.oauth_client_id(), Some("mic-client"));
    }

    #[test]
    fn set_oauth_session_replaces_envelope() {
        let mut user = user();
        user.set_oauth_session(json!({"access_token": "at-2", "refresh_token": "rt-2"}));
        assert_eq!(user.refresh_token(), Some("rt-2"));
        assert_eq!(user.oauth_client_id(), None);
    }

    #[test]
    fn store_roundtrip() {
        let persister = Arc::new(MemoryPersister::new());
        let store = ActiveUserStore::new("app1", persister.clone());

        assert!(store.get().unwrap().is_none());
        store.set(&user()).unwrap();
        assert_eq!(store.get().unwrap(), Some(user()));
        assert_eq!(store.auth_token().unwrap(), Some("tok-1".to_string()));

        // Stored under the reserved slot for this app key.
        assert!(persister.read("app1.active_user").unwrap().is_some());

        assert!(store.clear().unwrap());
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn expiry_observers_fire() {
        let store = ActiveUserStore::new("app1", Arc::new(MemoryPersister::new()));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        store.on_session_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.notify_expired();
        store.notify_expired();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
