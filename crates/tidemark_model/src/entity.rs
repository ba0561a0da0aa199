//! The entity model.

use crate::error::{ModelError, ModelResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

/// Alias for an open JSON object.
pub type JsonObject = serde_json::Map<String, Value>;

/// Length of an entity id in characters (hex-encoded 12 bytes).
pub const ENTITY_ID_LEN: usize = 24;

/// An entity: an open JSON object with reserved metadata envelopes.
///
/// The store is schema-agnostic. Only three members are interpreted:
/// - `_id`: required string identity (24 hex characters)
/// - `_kmd`: server-set metadata (`lmt`, `ect`, `authtoken`), plus
///   `local: true` on client-originated entities not yet pushed
/// - `_acl`: access control, opaque except for `creator`
///
/// Everything else passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(JsonObject);

impl Entity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new() -> Self {
        Self(JsonObject::new())
    }

    /// Wraps an existing JSON object.
    #[must_use]
    pub fn from_object(object: JsonObject) -> Self {
        Self(object)
    }

    /// Converts a JSON value into an entity.
    ///
    /// Fails unless the value is a JSON object.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Object(object) => Ok(Self(object)),
            other => Err(ModelError::invalid_entity(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Returns the underlying object.
    #[must_use]
    pub fn as_object(&self) -> &JsonObject {
        &self.0
    }

    /// Consumes the entity, returning the underlying object.
    #[must_use]
    pub fn into_object(self) -> JsonObject {
        self.0
    }

    /// Returns the entity as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Reads a member by dotted path (`"author.name"`).
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current: &Value = self.0.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Sets a top-level member.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Returns the entity id, if present.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    /// Sets the entity id.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert("_id".into(), Value::String(id.into()));
    }

    /// Returns the id, minting a local one first if absent.
    pub fn ensure_id(&mut self) -> String {
        if let Some(id) = self.id() {
            return id.to_string();
        }
        let id = mint_id();
        self.set_id(id.clone());
        id
    }

    /// Returns true if the entity carries the local-origin marker
    /// (`_kmd.local == true`).
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.get("_kmd.local").and_then(Value::as_bool) == Some(true)
    }

    /// Stamps `_kmd.local = true`, preserving other `_kmd` members.
    pub fn mark_local(&mut self) {
        let kmd = self
            .0
            .entry("_kmd")
            .or_insert_with(|| Value::Object(JsonObject::new()));
        if let Value::Object(kmd) = kmd {
            kmd.insert("local".into(), Value::Bool(true));
        }
    }

    /// Strips the markers of a locally-minted entity before a create push:
    /// the client-side `_id` and `_kmd.local` (removing `_kmd` entirely
    /// when nothing else is in it).
    pub fn strip_local_markers(&mut self) {
        self.0.remove("_id");
        let drop_kmd = match self.0.get_mut("_kmd") {
            Some(Value::Object(kmd)) => {
                kmd.remove("local");
                kmd.is_empty()
            }
            _ => false,
        };
        if drop_kmd {
            self.0.remove("_kmd");
        }
    }

    /// Returns the `_acl.creator` member, if present.
    #[must_use]
    pub fn creator(&self) -> Option<&str> {
        self.get("_acl.creator").and_then(Value::as_str)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl From<JsonObject> for Entity {
    fn from(object: JsonObject) -> Self {
        Self(object)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Object(entity.0)
    }
}

/// Mints a 24-hex-character entity id for offline-created entities.
///
/// Ids minted here are replaced by the server-assigned id when the
/// corresponding create is pushed.
#[must_use]
pub fn mint_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(ENTITY_ID_LEN);
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    id
}
