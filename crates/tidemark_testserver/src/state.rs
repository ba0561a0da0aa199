//! Server-side state: collections, the deletion journal, and the clock.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Epoch second the logical clock starts at.
const CLOCK_BASE: i64 = 1_700_000_000;

/// One deletion, for delta-set bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct Tombstone {
    pub entity_id: String,
    pub at: DateTime<Utc>,
}

/// Mutable server state behind the lock.
pub(crate) struct ServerState {
    /// Entities per backend collection.
    pub collections: HashMap<String, Vec<Map<String, Value>>>,
    /// Deletion journal per backend collection.
    pub tombstones: HashMap<String, Vec<Tombstone>>,
    /// Logical clock tick; one step per handled request.
    pub tick: i64,
    /// Sequence for server-assigned entity ids.
    pub next_entity_id: u64,
    /// Session tokens currently accepted.
    pub valid_tokens: HashSet<String>,
    /// Number of sessions issued so far (names the next token).
    pub sessions_issued: u64,
    /// Number of refresh POSTs observed.
    pub refresh_count: u64,
    /// When set, the next refresh fails with `InvalidGrant`.
    pub fail_refresh: bool,
    /// Collections with delta sync disabled.
    pub delta_disabled: HashSet<String>,
    /// When set, the next `_deltaset` is rejected as stale.
    pub reject_next_delta_set: bool,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            tombstones: HashMap::new(),
            tick: 0,
            next_entity_id: 1,
            valid_tokens: HashSet::new(),
            sessions_issued: 0,
            refresh_count: 0,
            fail_refresh: false,
            delta_disabled: HashSet::new(),
            reject_next_delta_set: false,
        }
    }

    /// Advances the clock and returns the current instant.
    pub fn step(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        self.now()
    }

    /// The current instant without advancing.
    pub fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(CLOCK_BASE + self.tick, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Mints a server-assigned 24-hex entity id.
    pub fn mint_entity_id(&mut self) -> String {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        format!("{id:024x}")
    }

    /// Stamps server metadata on an entity: `_id` when absent, and
    /// `_kmd.lmt`/`_kmd.ect` from the clock.
    pub fn stamp(&mut self, mut entity: Map<String, Value>, at: DateTime<Utc>) -> Map<String, Value> {
        if !entity.get("_id").map_or(false, Value::is_string) {
            let id = self.mint_entity_id();
            entity.insert("_id".into(), Value::String(id));
        }
        let stamp = format_instant(at);
        let kmd = entity
            .entry("_kmd")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(kmd) = kmd.as_object_mut() {
            kmd.remove("local");
            kmd.entry("ect".to_string())
                .or_insert_with(|| Value::String(stamp.clone()));
            kmd.insert("lmt".into(), Value::String(stamp));
        }
        entity
    }

    /// Records a deletion in the journal.
    pub fn bury(&mut self, collection: &str, entity_id: String, at: DateTime<Utc>) {
        self.tombstones
            .entry(collection.to_string())
            .or_default()
            .push(Tombstone { entity_id, at });
    }

    /// The last-modified instant of an entity, when stamped.
    pub fn modified_at(entity: &Map<String, Value>) -> Option<DateTime<Utc>> {
        let lmt = entity.get("_kmd")?.get("lmt")?.as_str()?;
        parse_instant(lmt)
    }
}

/// Formats an instant the way the backend's headers and `_kmd` do.
pub(crate) fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an instant from headers, `_kmd` or the `since` parameter.
pub(crate) fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
