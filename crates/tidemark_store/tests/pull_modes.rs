//! Integration tests for the pull pipeline: delta-set, fallbacks,
//! auto-pagination and cache clearing.

use serde_json::json;
use std::sync::Arc;
use tidemark_persist::MemoryPersister;
use tidemark_store::{Client, ClientConfig, DataStore, Query, StoreMode, StoreOptions};
use tidemark_testserver::TestServer;

fn harness(options: StoreOptions) -> (Arc<TestServer>, Client, DataStore) {
    let server = Arc::new(TestServer::new("app1"));
    let client = Client::new(
        ClientConfig::new("app1", "secret")
            .with_master_secret("master")
            .with_api_host("https://baas.test")
            .with_auth_host("https://auth.test"),
        Arc::new(MemoryPersister::new()),
        server.clone(),
    )
    .unwrap();
    let store = client
        .collection("books", StoreMode::Cache, options)
        .unwrap();
    (server, client, store)
}

fn cached_ids(store: &DataStore) -> Vec<String> {
    let mut ids: Vec<String> = store
        .find(None)
        .next()
        .unwrap()
        .unwrap()
        .iter()
        .filter_map(|entity| entity.id().map(str::to_string))
        .collect();
    ids.sort();
    ids
}

#[test]
fn delta_set_pull_applies_server_changes_incrementally() {
    let (server, client, store) = harness(StoreOptions::new().with_delta_set());
    let one = server.insert("books", json!({"_id": "a".repeat(24), "title": "one"}));
    let two = server.insert("books", json!({"_id": "b".repeat(24), "title": "two"}));

    // First pull: a full fetch that records the high-water mark.
    assert_eq!(store.pull(None).unwrap(), 2);
    assert!(client
        .query_cache()
        .get("books", &Query::new().canonical())
        .unwrap()
        .is_some());

    // Server-side churn: delete `two`, add `three`.
    server.erase("books", &two);
    let three = server.insert("books", json!({"_id": "c".repeat(24), "title": "three"}));

    // Second pull goes through `_deltaset` and returns only the changes.
    assert_eq!(store.pull(None).unwrap(), 1);
    let requests = server.requests();
    assert!(requests.last().unwrap().path.ends_with("/_deltaset"));
    assert!(requests.last().unwrap().param("since").is_some());

    let mut expected = vec![one, three];
    expected.sort();
    assert_eq!(cached_ids(&store), expected);
}

#[test]
fn rejected_since_token_falls_back_and_then_resumes_delta() {
    let (server, _client, store) = harness(StoreOptions::new().with_delta_set());
    server.insert("books", json!({"title": "one"}));

    assert_eq!(store.pull(None).unwrap(), 1);

    // The server refuses the next since token; the pull silently retries
    // as a full fetch.
    server.insert("books", json!({"title": "two"}));
    server.reject_next_delta_set();
    assert_eq!(store.pull(None).unwrap(), 2);

    let paths: Vec<String> = server.requests().iter().map(|r| r.path.clone()).collect();
    let delta_requests = paths.iter().filter(|p| p.ends_with("/_deltaset")).count();
    assert_eq!(delta_requests, 1);

    // The fallback re-seeded the high-water mark: delta sync resumes.
    server.insert("books", json!({"title": "three"}));
    assert_eq!(store.pull(None).unwrap(), 1);
    assert!(server.requests().last().unwrap().path.ends_with("/_deltaset"));
    assert_eq!(store.find(None).next().unwrap().unwrap().len(), 3);
}

#[test]
fn unconfigured_delta_set_falls_back_to_a_full_pull() {
    let (server, _client, store) = harness(StoreOptions::new().with_delta_set());
    server.disable_delta_set("books");
    server.insert("books", json!({"title": "one"}));

    assert_eq!(store.pull(None).unwrap(), 1);
    server.insert("books", json!({"title": "two"}));
    assert_eq!(store.pull(None).unwrap(), 2);
    assert_eq!(store.find(None).next().unwrap().unwrap().len(), 2);
}

#[test]
fn bounded_pull_leaves_entities_outside_the_window_alone() {
    let (server, _client, store) = harness(StoreOptions::new());
    for n in 0..3 {
        server.insert("books", json!({"title": format!("b{n}"), "n": n}));
    }
    assert_eq!(store.pull(None).unwrap(), 3);

    // The server shrinks; a bounded pull must not reap the rest.
    let query = Query::new().ascending("n").limit(1);
    assert_eq!(store.pull(Some(&query)).unwrap(), 1);
    assert_eq!(store.find(None).next().unwrap().unwrap().len(), 3);
}

#[test]
fn auto_pagination_pulls_the_collection_in_pages() {
    let (server, client, store) = harness(StoreOptions::new().with_auto_pagination(Some(2)));
    for n in 0..5 {
        server.insert("books", json!({"title": format!("b{n}"), "n": n}));
    }

    assert_eq!(store.pull(None).unwrap(), 5);
    assert_eq!(store.find(None).next().unwrap().unwrap().len(), 5);

    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].path.ends_with("/_count"));
    for page in &requests[1..] {
        assert_eq!(page.param("limit"), Some("2"));
        // A stable sort is injected so pages do not interleave.
        assert_eq!(page.param("sort"), Some(r#"{"_id":1}"#));
    }
    // Page requests run concurrently; order by window instead of arrival.
    let mut skips: Vec<u64> = requests[1..]
        .iter()
        .filter_map(|r| r.param("skip").and_then(|s| s.parse().ok()))
        .collect();
    skips.sort_unstable();
    assert_eq!(skips, vec![0, 2, 4]);

    // The high-water mark comes from the count request.
    assert!(client
        .query_cache()
        .get("books", &Query::new().canonical())
        .unwrap()
        .is_some());
}

#[test]
fn clear_cache_forces_the_next_delta_pull_to_full_fetch() {
    let (server, client, store) = harness(StoreOptions::new().with_delta_set());
    server.insert("books", json!({"title": "one"}));
    assert_eq!(store.pull(None).unwrap(), 1);

    client.clear_cache().unwrap();
    assert!(store.find(None).next().unwrap().unwrap().is_empty());
    assert!(client
        .query_cache()
        .get("books", &Query::new().canonical())
        .unwrap()
        .is_none());

    assert_eq!(store.pull(None).unwrap(), 1);
    assert!(!server.requests().last().unwrap().path.ends_with("/_deltaset"));
    assert_eq!(store.find(None).next().unwrap().unwrap().len(), 1);
}

#[test]
fn cache_mode_find_emits_cache_then_network_against_a_live_server() {
    let (server, _client, store) = harness(StoreOptions::new());
    server.insert("books", json!({"title": "server-side"}));

    // Cold cache: first value empty, second value from the network.
    let values: Vec<_> = store.find(None).collect();
    assert_eq!(values.len(), 2);
    assert!(values[0].as_ref().unwrap().is_empty());
    assert_eq!(values[1].as_ref().unwrap().len(), 1);

    // Warm cache: the first value now carries the entity.
    let values: Vec<_> = store.find(None).collect();
    assert_eq!(values[0].as_ref().unwrap().len(), 1);
}

#[test]
fn tagged_stores_pull_into_independent_caches() {
    let server = Arc::new(TestServer::new("app1"));
    let client = Client::new(
        ClientConfig::new("app1", "secret")
            .with_master_secret("master")
            .with_api_host("https://baas.test")
            .with_auth_host("https://auth.test"),
        Arc::new(MemoryPersister::new()),
        server.clone(),
    )
    .unwrap();
    server.insert("books", json!({"title": "one"}));

    let tagged = client
        .collection(
            "books",
            StoreMode::Cache,
            StoreOptions::new().with_tag("draft"),
        )
        .unwrap();
    let untagged = client
        .collection("books", StoreMode::Cache, StoreOptions::new())
        .unwrap();

    assert_eq!(tagged.pull(None).unwrap(), 1);
    assert_eq!(tagged.find(None).next().unwrap().unwrap().len(), 1);
    assert!(untagged.find(None).next().unwrap().unwrap().is_empty());
}
