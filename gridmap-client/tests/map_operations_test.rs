//! Integration tests for NamedMap unary operations against the loopback
//! server.

mod common;

use common::TestServer;
use gridmap_client::{Aggregator, Filter, GridError, NamedMap, Processor};

async fn server_and_map() -> (TestServer, gridmap_client::Session, NamedMap<String, i64>) {
    let server = TestServer::spawn().await;
    let session = server.connect().await;
    let map = session.get_map::<String, i64>("orders");
    (server, session, map)
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let (_server, _session, map) = server_and_map().await;

    assert_eq!(map.put(&"k1".to_string(), &1).await.unwrap(), None);
    assert_eq!(map.get(&"k1".to_string()).await.unwrap(), Some(1));
    assert_eq!(map.put(&"k1".to_string(), &2).await.unwrap(), Some(1));
    assert_eq!(map.get(&"k1".to_string()).await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_get_missing_key_is_none() {
    let (_server, _session, map) = server_and_map().await;
    assert_eq!(map.get(&"absent".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_returns_prior_value() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &7).await.unwrap();
    assert_eq!(map.remove(&"k1".to_string()).await.unwrap(), Some(7));
    assert_eq!(map.remove(&"k1".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_mapping_requires_exact_value() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &7).await.unwrap();
    assert!(!map.remove_mapping(&"k1".to_string(), &8).await.unwrap());
    assert!(map.contains_key(&"k1".to_string()).await.unwrap());
    assert!(map.remove_mapping(&"k1".to_string(), &7).await.unwrap());
    assert!(!map.contains_key(&"k1".to_string()).await.unwrap());
}

#[tokio::test]
async fn test_size_and_is_empty() {
    let (_server, _session, map) = server_and_map().await;

    assert!(map.is_empty().await.unwrap());
    map.put(&"k1".to_string(), &1).await.unwrap();
    map.put(&"k2".to_string(), &2).await.unwrap();
    assert_eq!(map.size().await.unwrap(), 2);
    assert!(!map.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.clear().await.unwrap();
    assert!(map.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_truncate_removes_everything() {
    let (server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.truncate().await.unwrap();
    assert_eq!(server.store_len(), 0);
}

#[tokio::test]
async fn test_invoke_returns_processor_result() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &42).await.unwrap();
    let result: Option<i64> = map
        .invoke(&"k1".to_string(), &Processor::named("echo", serde_json::Value::Null))
        .await
        .unwrap();
    assert_eq!(result, Some(42));
}

#[tokio::test]
async fn test_invoke_all_over_keys() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.put(&"k2".to_string(), &2).await.unwrap();
    map.put(&"k3".to_string(), &3).await.unwrap();

    let results: Vec<(String, i64)> = map
        .invoke_all_keys(
            &["k1".to_string(), "k3".to_string()],
            &Processor::named("echo", serde_json::Value::Null),
        )
        .await
        .unwrap();
    assert_eq!(
        results,
        vec![("k1".to_string(), 1), ("k3".to_string(), 3)]
    );
}

#[tokio::test]
async fn test_aggregate_returns_value() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.put(&"k2".to_string(), &2).await.unwrap();

    let count: Option<i64> = map.aggregate(None, &Aggregator::count()).await.unwrap();
    assert_eq!(count, Some(2));
}

#[tokio::test]
async fn test_filtered_queries_stream_to_completion() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.put(&"k2".to_string(), &2).await.unwrap();

    let values = map.values_with(&Filter::always()).await.unwrap();
    assert_eq!(values, vec![1, 2]);

    let entries = map.entries_with(&Filter::always()).await.unwrap();
    assert_eq!(
        entries,
        vec![("k1".to_string(), 1), ("k2".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_destroy_releases_the_map() {
    let (_server, _session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    map.destroy().await.unwrap();
    assert!(map.is_released());

    let err = map.get(&"k1".to_string()).await.unwrap_err();
    assert!(matches!(err, GridError::IllegalState(_)));
}

#[tokio::test]
async fn test_operations_fail_after_session_close() {
    let (_server, session, map) = server_and_map().await;

    map.put(&"k1".to_string(), &1).await.unwrap();
    session.close();
    assert!(session.is_closed());

    let err = map.get(&"k1".to_string()).await.unwrap_err();
    assert!(matches!(err, GridError::IllegalState(_)));
}

#[tokio::test]
async fn test_clones_share_released_state() {
    let (_server, _session, map) = server_and_map().await;

    let other = map.clone();
    map.destroy().await.unwrap();
    assert!(other.is_released());
}
