//! Key directory backed by a mocked GraphQL key authority.

use std::sync::Arc;
use std::time::Duration;

use gateproxy_auth::{DirectoryConfig, GraphQlKeyFetcher, KeyDirectory, KeyFetchError};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn keys_body(ids: &[&str]) -> serde_json::Value {
    let keys: Vec<_> = ids
        .iter()
        .map(|id| json!({ "id": id, "body": format!("PEM-{id}") }))
        .collect();
    json!({ "data": { "keys": keys } })
}

fn fetcher_for(server: &MockServer) -> Arc<GraphQlKeyFetcher> {
    let url = Url::parse(&format!("{}/graphql", server.uri())).unwrap();
    Arc::new(GraphQlKeyFetcher::new(url, Duration::from_secs(2)).unwrap())
}

#[tokio::test]
async fn test_unknown_kid_costs_one_authority_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys_body(&["A"])))
        .expect(2)
        .mount(&server)
        .await;

    let directory = KeyDirectory::connect(fetcher_for(&server), DirectoryConfig::default())
        .await
        .unwrap();

    assert!(directory.find_key_by_id("A").await.is_ok());
    assert!(directory.find_key_by_id("B").await.is_err());

    server.verify().await;
}

#[tokio::test]
async fn test_initial_fetch_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = KeyDirectory::connect(fetcher_for(&server), DirectoryConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, KeyFetchError::Status(500)));
}

#[tokio::test]
async fn test_slow_authority_hits_fetch_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(keys_body(&["A"]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = DirectoryConfig::new().with_fetch_timeout(Duration::from_millis(50));
    let err = KeyDirectory::connect(fetcher_for(&server), config)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyFetchError::Timeout(_)));
}

#[tokio::test]
async fn test_rotation_is_picked_up_on_miss() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys_body(&["A"])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys_body(&["B"])))
        .mount(&server)
        .await;

    let directory = KeyDirectory::connect(fetcher_for(&server), DirectoryConfig::default())
        .await
        .unwrap();

    let key = directory.find_key_by_id("B").await.unwrap();
    assert_eq!(key.pem_body, "PEM-B");
    // Rotation replaces the whole set.
    assert_eq!(directory.len(), 1);
}
