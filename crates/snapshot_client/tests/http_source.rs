//! HTTP source behaviour against a mock snapshot host.

use common::config::SourceConfig;
use common::{Error, LocationKey};
use serde_json::json;
use snapshot_client::{try_candidates, SnapshotClient, SnapshotSource};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SnapshotClient {
    let config = SourceConfig {
        base_url: server.uri(),
        requests_per_second: 1000,
        ..SourceConfig::default()
    };
    SnapshotClient::new(&config).expect("client should build")
}

fn collection(n: usize) -> serde_json::Value {
    let features: Vec<_> = (0..n)
        .map(|i| {
            json!({
                "type": "Feature",
                "properties": {"address": format!("{} Example St", i + 1), "tech": "FTTP"},
                "geometry": {"type": "Point", "coordinates": [153.0, -27.0]}
            })
        })
        .collect();
    json!({"type": "FeatureCollection", "generated": "2024-05-01T00:00:00Z", "features": features})
}

#[tokio::test]
async fn test_fetch_parses_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/QLD/chermside.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection(3)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let snapshot = client.fetch("QLD/chermside.geojson").await.unwrap();

    assert_eq!(snapshot.collection.len(), 3);
    assert_eq!(snapshot.url, format!("{}/QLD/chermside.geojson", server.uri()));
    assert_eq!(
        snapshot.collection.generated_at.as_deref(),
        Some("2024-05-01T00:00:00Z")
    );
}

#[tokio::test]
async fn test_fetch_reports_status_and_parse_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/QLD/broken.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let missing = client.fetch("QLD/missing.geojson").await.unwrap_err();
    assert!(matches!(missing, Error::Status { status: 404, .. }));

    let broken = client.fetch("QLD/broken.geojson").await.unwrap_err();
    assert!(matches!(broken, Error::Parse { .. }));
    assert!(broken.is_candidate_failure());
}

#[tokio::test]
async fn test_falls_through_to_later_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/QLD/fortitude-valley.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"features\": oops"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/QLD/fortitude_valley.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection(2)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let key = LocationKey::resolve("Fortitude Valley", "QLD");
    let paths = client.candidates("Fortitude Valley", "QLD");

    let snapshot = try_candidates(&client, &key, &paths).await.unwrap();
    assert!(snapshot.url.ends_with("/QLD/fortitude_valley.geojson"));
    assert_eq!(snapshot.collection.len(), 2);
}

#[tokio::test]
async fn test_all_candidates_fail() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = LocationKey::resolve("Nowhere Town", "NT");
    let paths = client.candidates("Nowhere Town", "NT");

    let err = try_candidates(&client, &key, &paths).await.unwrap_err();
    match err {
        Error::LookupExhausted { attempts, last, .. } => {
            assert_eq!(attempts, paths.len());
            assert!(matches!(*last, Error::Status { status: 404, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fetches_beyond_the_rate_are_paced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/QLD/chermside.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection(1)))
        .expect(2)
        .mount(&server)
        .await;

    let config = SourceConfig {
        base_url: server.uri(),
        requests_per_second: 1,
        ..SourceConfig::default()
    };
    let client = SnapshotClient::new(&config).unwrap();

    let started = std::time::Instant::now();
    client.fetch("QLD/chermside.geojson").await.unwrap();
    client.fetch("QLD/chermside.geojson").await.unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_millis(500));
}
