#![allow(clippy::unwrap_used)]
// Integration tests for `GatewayClient` using wiremock.

use serde_json::json;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zwaynet_api::{Error, GatewayClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, GatewayClient) {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&server.uri()).unwrap();
    let client = GatewayClient::with_client(reqwest::Client::new(), endpoint);
    (server, client)
}

// ── Data endpoint ───────────────────────────────────────────────────

#[tokio::test]
async fn fetch_full_snapshot_uses_zero_suffix() {
    let (server, client) = setup().await;

    let snapshot = json!({
        "devices": { "12": { "instances": {} } },
        "updateTime": 100
    });

    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
        .mount(&server)
        .await;

    let body = client.fetch(0).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["updateTime"], 100);
}

#[tokio::test]
async fn fetch_since_appends_timestamp_segment() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/1699999999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(client.fetch(1_699_999_999).await);
}

#[tokio::test]
async fn fetch_surfaces_gateway_error_with_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client.fetch(0).await.unwrap_err();
    match err {
        Error::Gateway { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected Gateway error, got: {other:?}"),
    }
    assert!(client.fetch(0).await.unwrap_err().is_transient());
}

// ── Run endpoint ────────────────────────────────────────────────────

#[tokio::test]
async fn execute_hits_run_path_with_command_expression() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Run/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .expect(1)
        .mount(&server)
        .await;

    let body = client
        .execute("devices[12].instances[0].commandClasses[38].Set(255)")
        .await
        .unwrap();
    assert_eq!(body, "null");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let url = requests[0].url.to_string();
    assert!(url.contains("Set"), "command missing from {url}");
}

#[tokio::test]
async fn ping_sends_no_operation_command() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Run/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .expect(1)
        .mount(&server)
        .await;

    client.ping(7).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.to_string().contains("SendNoOperation"));
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn basic_credentials_ride_on_every_request() {
    let server = MockServer::start().await;

    // base64("admin:secret")
    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = TransportConfig::default()
        .with_credentials("admin", "secret".to_string().into());
    let client = GatewayClient::new(Url::parse(&server.uri()).unwrap(), &transport).unwrap();

    client.fetch(0).await.unwrap();
}
