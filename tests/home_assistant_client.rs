//! Home Assistant REST client tests against a mocked server.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_live::{ControlPlane, ControlPlaneError, HomeAssistantClient, HomeAssistantConfig, ServiceCall};

fn client_for(server: &MockServer) -> HomeAssistantClient {
    HomeAssistantClient::new(HomeAssistantConfig {
        base_url: Url::parse(&server.uri()).unwrap(),
        token: Some("test-token".to_string()),
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn turn_on(entity_id: &str) -> ServiceCall {
    ServiceCall {
        domain: "light".to_string(),
        service: "turn_on".to_string(),
        entity_id: entity_id.to_string(),
        service_data: Some(json!({ "brightness_pct": 40 })),
    }
}

#[tokio::test]
async fn test_call_service_posts_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "entity_id": "light.kitchen",
            "brightness_pct": 40
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "entity_id": "light.kitchen", "state": "on" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server)
        .call_service(&turn_on("light.kitchen"))
        .await
        .unwrap();

    assert_eq!(result[0]["state"], "on");
}

#[tokio::test]
async fn test_call_service_empty_body_is_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .call_service(&turn_on("light.kitchen"))
        .await
        .unwrap();

    assert_eq!(result, json!([]));
}

#[tokio::test]
async fn test_call_service_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .respond_with(ResponseTemplate::new(401).set_body_string("401: Unauthorized"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call_service(&turn_on("light.kitchen"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ControlPlaneError::Status {
            status: 401,
            message: "401: Unauthorized".to_string(),
        }
    );
}

#[tokio::test]
async fn test_get_state_parses_entity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/sensor.temperature"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity_id": "sensor.temperature",
            "state": "21.5",
            "attributes": { "unit_of_measurement": "°C" },
            "last_changed": "2024-05-01T10:00:00+00:00",
            "last_updated": "2024-05-01T10:00:00+00:00",
            "context": { "id": "abc" }
        })))
        .mount(&server)
        .await;

    let state = client_for(&server)
        .get_state("sensor.temperature")
        .await
        .unwrap();

    assert_eq!(state.state, "21.5");
    assert_eq!(state.attributes["unit_of_measurement"], "°C");
    assert_eq!(
        state.last_changed.as_deref(),
        Some("2024-05-01T10:00:00+00:00")
    );
}

#[tokio::test]
async fn test_get_state_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/light.ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server).get_state("light.ghost").await.unwrap_err();

    assert_eq!(err, ControlPlaneError::EntityNotFound("light.ghost".to_string()));
}

#[tokio::test]
async fn test_base_path_is_preserved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ha/api/states/switch.fan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity_id": "switch.fan",
            "state": "off"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HomeAssistantClient::new(HomeAssistantConfig {
        base_url: Url::parse(&format!("{}/ha", server.uri())).unwrap(),
        token: Some("test-token".to_string()),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let state = client.get_state("switch.fan").await.unwrap();
    assert_eq!(state.state, "off");
}

#[tokio::test]
async fn test_unreachable_server_is_request_failure() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    drop(server);

    let err = client.get_state("light.kitchen").await.unwrap_err();

    assert!(matches!(err, ControlPlaneError::RequestFailed(_)));
}
