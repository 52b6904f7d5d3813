mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vitals_capture::config::ServiceConfig;
use vitals_capture::history::{HistoryClient, HistoryError, HistoryRange};
use vitals_capture::recorder::{CaptureController, FinalPayload, SessionEvent, SessionSettings, SessionState};
use vitals_capture::upload::{
    HttpPredictionClient, PredictionService, UploadError, GENERIC_SERVICE_ERROR,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service_config(server: &MockServer) -> ServiceConfig {
    ServiceConfig {
        base_url: server.uri(),
        ..ServiceConfig::default()
    }
}

fn payload() -> FinalPayload {
    FinalPayload::new(&b"\x1a\x45\xdf\xa3webm"[..], "video/webm")
}

#[tokio::test]
async fn test_predict_sends_multipart_video() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SAMPLE_RESPONSE, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    let result = client.submit(&payload()).await.unwrap();
    assert_eq!(result, sample_result());

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let content_type = request.headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data"), "{content_type}");

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(r#"name="video""#), "{body}");
    assert!(body.contains(r#"filename="recording.webm""#), "{body}");
    assert!(body.contains("video/webm"), "{body}");
}

#[tokio::test]
async fn test_numeric_session_id_is_accepted() {
    let server = MockServer::start().await;
    let body = SAMPLE_RESPONSE.replace(r#""abc123""#, "4711");
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    let result = client.submit(&payload()).await.unwrap();
    assert_eq!(result.session_id, "4711");
}

#[tokio::test]
async fn test_server_error_message_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "No face detected"})))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    assert_eq!(
        client.submit(&payload()).await,
        Err(UploadError::Service {
            status: 500,
            message: "No face detected".to_string()
        })
    );
}

#[tokio::test]
async fn test_server_error_without_body_is_generic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    assert_eq!(
        client.submit(&payload()).await,
        Err(UploadError::Service {
            status: 502,
            message: GENERIC_SERVICE_ERROR.to_string()
        })
    );
}

#[tokio::test]
async fn test_malformed_success_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"systolic": 120})))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    assert!(matches!(
        client.submit(&payload()).await,
        Err(UploadError::Decode(_))
    ));
}

#[tokio::test]
async fn test_invalid_payload_type_is_rejected_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SAMPLE_RESPONSE, "application/json"))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    let payload = FinalPayload::new(&b"webm"[..], "not a mime");
    match client.submit(&payload).await {
        Err(UploadError::Decode(message)) => assert!(message.contains("not a mime"), "{message}"),
        other => panic!("expected decode error, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ServiceConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        ..ServiceConfig::default()
    };

    let client = HttpPredictionClient::new(&config).unwrap();
    assert!(matches!(
        client.submit(&payload()).await,
        Err(UploadError::Network(_))
    ));
}

#[tokio::test]
async fn test_configured_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SAMPLE_RESPONSE, "application/json")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = ServiceConfig {
        upload_timeout_secs: Some(1),
        ..service_config(&server)
    };
    let client = HttpPredictionClient::new(&config).unwrap();
    assert!(matches!(
        client.submit(&payload()).await,
        Err(UploadError::Network(_))
    ));
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    assert_eq!(client.health().await, Ok(true));
}

#[tokio::test]
async fn test_unhealthy_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    assert_eq!(client.health().await, Ok(false));
}

#[tokio::test]
async fn test_history_is_sorted_by_timestamp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-readings"))
        .and(query_param("range", "1month"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"timestamp": "2024-03-02T08:00:00Z", "systolic": 124, "diastolic": 81, "heart_rate": 70},
            {"timestamp": "Fri, 01 Mar 2024 08:00:00 GMT", "systolic": 118, "diastolic": 76, "heart_rate": 72}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HistoryClient::new(&service_config(&server)).unwrap();
    let readings = client.fetch(HistoryRange::OneMonth).await.unwrap();

    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].systolic, 118.0);
    assert!(readings[0].timestamp < readings[1].timestamp);
    assert_eq!(readings[0].timestamp.to_rfc3339(), "2024-03-01T08:00:00+00:00");
}

#[tokio::test]
async fn test_history_failure_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-readings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HistoryClient::new(&service_config(&server)).unwrap();
    assert!(matches!(
        client.fetch(HistoryRange::default()).await,
        Err(HistoryError::Status(500))
    ));
}

#[tokio::test]
async fn test_session_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SAMPLE_RESPONSE, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let camera = FakeCamera::with_fragments(&["head", "body"]).interval(Duration::from_millis(5));
    let client = HttpPredictionClient::new(&service_config(&server)).unwrap();
    let hooks = RecordingHooks::default();
    let settings = SessionSettings {
        countdown_seconds: 3,
        timer_period: Duration::from_millis(20),
        ..SessionSettings::default()
    };
    let mut controller = CaptureController::new(Arc::new(camera.clone()), Arc::new(client), settings)
        .with_hooks(hooks.clone());

    controller.dispatch(SessionEvent::Start).await;
    controller.settle().await;

    assert_eq!(controller.state(), SessionState::Results);
    assert_eq!(hooks.saved(), vec![sample_result()]);
    assert_eq!(camera.counters().live(), 0);

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("headbody"), "{body}");
}
