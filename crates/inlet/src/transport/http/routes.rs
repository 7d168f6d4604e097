//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;

use crate::gateway::{GatewayError, SubmitOptions};
use crate::service::PredictionService;
use crate::webhook::{Verification, WebhookPayload};

#[derive(Debug, Deserialize)]
pub struct CreatePredictionRequest {
    pub prompt: String,
    /// URL the provider should push completion notifications to. Absent
    /// means the service falls back to polling on the caller's behalf.
    #[serde(default)]
    pub webhook: Option<String>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "READY",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn create_prediction(
    State(service): State<Arc<PredictionService>>,
    Json(request): Json<CreatePredictionRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let options = SubmitOptions {
        webhook: request.webhook,
    };

    match service.submit(&request.prompt, &options).await {
        Ok(record) => (StatusCode::CREATED, Json(serde_json::json!(record))),
        Err(GatewayError::Validation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "detail": [{
                    "loc": ["body", "prompt"],
                    "msg": "prompt must not be empty",
                    "type": "value_error"
                }]
            })),
        ),
        Err(e) => upstream_response(e),
    }
}

async fn get_prediction(
    State(service): State<Arc<PredictionService>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match service.refresh(&id).await {
        Ok(record) => (StatusCode::OK, Json(serde_json::json!(record))),
        Err(GatewayError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "detail": format!("prediction {} not found", id)
            })),
        ),
        Err(e) => upstream_response(e),
    }
}

fn upstream_response(error: GatewayError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %error, "provider call failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({ "detail": error.to_string() })),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Webhook receiver. Identical deliveries can arrive multiple times and out
/// of order, so this handler must be idempotent - the coordinator's merge
/// makes it so.
async fn receive_webhook(
    State(service): State<Arc<PredictionService>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let verification = match service.verifier().verify(
        header_str(&headers, "webhook-id"),
        header_str(&headers, "webhook-timestamp"),
        header_str(&headers, "webhook-signature"),
        &body,
    ) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "rejected webhook delivery");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "detail": "webhook is invalid" })),
            );
        }
    };

    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "detail": e.to_string() })),
            );
        }
    };

    let result = service.apply_webhook(payload, verification);

    let mut response = serde_json::json!({
        "detail": "webhook processed",
        "merge": result.as_str(),
    });
    if verification == Verification::Unvalidated {
        response["unvalidated"] = serde_json::Value::Bool(true);
    }
    (StatusCode::OK, Json(response))
}

pub fn routes(service: Arc<PredictionService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/predictions", post(create_prediction))
        .route("/predictions/{id}", get(get_prediction))
        .route("/webhooks", post(receive_webhook))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::LifecycleCoordinator;
    use crate::gateway::InferenceClient;
    use crate::poller::PollConfig;
    use crate::webhook::{WebhookVerifier, testing::sign};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // whsec_ + base64("super-secret-key")
    const SECRET: &str = "whsec_c3VwZXItc2VjcmV0LWtleQ==";

    fn test_service(server: &MockServer, secret: Option<&str>) -> Arc<PredictionService> {
        let client = Arc::new(
            InferenceClient::new(server.uri(), "test-token".to_string(), "v1".to_string())
                .unwrap(),
        );
        let poll = PollConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
        };
        Arc::new(PredictionService::new(
            client,
            Arc::new(LifecycleCoordinator::new()),
            WebhookVerifier::new(secret).unwrap(),
            poll,
        ))
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn signed_webhook(secret: &str, body: &str) -> Request<Body> {
        let signature = sign(secret, "msg_1", "1700000000", body.as_bytes());
        Request::post("/webhooks")
            .header("content-type", "application/json")
            .header("webhook-id", "msg_1")
            .header("webhook-timestamp", "1700000000")
            .header("webhook-signature", signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_check_reports_version() {
        let server = MockServer::start().await;
        let app = routes(test_service(&server, None));

        let response = app
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "READY");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn create_prediction_returns_201_with_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "starting",
                "input": {"prompt": "a red bicycle"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/predictions/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "processing"
            })))
            .mount(&server)
            .await;

        let app = routes(test_service(&server, None));
        let response = app
            .oneshot(
                Request::post("/predictions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"a red bicycle"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = response_json(response).await;
        assert_eq!(json["id"], "p1");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["prompt"], "a red bicycle");
    }

    #[tokio::test]
    async fn create_prediction_rejects_empty_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let app = routes(test_service(&server, None));
        let response = app
            .oneshot(
                Request::post("/predictions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = response_json(response).await;
        assert!(
            json["detail"][0]["msg"]
                .as_str()
                .unwrap()
                .contains("must not be empty")
        );
    }

    #[tokio::test]
    async fn create_prediction_surfaces_upstream_rejection_as_502() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"detail": "provider exploded"})),
            )
            .mount(&server)
            .await;

        let app = routes(test_service(&server, None));
        let response = app
            .oneshot(
                Request::post("/predictions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = response_json(response).await;
        assert!(
            json["detail"]
                .as_str()
                .unwrap()
                .contains("provider exploded")
        );
    }

    #[tokio::test]
    async fn get_prediction_unknown_id_is_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/predictions/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let app = routes(test_service(&server, None));
        let response = app
            .oneshot(
                Request::get("/predictions/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_with_invalid_signature_is_401_and_creates_no_record() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));
        let app = routes(Arc::clone(&service));

        let response = app
            .oneshot(
                Request::post("/webhooks")
                    .header("content-type", "application/json")
                    .header("webhook-id", "msg_1")
                    .header("webhook-timestamp", "1700000000")
                    .header("webhook-signature", "v1,bm90LWEtc2lnbmF0dXJl")
                    .body(Body::from(r#"{"id":"p2","status":"succeeded"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!service.coordinator().exists("p2"));
    }

    #[tokio::test]
    async fn webhook_missing_signature_headers_is_401() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));
        let app = routes(service);

        let response = app
            .oneshot(
                Request::post("/webhooks")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"id":"p2","status":"succeeded"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verified_webhook_is_merged() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));
        let app = routes(Arc::clone(&service));

        let body = r#"{"id":"p1","status":"succeeded","output":["https://img.png"]}"#;
        let response = app.oneshot(signed_webhook(SECRET, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["merge"], "applied");
        assert!(json.get("unvalidated").is_none());

        let record = service.coordinator().get("p1").unwrap();
        assert_eq!(record.output, vec!["https://img.png"]);
        assert!(record.webhook_verified);
    }

    #[tokio::test]
    async fn duplicate_webhook_reports_ignored_duplicate() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));

        let body = r#"{"id":"p1","status":"succeeded"}"#;
        let first = routes(Arc::clone(&service))
            .oneshot(signed_webhook(SECRET, body))
            .await
            .unwrap();
        let second = routes(Arc::clone(&service))
            .oneshot(signed_webhook(SECRET, body))
            .await
            .unwrap();

        assert_eq!(response_json(first).await["merge"], "applied");
        assert_eq!(response_json(second).await["merge"], "ignored_duplicate");
    }

    #[tokio::test]
    async fn stale_webhook_after_terminal_is_discarded() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));

        let succeeded = r#"{"id":"p1","status":"succeeded","output":["https://img.png"]}"#;
        routes(Arc::clone(&service))
            .oneshot(signed_webhook(SECRET, succeeded))
            .await
            .unwrap();

        let processing = r#"{"id":"p1","status":"processing"}"#;
        let response = routes(Arc::clone(&service))
            .oneshot(signed_webhook(SECRET, processing))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["merge"], "ignored_stale");
        assert_eq!(
            service.coordinator().get("p1").unwrap().status.as_str(),
            "succeeded"
        );
    }

    #[tokio::test]
    async fn webhook_without_configured_secret_is_marked_unvalidated() {
        let server = MockServer::start().await;
        let service = test_service(&server, None);
        let app = routes(Arc::clone(&service));

        let response = app
            .oneshot(
                Request::post("/webhooks")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"id":"p1","status":"succeeded"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["unvalidated"], true);

        // Accepted, but explicitly flagged as unauthenticated.
        assert!(!service.coordinator().get("p1").unwrap().webhook_verified);
    }

    #[tokio::test]
    async fn malformed_webhook_payload_is_422() {
        let server = MockServer::start().await;
        let service = test_service(&server, Some(SECRET));
        let app = routes(service);

        let response = app
            .oneshot(signed_webhook(SECRET, "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // Full lifecycle: submit -> poll sees processing -> verified webhook
    // delivers succeeded -> a later poll still reports succeeded.
    #[tokio::test]
    async fn submitted_prediction_settles_on_webhook_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "starting",
                "input": {"prompt": "a red bicycle"}
            })))
            .mount(&server)
            .await;
        // The provider keeps answering processing; the webhook is the only
        // place the terminal state ever appears.
        Mock::given(method("GET"))
            .and(path("/predictions/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "processing"
            })))
            .mount(&server)
            .await;

        let service = test_service(&server, Some(SECRET));

        let response = routes(Arc::clone(&service))
            .oneshot(
                Request::post("/predictions")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"prompt":"a red bicycle","webhook":"https://example.com/webhooks"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let poll = routes(Arc::clone(&service))
            .oneshot(Request::get("/predictions/p1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response_json(poll).await["status"], "processing");

        let webhook_body = r#"{"id":"p1","status":"succeeded","output":["https://img.png"]}"#;
        let delivery = routes(Arc::clone(&service))
            .oneshot(signed_webhook(SECRET, webhook_body))
            .await
            .unwrap();
        assert_eq!(delivery.status(), StatusCode::OK);

        // Provider still says processing, but the stored record is terminal.
        let poll = routes(Arc::clone(&service))
            .oneshot(Request::get("/predictions/p1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = response_json(poll).await;
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["output"][0], "https://img.png");
        assert_eq!(json["webhook_verified"], true);
    }
}
