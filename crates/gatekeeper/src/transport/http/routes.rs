//! HTTP route handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::permit::{AcquireError, ConfigError};
use crate::service::{AdmissionService, AdmitError, HealthSnapshot};

#[derive(Debug, Deserialize)]
pub struct LimitRequest {
    pub limit: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LimitRequestError {
    #[error("invalid request body: {0}")]
    Body(String),
    #[error(transparent)]
    Limit(#[from] ConfigError),
}

impl IntoResponse for LimitRequestError {
    fn into_response(self) -> Response {
        error_response(StatusCode::BAD_REQUEST, &self.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DataItem {
    item1: &'static str,
    item2: &'static str,
    item3: &'static str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn admit_error_response(error: AdmitError) -> Response {
    match error {
        AdmitError::Overloaded => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string())
        }
        AdmitError::Acquire(AcquireError::Cancelled) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down")
        }
        AdmitError::Acquire(e @ AcquireError::ManagerClosed) => {
            tracing::error!(error = %e, "Admission unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
    }
}

/// Holds an admission for the whole downstream handler.
async fn admission(
    State(service): State<Arc<AdmissionService>>,
    request: Request,
    next: Next,
) -> Response {
    match service.run_guarded(|| next.run(request)).await {
        Ok(response) => response,
        Err(e) => admit_error_response(e),
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency = ?started.elapsed(),
        "Request handled"
    );
    response
}

async fn health_check(State(service): State<Arc<AdmissionService>>) -> Json<HealthSnapshot> {
    Json(service.health())
}

async fn set_limit(
    State(service): State<Arc<AdmissionService>>,
    payload: Result<Json<LimitRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, LimitRequestError> {
    let Json(request) = payload.map_err(|e| LimitRequestError::Body(e.body_text()))?;
    let limit = service.set_limit(request.limit)?;
    Ok(Json(serde_json::json!({ "limit": limit })))
}

async fn release_all(State(service): State<Arc<AdmissionService>>) -> impl IntoResponse {
    tracing::info!("Release of all tokens requested via HTTP");
    service.release_all().await;
    (StatusCode::OK, Json(serde_json::json!({})))
}

async fn shutdown(State(service): State<Arc<AdmissionService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

async fn get_data(State(service): State<Arc<AdmissionService>>) -> Json<Vec<DataItem>> {
    let max_ms = service.max_work_delay().as_millis() as u64;
    if max_ms > 0 {
        let delay = Duration::from_millis(rand::rng().random_range(0..max_ms));
        tokio::time::sleep(delay).await;
    }

    Json(vec![DataItem {
        item1: "books",
        item2: "hotdogs",
        item3: "trinkets",
    }])
}

pub fn routes(service: Arc<AdmissionService>) -> Router {
    let guarded = Router::new()
        .route("/data", get(get_data))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&service),
            admission,
        ));

    Router::new()
        .route("/health-check", get(health_check))
        .route("/limit", post(set_limit))
        .route("/release-all", post(release_all))
        .route("/shutdown", post(shutdown))
        .merge(guarded)
        .layer(middleware::from_fn(log_request))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{OverloadGate, Sampler};
    use crate::permit::ManagerStats;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Fixed(f64);

    impl Sampler for Fixed {
        fn sample(&self) -> f64 {
            self.0
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_limit(body: &'static str) -> Request<Body> {
        Request::post("/limit")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn wait_for(service: &AdmissionService, check: impl Fn(&ManagerStats) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if check(&service.health().stats) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn health_check_reports_manager_stats() {
        let service = Arc::new(AdmissionService::new(10).unwrap());
        let app = routes(service);

        let response = app
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["limit"], 10);
        assert_eq!(json["active"], 0);
        assert_eq!(json["pending_demand"], 0);
        assert_eq!(json["overload_ratio"], 0.0);
        assert_eq!(json["status"], "READY");
        assert!(json["version"]["gatekeeper"].is_string());
    }

    #[tokio::test]
    async fn set_limit_replaces_manager() {
        let service = Arc::new(AdmissionService::new(10).unwrap());
        let app = routes(Arc::clone(&service));

        let response = app.oneshot(post_limit(r#"{"limit":3}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["limit"], 3);
        assert_eq!(service.manager().limit(), 3);
    }

    #[tokio::test]
    async fn set_limit_rejects_non_positive() {
        let service = Arc::new(AdmissionService::new(10).unwrap());

        for body in [r#"{"limit":0}"#, r#"{"limit":-4}"#] {
            let response = routes(Arc::clone(&service))
                .oneshot(post_limit(body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = response_json(response).await;
            assert!(json["error"].as_str().unwrap().contains("invalid admission limit"));
        }
        assert_eq!(service.manager().limit(), 10);
    }

    #[tokio::test]
    async fn set_limit_rejects_malformed_body() {
        let service = Arc::new(AdmissionService::new(10).unwrap());

        for body in [r#"{"limit":"ten"}"#, r#"{}"#, "not json"] {
            let response = routes(Arc::clone(&service))
                .oneshot(post_limit(body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = response_json(response).await;
            assert!(json["error"].as_str().unwrap().starts_with("invalid request body"));
        }
        assert_eq!(service.manager().limit(), 10);
    }

    #[tokio::test]
    async fn data_returns_items_and_releases_token() {
        let service = Arc::new(AdmissionService::new(1).unwrap());
        let app = routes(Arc::clone(&service));

        let response = app
            .oneshot(Request::get("/data").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(
            json,
            serde_json::json!([{"Item1": "books", "Item2": "hotdogs", "Item3": "trinkets"}])
        );

        let stats = service.manager().snapshot().await.unwrap();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending_demand, 0);
    }

    #[tokio::test]
    async fn data_sheds_under_saturated_demand() {
        let service = Arc::new(
            AdmissionService::new(1)
                .unwrap()
                .with_gate(OverloadGate::with_sampler(Arc::new(Fixed(0.99)))),
        );
        let held = service.admit().await.unwrap();

        let mut requests = Vec::new();
        for _ in 0..2 {
            let app = routes(Arc::clone(&service));
            requests.push(tokio::spawn(async move {
                app.oneshot(Request::get("/data").body(Body::empty()).unwrap())
                    .await
                    .unwrap()
            }));
        }
        wait_for(&service, |s| s.pending_demand == 2).await;
        held.release().await;

        let mut statuses = Vec::new();
        for request in requests {
            let response = request.await.unwrap();
            let status = response.status();
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                let json = response_json(response).await;
                assert_eq!(json["error"], "application error");
            }
            statuses.push(status);
        }
        statuses.sort();
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR]
        );

        let stats = service.manager().snapshot().await.unwrap();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending_demand, 0);
    }

    #[tokio::test]
    async fn data_during_shutdown_returns_503() {
        let service = Arc::new(AdmissionService::new(1).unwrap());
        let held = service.admit().await.unwrap();

        let request = {
            let app = routes(Arc::clone(&service));
            tokio::spawn(async move {
                app.oneshot(Request::get("/data").body(Body::empty()).unwrap())
                    .await
                    .unwrap()
            })
        };
        wait_for(&service, |s| s.pending_demand == 1).await;
        service.trigger_shutdown();

        let response = request.await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        held.release().await;
    }

    #[tokio::test]
    async fn release_all_resets_tokens() {
        let service = Arc::new(AdmissionService::new(2).unwrap());
        let _held = service.admit().await.unwrap();
        let app = routes(Arc::clone(&service));

        let response = app
            .oneshot(Request::post("/release-all").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(service.manager().snapshot().await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn shutdown_triggers_service_shutdown() {
        let service = Arc::new(AdmissionService::new(1).unwrap());
        let token = service.shutdown_token();
        let app = routes(service);

        assert!(!token.is_cancelled());

        let response = app
            .oneshot(Request::post("/shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let service = Arc::new(AdmissionService::new(1).unwrap());
        let response = routes(service)
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
