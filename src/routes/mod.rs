pub mod gps;
pub mod public;
pub mod trip;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.config.cors_origins.clone()))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .merge(public::router())
        .merge(gps::router())
        .nest("/trip", trip::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, db::testing::TestDb};

    struct TestApp {
        router: Router,
        _db: TestDb,
    }

    impl TestApp {
        async fn new() -> Self {
            let db = TestDb::new().await;
            let config = AppConfig {
                database_url: "sqlite::memory:".into(),
                listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                max_connections: 4,
                cors_origins: vec![header::HeaderValue::from_static("http://localhost:5173")],
            };
            let router = create_router(AppState::new(config, db.pool.clone()));
            Self { router, _db: db }
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(value) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            self.router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap()
        }

        async fn start(&self, jeep_code: &str) -> Response {
            self.send(
                Method::POST,
                "/trip/start-trip",
                Some(json!({
                    "route_id": "R-01",
                    "direction": "south",
                    "recorder_id": "rec-9",
                    "jeep_code": jeep_code,
                    "official_capacity": 20,
                    "starting_occupancy": 5
                })),
            )
            .await
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn landing_reports_database() {
        let app = TestApp::new().await;
        let response = app.send(Method::GET, "/", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("connected"));
    }

    async fn preflight(app: &TestApp, origin: &str) -> Response {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/trip/start-trip")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        app.router.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn cors_allows_credentials_for_configured_origin() {
        let app = TestApp::new().await;
        let response = preflight(&app, "http://localhost:5173").await;
        let headers = response.headers();

        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "content-type"
        );
    }

    #[tokio::test]
    async fn cors_ignores_unknown_origin() {
        let app = TestApp::new().await;
        let response = preflight(&app, "https://elsewhere.example").await;
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_start_maps_to_conflict() {
        let app = TestApp::new().await;

        let response = app.start("J-5").await;
        assert_eq!(response.status(), StatusCode::OK);
        let trip = json_body(response).await;
        assert_eq!(trip["status"], "ACTIVE");

        let response = app.start("J-5").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("J-5"));
    }

    #[tokio::test]
    async fn invalid_start_maps_to_bad_request() {
        let app = TestApp::new().await;
        let response = app
            .send(
                Method::POST,
                "/trip/start-trip",
                Some(json!({
                    "route_id": "R-01",
                    "direction": "south",
                    "recorder_id": "rec-9",
                    "jeep_code": "J-1",
                    "official_capacity": 10,
                    "starting_occupancy": 11
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_trip_maps_to_not_found() {
        let app = TestApp::new().await;
        let response = app.send(Method::GET, "/trip/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["detail"], "trip not found");

        let response = app.send(Method::POST, "/trip/end-trip/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn log_endpoint_validates_and_stores() {
        let app = TestApp::new().await;
        let trip = json_body(app.start("J-2").await).await;
        let trip_id = trip["trip_id"].as_str().unwrap();

        let response = app
            .send(
                Method::POST,
                "/log/",
                Some(json!({
                    "trip_id": trip_id,
                    "device_id": "ab",
                    "latitude": 14.6,
                    "longitude": 121.0,
                    "accuracy": 5.0,
                    "occupancy_count": 3
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send(
                Method::POST,
                "/log",
                Some(json!({
                    "trip_id": trip_id,
                    "device_id": "phone-7",
                    "latitude": 14.6,
                    "longitude": 121.0,
                    "accuracy": 35.0,
                    "occupancy_count": 21
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let log = json_body(response).await;
        assert_eq!(log["gps_quality_flag"], "ACCEPTABLE");
        assert_eq!(log["over_capacity_flag"], true);
    }

    #[tokio::test]
    async fn export_is_gated_on_completion() {
        let app = TestApp::new().await;
        let trip = json_body(app.start("J-3").await).await;
        let trip_id = trip["trip_id"].as_str().unwrap().to_string();

        let response = app
            .send(
                Method::POST,
                "/log/",
                Some(json!({
                    "trip_id": trip_id,
                    "device_id": "phone-7",
                    "latitude": 14.6,
                    "longitude": 121.0,
                    "accuracy": 10.0,
                    "occupancy_count": 4
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let export_uri = format!("/trip/export/{trip_id}");
        let response = app.send(Method::GET, &export_uri, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .send(Method::POST, &format!("/trip/end-trip/{trip_id}"), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let ended = json_body(response).await;
        assert_eq!(ended["status"], "COMPLETED");
        assert!(!ended["end_time"].is_null());

        let response = app.send(Method::GET, &export_uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename={trip_id}_export.csv").as_str()
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("log_id,trip_id,device_id,"));
    }
}
