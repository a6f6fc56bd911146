//! API Router with Swagger UI

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::application::{SharedCommandSender, SharedSessionRegistry};

use super::modules::charge_points::{self, ChargePointsState, ConnectedChargePointDto};
use super::modules::commands::{self, CommandAppState, CommandResponse, StartRequest, StopRequest};
use super::modules::health::{self, HealthResponse, HealthState};
use super::modules::metrics::{http_metrics_middleware, prometheus_metrics, MetricsState};
use super::modules::request_id::request_id_middleware;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        charge_points::list_connected,
        commands::start_transaction,
        commands::stop_transaction,
    ),
    components(schemas(
        StartRequest,
        StopRequest,
        CommandResponse,
        ConnectedChargePointDto,
        HealthResponse,
    )),
    tags(
        (name = "Health", description = "Gateway liveness"),
        (name = "Charge Points", description = "Charge points with a live, identified connection"),
        (name = "Commands", description = "OCPP 1.6 remote commands delivered over the charger's WebSocket"),
    ),
    info(
        title = "OCPP Gateway Control Plane",
        version = "0.1.0",
        description = "Operator API for issuing OCPP 1.6 commands to connected charge points"
    )
)]
pub struct ApiDoc;

/// Create the control-plane router.
///
/// `/metrics` is only mounted when a Prometheus recorder handle is given.
pub fn create_api_router(
    session_registry: SharedSessionRegistry,
    command_sender: SharedCommandSender,
    prometheus: Option<PrometheusHandle>,
    started_at: Instant,
) -> Router {
    let command_routes = Router::new()
        .route("/start", post(commands::start_transaction))
        .route("/stop", post(commands::stop_transaction))
        .with_state(CommandAppState {
            command_sender: command_sender.clone(),
        });

    let charge_point_routes = Router::new()
        .route("/charge-points", get(charge_points::list_connected))
        .with_state(ChargePointsState {
            session_registry: session_registry.clone(),
        });

    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .with_state(HealthState {
            session_registry,
            command_sender,
            started_at: Arc::new(started_at),
        });

    let mut router = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(health_routes)
        .merge(charge_point_routes)
        .merge(command_routes);

    if let Some(handle) = prometheus {
        router = router.merge(
            Router::new()
                .route("/metrics", get(prometheus_metrics))
                .with_state(MetricsState { handle }),
        );
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::Service;

    use crate::application::commands::CommandSender;
    use crate::application::handlers::OcppHandler;
    use crate::application::session::{Connection, ConnectionId, SessionRegistry};
    use crate::shared::ocpp_frame::OcppFrame;
    use crate::shared::shutdown::ShutdownSignal;

    const BOOT: &str = r#"[2,"1","BootNotification",{"chargePointModel":"X1","chargePointVendor":"Acme","chargePointSerialNumber":"SN42"}]"#;

    struct Gateway {
        app: Router,
        registry: SharedSessionRegistry,
        sender: SharedCommandSender,
    }

    impl Gateway {
        fn new() -> Self {
            Self::with_timeout(Duration::from_secs(30))
        }

        fn with_timeout(timeout: Duration) -> Self {
            let registry = SessionRegistry::shared();
            let sender = Arc::new(CommandSender::with_timeout(registry.clone(), timeout));
            let app = create_api_router(registry.clone(), sender.clone(), None, Instant::now());
            Self {
                app,
                registry,
                sender,
            }
        }

        /// A charger that has completed BootNotification as `SN42`.
        fn boot_charger(&self, id: u64) -> (OcppHandler, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connection = Connection::new(ConnectionId(id), tx, None);
            let mut handler =
                OcppHandler::new(connection, self.registry.clone(), self.sender.clone());
            let reply = handler.handle(BOOT).unwrap().unwrap();
            assert!(reply.starts_with(r#"[3,"1","#));
            (handler, rx)
        }

        async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let mut svc = self.app.clone().into_service();
            let resp = svc.call(builder.body(body).unwrap()).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }
    }

    #[tokio::test]
    async fn boot_then_start_delivers_one_call_to_that_connection() {
        let gw = Gateway::new();
        let (_handler, mut rx) = gw.boot_charger(1);

        let (status, body) = gw
            .request(
                "POST",
                "/start",
                Some(json!({"chargePointId": "SN42", "connectorId": 1, "idTag": "TAG1"})),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "Sent");
        let unique_id = body["data"]["uniqueId"].as_str().unwrap().to_string();

        let call = OcppFrame::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            call,
            OcppFrame::Call {
                unique_id: unique_id.clone(),
                action: "RemoteStartTransaction".into(),
                payload: json!({"connectorId": 1, "idTag": "TAG1"}),
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(gw.sender.pending_count(), 1);
        assert!(gw.sender.is_pending(&unique_id));
    }

    #[tokio::test]
    async fn stop_sends_transaction_id() {
        let gw = Gateway::new();
        let (_handler, mut rx) = gw.boot_charger(1);

        let (status, _) = gw
            .request("POST", "/stop", Some(json!({"chargePointId": "SN42", "transactionId": 77})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let OcppFrame::Call { action, payload, .. } = OcppFrame::parse(&rx.try_recv().unwrap()).unwrap() else {
            panic!("expected Call");
        };
        assert_eq!(action, "RemoteStopTransaction");
        assert_eq!(payload, json!({"transactionId": 77}));
    }

    #[tokio::test]
    async fn unknown_charge_point_is_404_without_pending() {
        let gw = Gateway::new();
        let (status, body) = gw
            .request(
                "POST",
                "/start",
                Some(json!({"chargePointId": "ghost", "connectorId": 1, "idTag": "TAG1"})),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(gw.sender.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_charge_point_is_404() {
        let gw = Gateway::new();
        let (mut handler, _rx) = gw.boot_charger(1);
        handler.close();

        let (status, _) = gw
            .request("POST", "/stop", Some(json!({"chargePointId": "SN42", "transactionId": 1})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_fields_are_400() {
        let gw = Gateway::new();
        for body in [
            json!({"connectorId": 1, "idTag": "TAG1"}),
            json!({"chargePointId": "SN42", "idTag": "TAG1"}),
            json!({"chargePointId": "SN42", "connectorId": 1}),
            json!({"chargePointId": "SN42", "connectorId": -1, "idTag": "TAG1"}),
        ] {
            let (status, _) = gw.request("POST", "/start", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, _) = gw
            .request("POST", "/stop", Some(json!({"chargePointId": "SN42"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_fields_are_422() {
        let gw = Gateway::new();
        let (status, _) = gw
            .request(
                "POST",
                "/start",
                Some(json!({"chargePointId": "SN42", "connectorId": 1, "idTag": "X".repeat(21)})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = gw
            .request("POST", "/stop", Some(json!({"chargePointId": "", "transactionId": 1})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn wait_returns_charger_status() {
        let gw = Gateway::new();
        let (mut handler, mut rx) = gw.boot_charger(1);

        let app = gw.app.clone();
        let request = tokio::spawn(async move {
            let req = Request::builder()
                .method("POST")
                .uri("/start?wait=true")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"chargePointId": "SN42", "connectorId": 2, "idTag": "TAG1"}).to_string(),
                ))
                .unwrap();
            let mut svc = app.into_service();
            let resp = svc.call(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap())
        });

        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let call = OcppFrame::parse(&raw).unwrap();
        let result = format!(r#"[3,"{}",{{"status":"Rejected"}}]"#, call.unique_id());
        assert_eq!(handler.handle(&result).unwrap(), None);

        let (status, body) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "Rejected");
        assert_eq!(body["data"]["uniqueId"], call.unique_id());
        assert_eq!(gw.sender.pending_count(), 0);
    }

    #[tokio::test]
    async fn wait_times_out_with_504() {
        let gw = Gateway::with_timeout(Duration::from_millis(30));
        let (_handler, _rx) = gw.boot_charger(1);
        let shutdown = ShutdownSignal::new();
        let sweeper = gw
            .sender
            .start_timeout_sweeper(Duration::from_millis(5), shutdown.clone());

        let (status, body) = gw
            .request(
                "POST",
                "/stop?wait=true",
                Some(json!({"chargePointId": "SN42", "transactionId": 5})),
            )
            .await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], false);
        assert_eq!(gw.sender.pending_count(), 0);

        shutdown.trigger();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn charge_points_lists_identified_sessions() {
        let gw = Gateway::new();
        let (status, body) = gw.request("GET", "/charge-points", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));

        let (_handler, _rx) = gw.boot_charger(3);
        let (_, body) = gw.request("GET", "/charge-points", None).await;
        assert_eq!(body["data"][0]["chargePointId"], "SN42");
        assert_eq!(body["data"][0]["connectionId"], "conn-3");
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let gw = Gateway::new();
        let (_handler, _rx) = gw.boot_charger(1);
        gw.request(
            "POST",
            "/start",
            Some(json!({"chargePointId": "SN42", "connectorId": 1, "idTag": "TAG1"})),
        )
        .await;

        let (status, body) = gw.request("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connected_charge_points"], 1);
        assert_eq!(body["pending_commands"], 1);
    }

    #[tokio::test]
    async fn request_id_is_echoed_or_generated() {
        let gw = Gateway::new();
        let mut svc = gw.app.clone().into_service();

        let req = Request::builder()
            .uri("/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.headers()["x-request-id"], "abc-123");

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = svc.call(req).await.unwrap();
        let generated = resp.headers()["x-request-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn metrics_route_only_with_recorder() {
        let gw = Gateway::new();
        let (status, _) = gw.request("GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = create_api_router(gw.registry.clone(), gw.sender.clone(), Some(handle), Instant::now());
        let mut svc = app.into_service();
        let resp = svc
            .call(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[test]
    fn openapi_documents_command_routes() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        for path in ["/start", "/stop", "/charge-points", "/health"] {
            assert!(doc["paths"].get(path).is_some(), "missing {}", path);
        }
    }
}
