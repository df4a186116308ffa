use crate::handlers::{self, AppState};
use crate::metrics_defs::{REQUEST_COUNT, REQUEST_DURATION};
use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use shared::{counter, histogram};
use std::time::Instant;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(handlers::index))
        .route("/home", get(handlers::home))
        .route("/health", get(handlers::health))
        .route("/sidebar", get(handlers::sidebar))
        .route("/dashboard", get(handlers::dashboard))
        .route("/abs_dataflow/", get(handlers::abs_dataflow))
        .route("/plot/test/", get(handlers::plot_test))
        .route("/plot/test/json/", get(handlers::plot_test_json))
        .route("/plot/{graph}/{dataflow}", get(handlers::plot))
        .route("/request-data/ABS/", get(handlers::request_data))
        .route("/request-dashboard/", post(handlers::request_dashboard))
        .route("/dashboard-retrieve/", post(handlers::request_dashboard))
        .route(
            "/refresh-dashboard/",
            get(handlers::refresh_dashboard).post(handlers::refresh_dashboard),
        )
        .route_layer(middleware::from_fn(track_request))
        .nest_service("/static", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_request(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    histogram!(REQUEST_DURATION, "route" => route.clone(), "status" => status.clone())
        .record(start.elapsed().as_secs_f64());
    counter!(REQUEST_COUNT, "route" => route, "status" => status).increment(1);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::templates::Templates;
    use crate::upstream::tests::{closed_port, spawn_stub};
    use crate::upstream::{PlotService, StatisticsApi};
    use axum::body::{Body, to_bytes};
    use axum::extract::Path;
    use axum::http::{Method, StatusCode, header};
    use catalog::{Database, Dataflow, DataflowCatalog};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Outbound requests observed by a stub upstream.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn stub_plot_service(recorder: Recorder) -> Router {
        let plot = recorder.clone();
        let dashboard = recorder.clone();
        let refresh = recorder.clone();
        let data = recorder;

        Router::new()
            .route(
                "/plot/{graph}/{dataflow}",
                get(move |Path((graph, dataflow)): Path<(String, String)>| {
                    let plot = plot.clone();
                    async move {
                        plot.record(format!("GET /plot/{graph}/{dataflow}"));
                        format!("<div id=\"{graph}-{dataflow}\"></div>")
                    }
                }),
            )
            .route("/plot/test", get(|| async { "<div>test</div>" }))
            .route(
                "/plot/test/json",
                get(|| async { axum::Json(json!({"data": []})) }),
            )
            .route(
                "/dashboard/api/{dataflow}/",
                post(
                    move |Path(dataflow): Path<String>, axum::Json(body): axum::Json<Value>| {
                        let dashboard = dashboard.clone();
                        async move {
                            dashboard.record(format!("POST /dashboard/api/{dataflow}/ {body}"));
                            "<section>dashboard</section>"
                        }
                    },
                ),
            )
            .route(
                "/refresh-dashboard/",
                post(move |axum::Json(body): axum::Json<Value>| {
                    let refresh = refresh.clone();
                    async move {
                        refresh.record(format!("POST /refresh-dashboard/ {body}"));
                        axum::Json(json!({"status": "ok"}))
                    }
                }),
            )
            .route(
                "/request-data/ABS/",
                post(move |axum::Json(body): axum::Json<Value>| {
                    let data = data.clone();
                    async move {
                        data.record(format!("POST /request-data/ABS/ {body}"));
                        axum::Json(json!([{
                            "MEASURE": "1", "INDEX": "10001", "TSEST": "10",
                            "REGION": "50", "FREQ": "Q", "TIME_PERIOD": "2024-Q1",
                            "VALUE": 137.4
                        }]))
                    }
                }),
            )
    }

    fn stub_statistics_api(recorder: Recorder) -> Router {
        Router::new().route(
            "/rest/data/{flow}/{key}",
            get(move |Path((flow, key)): Path<(String, String)>| {
                let recorder = recorder.clone();
                async move {
                    recorder.record(format!("GET /rest/data/{flow}/{key}"));
                    if flow == "MISSING" {
                        return (
                            StatusCode::NOT_FOUND,
                            json!({"errors": [{"id": "NoResults", "detail": "No data", "code": 404, "source": {"parameter": "flow"}}]})
                                .to_string(),
                        );
                    }
                    (
                        StatusCode::OK,
                        json!({
                            "data": {
                                "dataSets": [{
                                    "series": {"0": {"observations": {
                                        "0": ["1.2"], "1": [3.4], "2": ["bad"]
                                    }}}
                                }],
                                "structure": {"dimensions": {"observation": [{
                                    "values": [{"id": "2023-Q4"}, {"id": "2024-Q1"}, {"id": "2024-Q2"}]
                                }]}}
                            }
                        })
                        .to_string(),
                    )
                }
            }),
        )
    }

    async fn store_with(ids: &[&str]) -> Arc<dyn DataflowCatalog> {
        let db = Database::connect("sqlite::memory:", 1).await.unwrap();
        db.ensure_schema().await.unwrap();
        for id in ids {
            db.upsert_dataflow(&Dataflow {
                id: id.to_string(),
                version: "1.0.0".into(),
                agency_id: "ABS".into(),
                is_external_reference: false,
                is_final: true,
                name: format!("{id} dataflow"),
            })
            .await
            .unwrap();
        }
        Arc::new(db)
    }

    struct TestApp {
        router: Router,
        plot_calls: Recorder,
        api_calls: Recorder,
    }

    async fn test_app(ids: &[&str]) -> TestApp {
        let plot_calls = Recorder::default();
        let api_calls = Recorder::default();
        let plot_port = spawn_stub(stub_plot_service(plot_calls.clone())).await;
        let api_port = spawn_stub(stub_statistics_api(api_calls.clone())).await;
        let router = app_with(ids, plot_port, api_port).await;

        TestApp {
            router,
            plot_calls,
            api_calls,
        }
    }

    async fn app_with(ids: &[&str], plot_port: u16, api_port: u16) -> Router {
        let config = test_config(plot_port, &format!("http://127.0.0.1:{api_port}"));
        let client = reqwest::Client::new();
        let state = AppState {
            templates: Arc::new(Templates::load(&config.html_templates).unwrap()),
            catalog: store_with(ids).await,
            plot_service: PlotService::new(client.clone(), &config.plot_service).unwrap(),
            statistics_api: StatisticsApi::new(client, &config.statistics_api, "key".into()),
            config: Arc::new(config),
        };
        build_router(state)
    }

    async fn send(router: &Router, request: http::Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> http::Request<Body> {
        http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn form_request(uri: &str, body: &str) -> http::Request<Body> {
        http::Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_graph_is_rejected_without_outbound_call() {
        let app = test_app(&["CPI"]).await;

        for graph in ["histogram", "Line", "BAR"] {
            let (status, body) = send(&app.router, get_request(&format!("/plot/{graph}/CPI"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, format!("Invalid graph name: {graph}"));
        }
        assert!(app.plot_calls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dataflow_is_rejected_without_outbound_call() {
        let app = test_app(&["CPI"]).await;

        let (status, body) = send(&app.router, get_request("/plot/line/wpi")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid dataflow name: WPI");
        assert!(app.plot_calls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plot_normalizes_dataflow_and_proxies_once() {
        let app = test_app(&["CPI"]).await;

        let response = app
            .router
            .clone()
            .oneshot(get_request("/plot/bar/cpi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "<div id=\"bar-CPI\"></div>");

        assert_eq!(app.plot_calls.calls(), vec!["GET /plot/bar/CPI"]);
    }

    #[tokio::test]
    async fn test_connection_refused_returns_generic_bad_gateway() {
        let plot_port = closed_port().await;
        let api_port = closed_port().await;
        let router = app_with(&["CPI"], plot_port, api_port).await;

        let (status, body) = send(&router, get_request("/plot/line/CPI")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, "Plot service unavailable");
        assert!(!body.to_lowercase().contains("refused"));
        assert!(!body.contains(&plot_port.to_string()));
    }

    #[tokio::test]
    async fn test_request_dashboard_forwards_normalized_observations() {
        let app = test_app(&["CPI"]).await;

        for route in ["/request-dashboard/", "/dashboard-retrieve/"] {
            let (status, body) = send(&app.router, form_request(route, "dataflowId=cpi")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "<section>dashboard</section>");
        }

        assert_eq!(app.api_calls.calls()[0], "GET /rest/data/CPI/......");
        let forwarded = app.plot_calls.calls();
        assert_eq!(forwarded.len(), 2);
        let payload: Value = serde_json::from_str(
            forwarded[0]
                .strip_prefix("POST /dashboard/api/CPI/ ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            payload,
            json!([
                {"period": "2023-Q4", "value": 1.2},
                {"period": "2024-Q1", "value": 3.4}
            ])
        );
    }

    #[tokio::test]
    async fn test_request_dashboard_relays_structured_errors() {
        let app = test_app(&["MISSING"]).await;

        let (status, body) = send(
            &app.router,
            form_request("/request-dashboard/", "dataflowId=MISSING"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body,
            "ABS API Errors:\nNoResults - No data (Code: 404, Parameter: flow)\n"
        );
        assert!(app.plot_calls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_request_dashboard_requires_dataflow() {
        let app = test_app(&["CPI"]).await;

        let (status, _) = send(&app.router, form_request("/request-dashboard/", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.api_calls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_request_data() {
        let app = test_app(&["CPI"]).await;

        let (status, body) = send(&app.router, get_request("/request-data/ABS/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing dataflowid parameter");

        let (status, body) =
            send(&app.router, get_request("/request-data/ABS/?dataflowid=CPI")).await;
        assert_eq!(status, StatusCode::OK);
        let rows: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(rows[0]["TIME_PERIOD"], "2024-Q1");
        assert_eq!(
            app.plot_calls.calls(),
            vec![r#"POST /request-data/ABS/ {"dataflowid":"CPI"}"#]
        );
    }

    #[tokio::test]
    async fn test_refresh_dashboard_defaults_to_cpi() {
        let app = test_app(&["CPI", "LF"]).await;

        let (status, body) = send(&app.router, get_request("/refresh-dashboard/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);

        let (status, _) = send(
            &app.router,
            form_request("/refresh-dashboard/", "dataflowid=lf"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            app.plot_calls.calls(),
            vec![
                r#"POST /refresh-dashboard/ {"dataflowid":"CPI"}"#,
                r#"POST /refresh-dashboard/ {"dataflowid":"LF"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_dashboard_rejects_malformed_forms() {
        let app = test_app(&["CPI", "LF", "WPI"]).await;

        let json = http::Request::post("/refresh-dashboard/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"dataflowid":"LF"}"#))
            .unwrap();
        let (status, body) = send(&app.router, json).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Malformed request: "), "{body}");

        let (status, _) = send(
            &app.router,
            form_request("/refresh-dashboard/", "dataflowid=LF&dataflowid=WPI"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app.router,
            get_request("/refresh-dashboard/?dataflowid=LF&dataflowid=WPI"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.plot_calls.calls().is_empty());

        // An empty body is not a malformed one.
        let (status, _) = send(&app.router, form_request("/refresh-dashboard/", "")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            send(&app.router, get_request("/refresh-dashboard/?dataflowid=wpi")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            app.plot_calls.calls(),
            vec![
                r#"POST /refresh-dashboard/ {"dataflowid":"CPI"}"#,
                r#"POST /refresh-dashboard/ {"dataflowid":"WPI"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_pages() {
        let app = test_app(&["CPI", "LF"]).await;

        let (status, body) = send(&app.router, get_request("/health")).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

        for page in ["/", "/home", "/sidebar"] {
            let (status, _) = send(&app.router, get_request(page)).await;
            assert_eq!(status, StatusCode::OK, "{page}");
        }

        let (status, body) = send(&app.router, get_request("/dashboard")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("data-dataflow=\"CPI\""));

        let (_, body) = send(&app.router, get_request("/dashboard?dataflowid=LF")).await;
        assert!(body.contains("data-dataflow=\"LF\""));

        let (status, body) = send(&app.router, get_request("/abs_dataflow/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("CPI dataflow"));
        assert!(body.contains("LF dataflow"));
    }

    #[tokio::test]
    async fn test_test_plots_and_static_files() {
        let app = test_app(&[]).await;

        let (status, body) = send(&app.router, get_request("/plot/test/")).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "<div>test</div>"));

        let (status, body) = send(&app.router, get_request("/plot/test/json/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"data":[]}"#);

        let (status, body) = send(&app.router, get_request("/static/css/style.css")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method() {
        let app = test_app(&[]).await;

        let (status, _) = send(&app.router, get_request("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = http::Request::builder()
            .method(Method::DELETE)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(&app.router, get_request("/request-dashboard/")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
