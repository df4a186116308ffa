use crate::config::Config;
use crate::errors::GatewayError;
use crate::templates::{self, Templates};
use crate::upstream::{AbsDataRow, PlotService, RefreshStatus, Relayed, StatisticsApi};
use crate::validation::{validate_dataflow_name, validate_graph_name};
use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Form, FromRequest, Path, Query, Request, State};
use axum::http::Method;
use axum::response::Html;
use catalog::DataflowCatalog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_DATAFLOW: &str = "CPI";
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Handles shared by every request. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub templates: Arc<Templates>,
    pub catalog: Arc<dyn DataflowCatalog>,
    pub plot_service: PlotService,
    pub statistics_api: StatisticsApi,
}

#[derive(Serialize)]
struct PageContext<'a> {
    data_source: &'a str,
}

#[derive(Serialize)]
struct DashboardContext<'a> {
    data_source: &'a str,
    dataflowid: &'a str,
}

#[derive(Serialize)]
struct DataflowContext<'a> {
    data_source: &'a str,
    dataflows: &'a [catalog::Dataflow],
}

#[derive(Deserialize, Debug, Default)]
pub struct DataflowParams {
    dataflowid: Option<String>,
}

impl DataflowParams {
    fn dataflow(&self) -> Option<&str> {
        self.dataflowid.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

#[derive(Deserialize, Debug)]
pub struct DashboardForm {
    #[serde(rename = "dataflowId")]
    dataflow_id: Option<String>,
}

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, GatewayError> {
    render_page(&state, templates::INDEX)
}

pub async fn home(State(state): State<AppState>) -> Result<Html<String>, GatewayError> {
    render_page(&state, templates::HOME)
}

pub async fn sidebar(State(state): State<AppState>) -> Result<Html<String>, GatewayError> {
    render_page(&state, templates::SIDEBAR)
}

fn render_page(state: &AppState, name: &str) -> Result<Html<String>, GatewayError> {
    let context = PageContext {
        data_source: &state.config.data_source,
    };
    Ok(state.templates.render(name, &context)?)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DataflowParams>,
) -> Result<Html<String>, GatewayError> {
    let context = DashboardContext {
        data_source: &state.config.data_source,
        dataflowid: params.dataflow().unwrap_or(DEFAULT_DATAFLOW),
    };
    Ok(state.templates.render(templates::DASHBOARD, &context)?)
}

pub async fn abs_dataflow(State(state): State<AppState>) -> Result<Html<String>, GatewayError> {
    let dataflows = state.catalog.list().await?;
    tracing::debug!(count = dataflows.len(), "rendering dataflow list");

    let context = DataflowContext {
        data_source: &state.config.data_source,
        dataflows: &dataflows,
    };
    Ok(state.templates.render(templates::DATAFLOW_CONTENTS, &context)?)
}

/// Validates both path segments before anything leaves the process.
pub async fn plot(
    State(state): State<AppState>,
    Path((graph, dataflow)): Path<(String, String)>,
) -> Result<Relayed, GatewayError> {
    let graph = validate_graph_name(&graph)?;
    let dataflow = validate_dataflow_name(&dataflow, state.catalog.as_ref()).await?;

    Ok(state.plot_service.plot(graph, &dataflow).await?)
}

pub async fn plot_test(State(state): State<AppState>) -> Result<Relayed, GatewayError> {
    Ok(state.plot_service.test_plot(false).await?)
}

pub async fn plot_test_json(State(state): State<AppState>) -> Result<Relayed, GatewayError> {
    Ok(state.plot_service.test_plot(true).await?)
}

pub async fn request_data(
    State(state): State<AppState>,
    Query(params): Query<DataflowParams>,
) -> Result<Json<Vec<AbsDataRow>>, GatewayError> {
    let dataflow = params
        .dataflow()
        .ok_or(GatewayError::MissingParameter("dataflowid"))?;

    let rows = state.plot_service.request_data(dataflow).await?;
    tracing::debug!(dataflow, rows = rows.len(), "relaying raw data");
    Ok(Json(rows))
}

/// Fetches observations for the posted dataflow, normalizes them and has the
/// plot service render a dashboard from them.
pub async fn request_dashboard(
    State(state): State<AppState>,
    Form(form): Form<DashboardForm>,
) -> Result<Relayed, GatewayError> {
    let requested = form
        .dataflow_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(GatewayError::MissingParameter("dataflowId"))?;
    let dataflow = validate_dataflow_name(requested, state.catalog.as_ref()).await?;

    let observations = state
        .statistics_api
        .observations(&dataflow, &state.config.statistics_api.dashboard_key)
        .await?;
    tracing::info!(%dataflow, count = observations.len(), "forwarding dashboard observations");

    Ok(state.plot_service.dashboard(&dataflow, &observations).await?)
}

/// Accepts the dataflow as a query parameter (GET) or form field (POST).
/// Falls back to CPI only when nothing was sent at all.
pub async fn refresh_dashboard(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<RefreshStatus>, GatewayError> {
    let params = refresh_params(request).await?;
    let requested = params.dataflow().unwrap_or(DEFAULT_DATAFLOW);
    let dataflow = validate_dataflow_name(requested, state.catalog.as_ref()).await?;

    Ok(Json(state.plot_service.refresh_dashboard(&dataflow).await?))
}

async fn refresh_params(request: Request) -> Result<DataflowParams, GatewayError> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|e| GatewayError::MalformedRequest(e.to_string()))?;

    let empty = if parts.method == Method::GET {
        parts.uri.query().is_none_or(str::is_empty)
    } else {
        body.is_empty()
    };
    if empty {
        return Ok(DataflowParams::default());
    }

    let request = Request::from_parts(parts, Body::from(body));
    let Form(params) = Form::<DataflowParams>::from_request(request, &())
        .await
        .map_err(|rejection| GatewayError::MalformedRequest(rejection.body_text()))?;
    Ok(params)
}
