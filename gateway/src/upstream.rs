use crate::config::{PlotServiceConfig, StatisticsApiConfig};
use crate::metrics_defs::{UPSTREAM_DURATION, UPSTREAM_FAILURES};
use crate::sdmx::{self, DecodeError};
use crate::validation::GraphKind;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use catalog::{Dataflow, Observation};
use http::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use url::Url;

const PLOT_SERVICE: &str = "Plot service";
const STATISTICS_API: &str = "Statistics API";

const SDMX_DATA_JSON: &str = "application/vnd.sdmx.data+json";
const SDMX_STRUCTURE_JSON: &str = "application/vnd.sdmx.structure+json";

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("{service} unavailable: {source}")]
    Unavailable {
        service: &'static str,
        source: reqwest::Error,
    },

    /// Error status without a structured body; relayed as-is.
    #[error("{service} returned {status}")]
    Status {
        service: &'static str,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    #[error("{service} rejected the request: {detail}")]
    Rejected {
        service: &'static str,
        detail: String,
    },

    #[error("invalid response from {service}: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Upstream response passed through to the caller.
#[derive(Debug)]
pub struct Relayed {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl Relayed {
    fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(HeaderValue::from_static(content_type));
        self
    }
}

impl IntoResponse for Relayed {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Row of the raw data relayed by `/request-data/ABS/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AbsDataRow {
    #[serde(default)]
    pub measure: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub tsest: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub freq: String,
    #[serde(default)]
    pub time_period: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub status: String,
}

#[derive(Serialize)]
struct DataflowRequest<'a> {
    dataflowid: &'a str,
}

async fn send(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<Relayed, UpstreamError> {
    let start = Instant::now();
    let result = async {
        let response = request.send().await?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>(Relayed {
            status,
            content_type,
            body,
        })
    }
    .await;
    histogram!(UPSTREAM_DURATION, "service" => service).record(start.elapsed().as_secs_f64());

    result.map_err(|source| {
        counter!(UPSTREAM_FAILURES, "service" => service).increment(1);
        tracing::warn!(service, error = %source, "upstream call failed");
        UpstreamError::Unavailable { service, source }
    })
}

fn ensure_success(service: &'static str, relayed: Relayed) -> Result<Relayed, UpstreamError> {
    if relayed.status.is_success() {
        return Ok(relayed);
    }
    counter!(UPSTREAM_FAILURES, "service" => service).increment(1);
    tracing::warn!(service, status = %relayed.status, "upstream returned an error status");
    Err(UpstreamError::Status {
        service,
        status: relayed.status,
        content_type: relayed.content_type,
        body: relayed.body,
    })
}

fn decode_error(service: &'static str, error: impl std::fmt::Display) -> UpstreamError {
    tracing::warn!(service, error = %error, "could not decode upstream response");
    UpstreamError::Decode {
        service,
        reason: error.to_string(),
    }
}

/// Appends path segments to `base`. An empty trailing segment yields a
/// trailing slash.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Client for the companion plot service.
#[derive(Clone, Debug)]
pub struct PlotService {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    request_data_timeout: Duration,
}

impl PlotService {
    pub fn new(client: reqwest::Client, config: &PlotServiceConfig) -> Result<Self, UpstreamError> {
        let base = Url::parse(&format!("http://{}:{}/", config.host, config.port))?;
        Ok(PlotService {
            client,
            base,
            timeout: Duration::from_secs(config.timeout_secs),
            request_data_timeout: Duration::from_secs(config.request_data_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// GET `/plot/{graph}/{dataflow}`, relayed as HTML with the upstream status.
    pub async fn plot(&self, graph: GraphKind, dataflow: &str) -> Result<Relayed, UpstreamError> {
        let url = endpoint(&self.base, &["plot", graph.as_str(), dataflow])?;
        tracing::debug!(%url, "requesting plot");
        let relayed = send(PLOT_SERVICE, self.client.get(url).timeout(self.timeout)).await?;
        Ok(relayed.with_content_type("text/html; charset=utf-8"))
    }

    /// GET `/plot/test` or `/plot/test/json`.
    pub async fn test_plot(&self, json: bool) -> Result<Relayed, UpstreamError> {
        let url = if json {
            endpoint(&self.base, &["plot", "test", "json"])?
        } else {
            endpoint(&self.base, &["plot", "test"])?
        };
        let relayed = send(PLOT_SERVICE, self.client.get(url).timeout(self.timeout)).await?;
        Ok(if json {
            relayed
        } else {
            relayed.with_content_type("text/html; charset=utf-8")
        })
    }

    /// Forwards normalized observations to the dashboard renderer.
    pub async fn dashboard(
        &self,
        dataflow: &str,
        observations: &[Observation],
    ) -> Result<Relayed, UpstreamError> {
        let url = endpoint(&self.base, &["dashboard", "api", dataflow, ""])?;
        tracing::debug!(%url, count = observations.len(), "forwarding observations");
        let request = self.client.post(url).json(observations).timeout(self.timeout);
        let relayed = send(PLOT_SERVICE, request).await?;
        Ok(relayed.with_content_type("text/html; charset=utf-8"))
    }

    pub async fn request_data(&self, dataflow: &str) -> Result<Vec<AbsDataRow>, UpstreamError> {
        let url = endpoint(&self.base, &["request-data", "ABS", ""])?;
        let request = self
            .client
            .post(url)
            .json(&DataflowRequest { dataflowid: dataflow })
            .timeout(self.request_data_timeout);
        let relayed = ensure_success(PLOT_SERVICE, send(PLOT_SERVICE, request).await?)?;

        serde_json::from_slice(&relayed.body).map_err(|e| decode_error(PLOT_SERVICE, e))
    }

    pub async fn refresh_dashboard(&self, dataflow: &str) -> Result<RefreshStatus, UpstreamError> {
        let url = endpoint(&self.base, &["refresh-dashboard", ""])?;
        let request = self
            .client
            .post(url)
            .json(&DataflowRequest { dataflowid: dataflow })
            .timeout(self.timeout);
        let relayed = ensure_success(PLOT_SERVICE, send(PLOT_SERVICE, request).await?)?;

        let value: Value =
            serde_json::from_slice(&relayed.body).map_err(|e| decode_error(PLOT_SERVICE, e))?;
        check_failure(PLOT_SERVICE, &value)?;
        match value.get("status").and_then(Value::as_str) {
            Some(status) => Ok(RefreshStatus {
                status: status.to_string(),
            }),
            None => Err(decode_error(PLOT_SERVICE, "missing status field")),
        }
    }
}

/// Turns a `{"status": "failed", "message": ..}` payload into an error.
pub fn check_failure(service: &'static str, value: &Value) -> Result<(), UpstreamError> {
    if value.get("status").and_then(Value::as_str) != Some("failed") {
        return Ok(());
    }
    counter!(UPSTREAM_FAILURES, "service" => service).increment(1);
    let detail = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    tracing::warn!(service, %detail, "upstream reported failure");
    Err(UpstreamError::Rejected { service, detail })
}

/// Client for the ABS SDMX REST API.
#[derive(Clone, Debug)]
pub struct StatisticsApi {
    client: reqwest::Client,
    base: Url,
    api_key: String,
    timeout: Duration,
}

impl StatisticsApi {
    pub fn new(client: reqwest::Client, config: &StatisticsApiConfig, api_key: String) -> Self {
        StatisticsApi {
            client,
            base: config.base_url.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn get(&self, url: Url, accept: &'static str) -> reqwest::RequestBuilder {
        tracing::debug!(%url, "fetching from statistics API");
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .timeout(self.timeout);
        if !self.api_key.is_empty() {
            request = request.header("x-api-key", &self.api_key);
        }
        request
    }

    // Error statuses with an SDMX error body are rejections, everything else
    // is relayed.
    async fn fetch(&self, url: Url, accept: &'static str) -> Result<Bytes, UpstreamError> {
        let relayed = send(STATISTICS_API, self.get(url, accept)).await?;
        if !relayed.status.is_success() {
            if let Some(detail) = sdmx::describe_errors(&relayed.body) {
                counter!(UPSTREAM_FAILURES, "service" => STATISTICS_API).increment(1);
                tracing::warn!(status = %relayed.status, "statistics API rejected the request");
                return Err(UpstreamError::Rejected {
                    service: STATISTICS_API,
                    detail,
                });
            }
        }
        Ok(ensure_success(STATISTICS_API, relayed)?.body)
    }

    /// Observations of `dataflow` for the given series key.
    pub async fn observations(
        &self,
        dataflow: &str,
        key: &str,
    ) -> Result<Vec<Observation>, UpstreamError> {
        let mut url = endpoint(&self.base, &["rest", "data", dataflow, key])?;
        url.query_pairs_mut().append_pair("detail", "dataonly");

        let body = self.fetch(url, SDMX_DATA_JSON).await?;
        sdmx::parse_observations(&body).map_err(|e| decode_error(STATISTICS_API, e))
    }

    /// Same as [`StatisticsApi::observations`], through the labelled CSV format.
    pub async fn observations_csv(
        &self,
        dataflow: &str,
        key: &str,
    ) -> Result<Vec<Observation>, UpstreamError> {
        let mut url = endpoint(&self.base, &["rest", "data", dataflow, key])?;
        url.query_pairs_mut()
            .append_pair("format", "csvfilewithlabels")
            .append_pair("detail", "dataonly");

        let body = self.fetch(url, "text/csv").await?;
        sdmx::parse_csv_observations(&body).map_err(|e| decode_error(STATISTICS_API, e))
    }

    /// All dataflow stubs, along with the raw response body.
    pub async fn dataflows(&self) -> Result<(Vec<Dataflow>, Bytes), UpstreamError> {
        let mut url = endpoint(&self.base, &["rest", "dataflow", "all"])?;
        url.query_pairs_mut().append_pair("detail", "allstubs");

        let body = self.fetch(url, SDMX_STRUCTURE_JSON).await?;
        let dataflows = sdmx::parse_dataflows(&body)
            .map_err(|e: DecodeError| decode_error(STATISTICS_API, e))?;
        Ok((dataflows, body))
    }
}
