use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and plot service cannot share {0}")]
    PortConflict(String),

    #[error("Template directory cannot be empty")]
    EmptyTemplateDir,

    #[error("Plot service host cannot be empty")]
    EmptyPlotServiceHost,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming requests
    #[serde(default)]
    pub listener: Listener,
    /// Companion plot service that renders chart HTML
    pub plot_service: PlotServiceConfig,
    /// External statistics API (ABS SDMX REST)
    #[serde(default)]
    pub statistics_api: StatisticsApiConfig,
    /// Directory holding the HTML templates
    pub html_templates: PathBuf,
    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Identifier of the statistics provider, e.g. "ABS"
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default)]
    pub dataflow_cache: DataflowCacheConfig,
    /// Upper bound on draining in-flight requests at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.plot_service.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.plot_service.host.is_empty() {
            return Err(ValidationError::EmptyPlotServiceHost);
        }
        if self.plot_service.host == self.listener.host && self.plot_service.port == self.listener.port {
            return Err(ValidationError::PortConflict(format!(
                "{}:{}",
                self.listener.host, self.listener.port
            )));
        }

        if self.html_templates.as_os_str().is_empty() {
            return Err(ValidationError::EmptyTemplateDir);
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlotServiceConfig {
    pub host: String,
    pub port: u16,
    /// Timeout for plot, dashboard and refresh calls
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for raw data requests, which proxy a slow statistics API call
    #[serde(default = "default_request_data_timeout_secs")]
    pub request_data_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StatisticsApiConfig {
    /// Base URL of the SDMX REST API
    ///
    /// Note: Uses the `url::Url` type so invalid URLs are rejected during
    /// config deserialization.
    #[serde(default = "default_statistics_api_url")]
    pub base_url: Url,
    /// Series key requested for dashboards; each dot separates a wildcarded dimension
    #[serde(default = "default_dashboard_key")]
    pub dashboard_key: String,
    /// Dataflow the CPI import reads from
    #[serde(default = "default_cpi_dataflow")]
    pub cpi_dataflow: String,
    /// Series key of the CPI import
    #[serde(default = "default_cpi_key")]
    pub cpi_key: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the bulk dataflow refresh writes the raw API response, if anywhere
    #[serde(default)]
    pub dataflow_snapshot: Option<PathBuf>,
}

impl Default for StatisticsApiConfig {
    fn default() -> Self {
        StatisticsApiConfig {
            base_url: default_statistics_api_url(),
            dashboard_key: default_dashboard_key(),
            cpi_dataflow: default_cpi_dataflow(),
            cpi_key: default_cpi_key(),
            timeout_secs: default_upstream_timeout_secs(),
            dataflow_snapshot: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DataflowCacheConfig {
    /// Seconds a dataflow lookup stays cached. 0 disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

impl Default for DataflowCacheConfig {
    fn default() -> Self {
        DataflowCacheConfig {
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_capacity(),
        }
    }
}

/// Launching of the companion plot service process
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_python_path")]
    pub python_path: PathBuf,
    /// ASGI application passed to uvicorn, e.g. "python_ds.main:app"
    #[serde(default = "default_plot_service_script")]
    pub plot_service_script: String,
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,
    /// Kill whatever holds the listener and plot service ports before starting
    #[serde(default = "default_free_ports")]
    pub free_ports: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            enabled: false,
            python_path: default_python_path(),
            plot_service_script: default_plot_service_script(),
            app_dir: default_app_dir(),
            free_ports: default_free_ports(),
        }
    }
}

fn default_static_dir() -> PathBuf {
    "static".into()
}

fn default_data_source() -> String {
    "ABS".into()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_upstream_timeout_secs() -> u64 {
    10
}

fn default_request_data_timeout_secs() -> u64 {
    120
}

fn default_statistics_api_url() -> Url {
    Url::parse("https://data.api.abs.gov.au").expect("static URL is valid")
}

fn default_dashboard_key() -> String {
    "......".into()
}

fn default_cpi_dataflow() -> String {
    "ABS,CPI".into()
}

fn default_cpi_key() -> String {
    "1.115486.10.50.Q".into()
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_cache_capacity() -> u64 {
    1000
}

fn default_python_path() -> PathBuf {
    "python".into()
}

fn default_plot_service_script() -> String {
    "python_ds.main:app".into()
}

fn default_app_dir() -> PathBuf {
    "..".into()
}

fn default_free_ports() -> bool {
    true
}
