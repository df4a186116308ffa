use crate::errors::GatewayError;
use crate::metrics_defs::VALIDATION_REJECTIONS;
use catalog::DataflowCatalog;
use shared::counter;
use std::fmt;
use std::str::FromStr;

/// Chart types the plot service can render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphKind {
    Line,
    Bar,
    Pie,
    Scatter,
}

impl GraphKind {
    pub const ALL: [GraphKind; 4] = [
        GraphKind::Line,
        GraphKind::Bar,
        GraphKind::Pie,
        GraphKind::Scatter,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Line => "line",
            GraphKind::Bar => "bar",
            GraphKind::Pie => "pie",
            GraphKind::Scatter => "scatter",
        }
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub struct UnknownGraph;

impl FromStr for GraphKind {
    type Err = UnknownGraph;

    // Case-sensitive: "Line" is not a graph kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GraphKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(UnknownGraph)
    }
}

pub fn validate_graph_name(name: &str) -> Result<GraphKind, GatewayError> {
    name.parse().map_err(|_| {
        counter!(VALIDATION_REJECTIONS, "field" => "graph").increment(1);
        tracing::info!(graph = name, "rejected graph name");
        GatewayError::InvalidGraph(name.to_string())
    })
}

/// Upper-cases `id` and checks that the catalog holds exactly that identifier.
///
/// Returns the normalized identifier. Catalog failures are store errors, not
/// validation failures.
pub async fn validate_dataflow_name(
    id: &str,
    catalog: &dyn DataflowCatalog,
) -> Result<String, GatewayError> {
    let normalized = id.to_uppercase();
    if !normalized.is_empty() && catalog.contains(&normalized).await? {
        return Ok(normalized);
    }

    counter!(VALIDATION_REJECTIONS, "field" => "dataflow").increment(1);
    tracing::info!(dataflow = %normalized, "rejected dataflow name");
    Err(GatewayError::InvalidDataflow(normalized))
}
