//! Decoding of statistics API payloads.
//!
//! Observation values in SDMX-JSON data messages may be strings, numbers or
//! null. Values that do not parse to a finite number are dropped; they never
//! fail the message as a whole.

use catalog::{Dataflow, Observation};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing CSV column {0}")]
    MissingColumn(&'static str),
}

#[derive(Deserialize)]
struct DataMessage {
    data: DataBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataBody {
    #[serde(default)]
    data_sets: Vec<DataSet>,
    #[serde(default)]
    structure: Option<Structure>,
    #[serde(default)]
    structures: Vec<Structure>,
}

#[derive(Deserialize)]
struct DataSet {
    #[serde(default)]
    series: BTreeMap<String, Series>,
}

#[derive(Deserialize)]
struct Series {
    #[serde(default)]
    observations: BTreeMap<String, Vec<Value>>,
}

#[derive(Deserialize)]
struct Structure {
    dimensions: Dimensions,
}

#[derive(Deserialize)]
struct Dimensions {
    #[serde(default)]
    observation: Vec<Dimension>,
}

#[derive(Deserialize)]
struct Dimension {
    #[serde(default)]
    values: Vec<DimensionValue>,
}

#[derive(Deserialize)]
struct DimensionValue {
    id: String,
}

/// Parses the observations of every series in an SDMX-JSON data message.
///
/// Observation keys are positions into the time dimension. When the message
/// carries that dimension the keys are resolved to period ids, otherwise the
/// key itself is used as the period.
pub fn parse_observations(body: &[u8]) -> Result<Vec<Observation>, DecodeError> {
    let message: DataMessage = serde_json::from_slice(body)?;
    let periods = message
        .data
        .structure
        .as_ref()
        .or(message.data.structures.first())
        .and_then(|structure| structure.dimensions.observation.first())
        .map(|dimension| dimension.values.as_slice())
        .unwrap_or_default();

    let mut observations = Vec::new();
    for data_set in &message.data.data_sets {
        for series in data_set.series.values() {
            let mut entries: Vec<(&String, &Vec<Value>)> = series.observations.iter().collect();
            entries.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));

            for (key, values) in entries {
                let Some(value) = values.first().and_then(normalize_value) else {
                    tracing::debug!(key = %key, "dropping non-numeric observation");
                    continue;
                };
                let period = key
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| periods.get(index))
                    .map_or_else(|| key.clone(), |period| period.id.clone());
                observations.push(Observation::new(period, value));
            }
        }
    }

    Ok(observations)
}

/// Best-effort conversion of an observation value to a finite float.
pub fn normalize_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

#[derive(Deserialize)]
struct ErrorMessage {
    errors: Vec<SdmxError>,
}

#[derive(Deserialize)]
struct SdmxError {
    #[serde(default)]
    id: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    code: Value,
    #[serde(default)]
    source: SdmxErrorSource,
}

#[derive(Deserialize, Default)]
struct SdmxErrorSource {
    #[serde(default)]
    parameter: String,
}

/// Renders a structured SDMX error body, or `None` if the body is not one.
pub fn describe_errors(body: &[u8]) -> Option<String> {
    let message: ErrorMessage = serde_json::from_slice(body).ok()?;
    if message.errors.is_empty() {
        return None;
    }

    let mut detail = String::from("ABS API Errors:\n");
    for error in &message.errors {
        let code = match &error.code {
            Value::String(code) => code.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        detail.push_str(&format!(
            "{} - {} (Code: {}, Parameter: {})\n",
            error.id, error.detail, code, error.source.parameter
        ));
    }
    Some(detail)
}

#[derive(Deserialize)]
struct StructureMessage {
    data: StructureBody,
}

#[derive(Deserialize)]
struct StructureBody {
    #[serde(default)]
    dataflows: Vec<DataflowStub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataflowStub {
    id: String,
    version: String,
    #[serde(rename = "agencyID")]
    agency_id: String,
    #[serde(default)]
    is_external_reference: bool,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    name: String,
}

/// Parses the dataflow stubs of an SDMX-JSON structure message.
pub fn parse_dataflows(body: &[u8]) -> Result<Vec<Dataflow>, DecodeError> {
    let message: StructureMessage = serde_json::from_slice(body)?;
    Ok(message
        .data
        .dataflows
        .into_iter()
        .map(|stub| Dataflow {
            id: stub.id,
            version: stub.version,
            agency_id: stub.agency_id,
            is_external_reference: stub.is_external_reference,
            is_final: stub.is_final,
            name: stub.name,
        })
        .collect())
}

/// Parses a `csvfilewithlabels` data response.
///
/// Rows whose `OBS_VALUE` is not numeric are dropped, like unparseable JSON
/// observations.
pub fn parse_csv_observations(body: &[u8]) -> Result<Vec<Observation>, DecodeError> {
    let mut reader = csv::Reader::from_reader(body);
    let headers = reader.headers()?.clone();
    let column = |name: &'static str| headers.iter().position(|header| header == name);

    let period_idx = column("TIME_PERIOD").ok_or(DecodeError::MissingColumn("TIME_PERIOD"))?;
    let value_idx = column("OBS_VALUE").ok_or(DecodeError::MissingColumn("OBS_VALUE"))?;
    let region_idx = column("Region");
    let measure_idx = column("Measure");

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let raw = record.get(value_idx).unwrap_or_default();
        let Some(value) = normalize_value(&Value::String(raw.to_string())) else {
            tracing::debug!(value = raw, "dropping non-numeric CSV observation");
            continue;
        };

        let label = |idx: Option<usize>| {
            idx.and_then(|idx| record.get(idx))
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        };
        observations.push(Observation {
            period: record.get(period_idx).unwrap_or_default().to_string(),
            value,
            region: label(region_idx),
            measure: label(measure_idx),
        });
    }

    Ok(observations)
}
