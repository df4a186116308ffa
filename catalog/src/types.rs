use serde::{Deserialize, Serialize};

/// A statistical series definition as published by the statistics API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataflow {
    pub id: String,
    pub version: String,
    pub agency_id: String,
    pub is_external_reference: bool,
    pub is_final: bool,
    pub name: String,
}

/// A single measured value at a time period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub period: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
}

impl Observation {
    pub fn new<P: Into<String>>(period: P, value: f64) -> Self {
        Observation {
            period: period.into(),
            value,
            region: None,
            measure: None,
        }
    }
}

/// A point of the CPI series, keyed by time period in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct CpiObservation {
    pub time_period: String,
    pub value: f64,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ObservationError {
    #[error("observation has an empty time period")]
    EmptyPeriod,
    #[error("observation for {0} has a non-finite value")]
    NonFiniteValue(String),
}

impl TryFrom<&Observation> for CpiObservation {
    type Error = ObservationError;

    fn try_from(observation: &Observation) -> Result<Self, Self::Error> {
        let time_period = observation.period.trim();
        if time_period.is_empty() {
            return Err(ObservationError::EmptyPeriod);
        }
        if !observation.value.is_finite() {
            return Err(ObservationError::NonFiniteValue(time_period.to_string()));
        }

        Ok(CpiObservation {
            time_period: time_period.to_string(),
            value: observation.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpi_observation_shape() {
        let ok = CpiObservation::try_from(&Observation::new(" 2024-Q1 ", 130.5)).unwrap();
        assert_eq!(ok.time_period, "2024-Q1");
        assert_eq!(ok.value, 130.5);

        assert_eq!(
            CpiObservation::try_from(&Observation::new("", 1.0)),
            Err(ObservationError::EmptyPeriod)
        );
        assert_eq!(
            CpiObservation::try_from(&Observation::new("2024-Q2", f64::NAN)),
            Err(ObservationError::NonFiniteValue("2024-Q2".into()))
        );
    }

    #[test]
    fn test_observation_serializes_without_empty_labels() {
        let json = serde_json::to_string(&Observation::new("2024-Q1", 1.5)).unwrap();
        assert_eq!(json, r#"{"period":"2024-Q1","value":1.5}"#);
    }
}
