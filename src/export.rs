//! Export contract for the reporting layer: aggregated metrics plus raw
//! outcomes, flattened so a CSV-style writer gets one row per request and a
//! JSON-style writer gets the full snapshot. The engine itself writes no
//! files.

use serde::Serialize;

use crate::metrics::RunSnapshot;
use crate::session::CompletedRun;
use crate::types::RequestOutcome;

/// One flat record per raw request outcome.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRow {
    pub method: String,
    pub path: String,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    pub timestamp: String,
    pub success: bool,
    #[serde(rename = "errorKind")]
    pub error_kind: Option<String>,
}

impl From<&RequestOutcome> for OutcomeRow {
    fn from(outcome: &RequestOutcome) -> Self {
        Self {
            method: outcome.endpoint.method.to_string(),
            path: outcome.endpoint.path.clone(),
            status_code: outcome.status_code,
            latency_ms: outcome.latency_ms,
            timestamp: outcome.timestamp.to_rfc3339(),
            success: outcome.success,
            error_kind: outcome.error_kind.map(|kind| kind.to_string()),
        }
    }
}

pub fn outcome_rows(outcomes: &[RequestOutcome]) -> Vec<OutcomeRow> {
    outcomes.iter().map(OutcomeRow::from).collect()
}

/// Full run export: the terminal snapshot plus every raw outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    pub snapshot: RunSnapshot,
    pub outcomes: Vec<OutcomeRow>,
}

impl From<&CompletedRun> for RunExport {
    fn from(run: &CompletedRun) -> Self {
        Self {
            snapshot: run.snapshot.clone(),
            outcomes: outcome_rows(&run.outcomes),
        }
    }
}
