//! Inspection record models.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(Verdict::Pass),
            "fail" => Ok(Verdict::Fail),
            other => Err(anyhow!("unknown verdict '{other}' (expected pass or fail)")),
        }
    }
}

/// Where the verdict of a record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Automatic,
    Operator,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Automatic => "automatic",
            VerdictSource::Operator => "operator",
        }
    }
}

/// Record handed to the inspection store once a verdict is established.
///
/// `id` is the capture id of the cycle, so writing the same record twice is
/// a no-op at the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewInspection {
    pub id: String,
    pub serial_no: String,
    pub status: Verdict,
    pub meter_id: String,
    pub client: String,
    pub verdict_source: VerdictSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
    pub id: String,
    pub serial_no: String,
    pub status: Verdict,
    pub meter_id: String,
    pub client: String,
    pub verdict_source: VerdictSource,
    pub recorded_at: DateTime<Utc>,
}

/// Pass/fail counters for the analytics view, overall and for the current UTC day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionStats {
    pub total: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub today_total: u64,
    pub today_correct: u64,
    pub today_incorrect: u64,
}
