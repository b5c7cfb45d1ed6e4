use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{Verdict, VerdictSource};

pub fn to_i64(value: usize, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{field} value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_verdict(value: &str) -> Result<Verdict> {
    value
        .parse()
        .with_context(|| format!("unknown inspection status {value}"))
}

pub fn parse_verdict_source(value: &str) -> Result<VerdictSource> {
    match value {
        "automatic" => Ok(VerdictSource::Automatic),
        "operator" => Ok(VerdictSource::Operator),
        other => Err(anyhow!("unknown verdict source {other}")),
    }
}
