use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::state::{Phase, SessionField};

/// The categories the view distinguishes when presenting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Missing or unknown input; nothing changed.
    Validation,
    /// A remote call failed; the session is back in its pre-call state.
    Transport,
    /// The operation is not allowed in the current state; nothing changed.
    InvalidTransition,
    /// A result arrived for a cycle that was abandoned and was dropped.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SelectMeter,
    EditField,
    Capture,
    Retry,
    ApplyComparison,
    OperatorDecision,
    ApplyRecordOutcome,
    ResubmitRecord,
    RecaptureMaster,
    ApplyMaster,
    Continue,
    SubmitNewCycle,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::SelectMeter => "select a meter",
            Operation::EditField => "edit fields",
            Operation::Capture => "capture",
            Operation::Retry => "retry",
            Operation::ApplyComparison => "apply a comparison result",
            Operation::OperatorDecision => "submit an operator decision",
            Operation::ApplyRecordOutcome => "apply a record outcome",
            Operation::ResubmitRecord => "resubmit the record",
            Operation::RecaptureMaster => "recapture the master image",
            Operation::ApplyMaster => "apply a master image",
            Operation::Continue => "continue",
            Operation::SubmitNewCycle => "submit",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    Comparison,
    MasterCapture,
    CatalogLookup,
    RecordStore,
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RemoteCall::Comparison => "comparison",
            RemoteCall::MasterCapture => "master capture",
            RemoteCall::CatalogLookup => "catalog lookup",
            RemoteCall::RecordStore => "record store",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("missing required fields: {}", join_fields(.missing))]
    Validation { missing: Vec<SessionField> },

    #[error("meter {meter_id} is not in the catalog")]
    UnknownMeter { meter_id: String },

    #[error("cannot {operation} while the session is {phase}")]
    InvalidTransition { operation: Operation, phase: Phase },

    #[error("cannot {operation} while the inspection record is {status}")]
    RecordState {
        operation: Operation,
        status: &'static str,
    },

    #[error("{call} failed: {reason}")]
    Transport { call: RemoteCall, reason: String },

    #[error("{call} result arrived after the cycle was abandoned and was discarded")]
    Abandoned { call: RemoteCall },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation { .. } | WorkflowError::UnknownMeter { .. } => {
                ErrorKind::Validation
            }
            WorkflowError::InvalidTransition { .. } | WorkflowError::RecordState { .. } => {
                ErrorKind::InvalidTransition
            }
            WorkflowError::Transport { .. } => ErrorKind::Transport,
            WorkflowError::Abandoned { .. } => ErrorKind::Abandoned,
        }
    }

    pub(crate) fn transport(call: RemoteCall, err: &anyhow::Error) -> Self {
        WorkflowError::Transport {
            call,
            reason: format!("{err:#}"),
        }
    }

    /// Fields the view should highlight, if any.
    pub fn fields(&self) -> &[SessionField] {
        match self {
            WorkflowError::Validation { missing } => missing,
            _ => &[],
        }
    }
}

fn join_fields(fields: &[SessionField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
