use std::fmt;

use chrono::Utc;
use serde::Serialize;

use crate::{
    db::{InspectionRecord, InspectionStats, MeterSummary, Verdict},
    AppState,
};

use super::{
    EditableField, ErrorKind, InspectionController, SessionField, WorkflowError,
    WorkflowSnapshot,
};

/// Failure shape handed to the view.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
    pub fields: Vec<SessionField>,
}

impl From<WorkflowError> for CommandError {
    fn from(err: WorkflowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            fields: err.fields().to_vec(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn controller_from_state(state: &AppState) -> InspectionController {
    state.workflow.clone()
}

pub async fn get_workflow_state(state: &AppState) -> WorkflowSnapshot {
    let controller = controller_from_state(state);
    controller.snapshot().await
}

pub async fn list_meters(state: &AppState) -> Result<Vec<MeterSummary>, CommandError> {
    let controller = controller_from_state(state);
    let meters = controller.list_meters().await?;
    Ok(meters.iter().map(MeterSummary::from).collect())
}

pub async fn select_meter(
    state: &AppState,
    meter_id: String,
) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.select_meter(&meter_id).await?)
}

pub async fn edit_field(
    state: &AppState,
    field: EditableField,
    value: String,
) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.edit_field(field, value).await?)
}

pub async fn capture_or_retry(state: &AppState) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.capture_or_retry().await?)
}

pub async fn submit_operator_decision(
    state: &AppState,
    decision: Verdict,
) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.submit_operator_decision(decision).await?)
}

pub async fn resubmit_record(state: &AppState) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.resubmit_record().await?)
}

pub async fn recapture_master(state: &AppState) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.recapture_master().await?)
}

pub async fn continue_cycle(state: &AppState) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.continue_cycle().await?)
}

pub async fn submit_new_cycle(state: &AppState) -> Result<WorkflowSnapshot, CommandError> {
    let controller = controller_from_state(state);
    Ok(controller.submit_new_cycle().await?)
}

pub async fn abandon_cycle(state: &AppState) -> WorkflowSnapshot {
    let controller = controller_from_state(state);
    controller.abandon().await
}

pub async fn list_inspections(
    state: &AppState,
    limit: usize,
) -> Result<Vec<InspectionRecord>, String> {
    let db = &state.db;
    db.list_inspections(limit).await.map_err(|e| e.to_string())
}

pub async fn get_inspection_stats(state: &AppState) -> Result<InspectionStats, String> {
    let db = &state.db;
    db.get_inspection_stats(Utc::now())
        .await
        .map_err(|e| e.to_string())
}
