//! Session state of one inspection station and the transition table that
//! drives it.
//!
//! `apply` is pure: it never talks to a collaborator. Remote work is
//! requested through [`Effect`]s and its outcome comes back as another
//! event tagged with the epoch the work was issued under.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    db::{Meter, NewInspection, Verdict, VerdictSource},
    images::ImageRef,
    vision::CompareRequest,
};

use super::{
    error::{Operation, RemoteCall, WorkflowError},
    verdict::{ComparisonOutcome, Resolution},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Ready,
    AwaitingResult,
    AutoDecided,
    NeedsOperatorInput,
    Decided,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Ready => "ready",
            Phase::AwaitingResult => "awaiting a result",
            Phase::AutoDecided => "auto-decided",
            Phase::NeedsOperatorInput => "waiting for an operator decision",
            Phase::Decided => "decided",
        };
        f.write_str(label)
    }
}

/// Fields the operator types in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EditableField {
    SerialNumber,
    Client,
}

/// Fields a capture depends on; named in validation errors.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionField {
    SerialNumber,
    Client,
    Meter,
    MasterImage,
}

impl fmt::Display for SessionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionField::SerialNumber => "serial number",
            SessionField::Client => "client",
            SessionField::Meter => "meter",
            SessionField::MasterImage => "master image",
        };
        f.write_str(label)
    }
}

/// Persistence state of the record for the current capture.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum RecordStatus {
    Pending,
    Saved,
    Failed(String),
}

impl RecordStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Saved => "saved",
            RecordStatus::Failed(_) => "not saved",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeterSelection {
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionSession {
    pub phase: Phase,
    pub serial_number: String,
    pub client: String,
    pub meter: Option<MeterSelection>,
    pub master_image: Option<ImageRef>,
    pub captured_image: Option<ImageRef>,
    pub diff_image: Option<ImageRef>,
    pub operator_decision_required: bool,
    /// Verdict the service offered alongside an operator-decision request.
    pub suggested_verdict: Option<Verdict>,
    pub verdict: Option<Verdict>,
    pub verdict_source: Option<VerdictSource>,
    /// Identity of the current capture attempt; also the record id.
    pub capture_id: Option<String>,
    pub record: Option<RecordStatus>,
    /// Set by submit: the next cycle must start from a fresh meter pick.
    pub master_invalidated: bool,
    /// Generation counter; results tagged with an older epoch are dropped.
    pub epoch: u64,
}

impl InspectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_comparing(&self) -> bool {
        self.phase == Phase::AwaitingResult
    }

    pub fn is_submitting(&self) -> bool {
        self.record == Some(RecordStatus::Pending)
    }

    pub fn missing_for_capture(&self) -> Vec<SessionField> {
        let mut missing = Vec::new();
        if self.serial_number.trim().is_empty() {
            missing.push(SessionField::SerialNumber);
        }
        if self.client.trim().is_empty() {
            missing.push(SessionField::Client);
        }
        if self.meter.is_none() {
            missing.push(SessionField::Meter);
        }
        if self.master_image.is_none() {
            missing.push(SessionField::MasterImage);
        }
        missing
    }

    pub fn capture_request(&self) -> Result<CompareRequest, WorkflowError> {
        let missing = self.missing_for_capture();
        match (&self.meter, &self.master_image) {
            (Some(meter), Some(master)) if missing.is_empty() => Ok(CompareRequest {
                serial_number: self.serial_number.trim().to_string(),
                model_type: meter.model.clone(),
                master_image: master.clone(),
            }),
            _ => Err(WorkflowError::Validation { missing }),
        }
    }

    /// The record for the current capture, once a verdict is known.
    pub fn inspection_record(&self) -> Option<NewInspection> {
        Some(NewInspection {
            id: self.capture_id.clone()?,
            serial_no: self.serial_number.trim().to_string(),
            status: self.verdict?,
            meter_id: self.meter.as_ref()?.id.clone(),
            client: self.client.trim().to_string(),
            verdict_source: self.verdict_source?,
        })
    }

    fn clear_capture(&mut self) {
        self.captured_image = None;
        self.diff_image = None;
        self.operator_decision_required = false;
        self.suggested_verdict = None;
        self.verdict = None;
        self.verdict_source = None;
        self.capture_id = None;
        self.record = None;
    }

    fn reset(&self) -> Self {
        Self {
            epoch: self.epoch + 1,
            ..Self::default()
        }
    }

    /// First broken structural rule, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        let holds_capture = matches!(
            self.phase,
            Phase::AutoDecided | Phase::NeedsOperatorInput | Phase::Decided
        );
        if self.captured_image.is_some() != holds_capture {
            return Some("captured image must be present exactly while a result is held");
        }
        if self.verdict.is_some() && self.captured_image.is_none() {
            return Some("verdict without a captured image");
        }
        if self.verdict.is_some() != self.record.is_some() {
            return Some("record status must track the verdict");
        }
        if self.operator_decision_required
            && self.verdict.is_some()
            && self.verdict_source != Some(VerdictSource::Operator)
        {
            return Some("operator-required verdict must come from the operator");
        }
        if (self.phase == Phase::Idle) != self.meter.is_none() {
            return Some("a meter is selected exactly when the session is not idle");
        }
        match self.phase {
            Phase::AwaitingResult if self.capture_id.is_none() => {
                Some("capture in flight without a capture id")
            }
            Phase::AutoDecided
                if self.verdict_source != Some(VerdictSource::Automatic)
                    || self.record != Some(RecordStatus::Pending) =>
            {
                Some("auto-decided session must hold a pending automatic verdict")
            }
            Phase::NeedsOperatorInput if self.verdict.is_some() => {
                Some("operator input pending but a verdict is already set")
            }
            Phase::Decided if self.verdict.is_none() => Some("decided session without a verdict"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    SelectMeter(Meter),
    EditField {
        field: EditableField,
        value: String,
    },
    CaptureOrRetry {
        capture_id: String,
    },
    ComparisonCompleted {
        epoch: u64,
        outcome: ComparisonOutcome,
    },
    ComparisonFailed {
        epoch: u64,
    },
    OperatorDecision(Verdict),
    RecordSaved {
        epoch: u64,
    },
    RecordFailed {
        epoch: u64,
        reason: String,
    },
    ResubmitRecord,
    RecaptureMaster,
    MasterRecaptured {
        epoch: u64,
        image: ImageRef,
    },
    Continue,
    SubmitNewCycle,
    Abandon,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::SelectMeter(_) => "selectMeter",
            WorkflowEvent::EditField { .. } => "editField",
            WorkflowEvent::CaptureOrRetry { .. } => "captureOrRetry",
            WorkflowEvent::ComparisonCompleted { .. } => "comparisonCompleted",
            WorkflowEvent::ComparisonFailed { .. } => "comparisonFailed",
            WorkflowEvent::OperatorDecision(_) => "submitOperatorDecision",
            WorkflowEvent::RecordSaved { .. } => "recordSaved",
            WorkflowEvent::RecordFailed { .. } => "recordFailed",
            WorkflowEvent::ResubmitRecord => "resubmitRecord",
            WorkflowEvent::RecaptureMaster => "recaptureMaster",
            WorkflowEvent::MasterRecaptured { .. } => "masterRecaptured",
            WorkflowEvent::Continue => "continue",
            WorkflowEvent::SubmitNewCycle => "submitNewCycle",
            WorkflowEvent::Abandon => "abandon",
        }
    }
}

/// Remote work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Compare { epoch: u64, request: CompareRequest },
    PersistRecord { epoch: u64, record: NewInspection },
    CaptureMaster { epoch: u64 },
    /// Drop cached catalog data so the next meter pick sees fresh master images.
    RefreshCatalog,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub session: InspectionSession,
    pub effects: Vec<Effect>,
}

fn invalid(operation: Operation, session: &InspectionSession) -> WorkflowError {
    WorkflowError::InvalidTransition {
        operation,
        phase: session.phase,
    }
}

fn ensure_current(
    session: &InspectionSession,
    epoch: u64,
    call: RemoteCall,
) -> Result<(), WorkflowError> {
    if session.epoch == epoch {
        Ok(())
    } else {
        Err(WorkflowError::Abandoned { call })
    }
}

/// Refuses while a record write is in flight.
fn ensure_not_pending(
    session: &InspectionSession,
    operation: Operation,
) -> Result<(), WorkflowError> {
    match &session.record {
        Some(status @ RecordStatus::Pending) => Err(WorkflowError::RecordState {
            operation,
            status: status.label(),
        }),
        _ => Ok(()),
    }
}

/// Refuses while a verdict is held but not yet safely stored.
fn ensure_record_settled(
    session: &InspectionSession,
    operation: Operation,
) -> Result<(), WorkflowError> {
    match &session.record {
        Some(status @ (RecordStatus::Pending | RecordStatus::Failed(_))) => {
            Err(WorkflowError::RecordState {
                operation,
                status: status.label(),
            })
        }
        _ => Ok(()),
    }
}

/// Leaving `Decided` requires the record to be stored.
fn ensure_decided_and_saved(
    session: &InspectionSession,
    operation: Operation,
) -> Result<(), WorkflowError> {
    if session.phase != Phase::Decided {
        return Err(invalid(operation, session));
    }
    ensure_record_settled(session, operation)
}

fn persist(
    next: &mut InspectionSession,
    operation: Operation,
    previous: &InspectionSession,
) -> Result<Effect, WorkflowError> {
    let record = next
        .inspection_record()
        .ok_or_else(|| invalid(operation, previous))?;
    next.record = Some(RecordStatus::Pending);
    Ok(Effect::PersistRecord {
        epoch: next.epoch,
        record,
    })
}

pub fn apply(
    session: &InspectionSession,
    event: WorkflowEvent,
) -> Result<Transition, WorkflowError> {
    let mut next = session.clone();
    let mut effects = Vec::new();

    match event {
        WorkflowEvent::SelectMeter(meter) => {
            if session.is_comparing() {
                return Err(invalid(Operation::SelectMeter, session));
            }
            ensure_not_pending(session, Operation::SelectMeter)?;
            next.clear_capture();
            next.meter = Some(MeterSelection {
                id: meter.id,
                model: meter.model,
            });
            next.master_image = Some(meter.image);
            next.master_invalidated = false;
            next.phase = Phase::Ready;
            next.epoch += 1;
        }

        WorkflowEvent::EditField { field, value } => {
            if !matches!(session.phase, Phase::Idle | Phase::Ready) {
                return Err(invalid(Operation::EditField, session));
            }
            match field {
                EditableField::SerialNumber => next.serial_number = value,
                EditableField::Client => next.client = value,
            }
        }

        WorkflowEvent::CaptureOrRetry { capture_id } => match session.phase {
            Phase::Idle | Phase::Ready => {
                let request = session.capture_request()?;
                next.epoch += 1;
                next.phase = Phase::AwaitingResult;
                next.capture_id = Some(capture_id);
                effects.push(Effect::Compare {
                    epoch: next.epoch,
                    request,
                });
            }
            Phase::AwaitingResult => return Err(invalid(Operation::Capture, session)),
            Phase::AutoDecided | Phase::NeedsOperatorInput | Phase::Decided => {
                ensure_not_pending(session, Operation::Retry)?;
                next.clear_capture();
                next.phase = Phase::Ready;
                next.epoch += 1;
            }
        },

        WorkflowEvent::ComparisonCompleted { epoch, outcome } => {
            ensure_current(session, epoch, RemoteCall::Comparison)?;
            if !session.is_comparing() {
                return Err(invalid(Operation::ApplyComparison, session));
            }
            next.captured_image = Some(outcome.captured_image);
            next.diff_image = outcome.diff_image;
            match outcome.resolution {
                Resolution::Automatic(verdict) => {
                    next.verdict = Some(verdict);
                    next.verdict_source = Some(VerdictSource::Automatic);
                    next.phase = Phase::AutoDecided;
                    effects.push(persist(&mut next, Operation::ApplyComparison, session)?);
                }
                Resolution::Operator { suggested } => {
                    next.operator_decision_required = true;
                    next.suggested_verdict = suggested;
                    next.phase = Phase::NeedsOperatorInput;
                }
            }
        }

        WorkflowEvent::ComparisonFailed { epoch } => {
            ensure_current(session, epoch, RemoteCall::Comparison)?;
            if !session.is_comparing() {
                return Err(invalid(Operation::ApplyComparison, session));
            }
            next.clear_capture();
            next.phase = Phase::Ready;
        }

        WorkflowEvent::OperatorDecision(verdict) => {
            if session.phase != Phase::NeedsOperatorInput {
                return Err(invalid(Operation::OperatorDecision, session));
            }
            next.verdict = Some(verdict);
            next.verdict_source = Some(VerdictSource::Operator);
            next.phase = Phase::Decided;
            effects.push(persist(&mut next, Operation::OperatorDecision, session)?);
        }

        WorkflowEvent::RecordSaved { epoch } => {
            ensure_current(session, epoch, RemoteCall::RecordStore)?;
            if !session.is_submitting() {
                return Err(invalid(Operation::ApplyRecordOutcome, session));
            }
            next.record = Some(RecordStatus::Saved);
            next.phase = Phase::Decided;
        }

        WorkflowEvent::RecordFailed { epoch, reason } => {
            ensure_current(session, epoch, RemoteCall::RecordStore)?;
            if !session.is_submitting() {
                return Err(invalid(Operation::ApplyRecordOutcome, session));
            }
            next.record = Some(RecordStatus::Failed(reason));
            next.phase = Phase::Decided;
        }

        WorkflowEvent::ResubmitRecord => match (&session.phase, &session.record) {
            (Phase::Decided, Some(RecordStatus::Failed(_))) => {
                effects.push(persist(&mut next, Operation::ResubmitRecord, session)?);
            }
            (Phase::Decided, Some(status)) => {
                return Err(WorkflowError::RecordState {
                    operation: Operation::ResubmitRecord,
                    status: status.label(),
                })
            }
            _ => return Err(invalid(Operation::ResubmitRecord, session)),
        },

        WorkflowEvent::RecaptureMaster => {
            if session.phase != Phase::Ready {
                return Err(invalid(Operation::RecaptureMaster, session));
            }
            effects.push(Effect::CaptureMaster {
                epoch: session.epoch,
            });
        }

        WorkflowEvent::MasterRecaptured { epoch, image } => {
            ensure_current(session, epoch, RemoteCall::MasterCapture)?;
            if session.phase != Phase::Ready {
                return Err(invalid(Operation::ApplyMaster, session));
            }
            next.master_image = Some(image);
        }

        WorkflowEvent::Continue => {
            ensure_decided_and_saved(session, Operation::Continue)?;
            next.clear_capture();
            next.serial_number.clear();
            next.phase = Phase::Ready;
            next.epoch += 1;
        }

        WorkflowEvent::SubmitNewCycle => {
            ensure_decided_and_saved(session, Operation::SubmitNewCycle)?;
            next = InspectionSession {
                master_invalidated: true,
                ..session.reset()
            };
            effects.push(Effect::RefreshCatalog);
        }

        WorkflowEvent::Abandon => {
            next = session.reset();
        }
    }

    Ok(Transition {
        session: next,
        effects,
    })
}
