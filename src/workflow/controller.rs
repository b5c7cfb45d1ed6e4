use std::{collections::VecDeque, sync::Arc};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::{
    db::{Meter, Verdict, VerdictSource},
    images::ImageRef,
    log_error, log_info, log_warn,
    traits::{InspectionStore, MeterCatalog, VisionClient},
};

use super::{
    error::{ErrorKind, RemoteCall, WorkflowError},
    state::{
        apply, EditableField, Effect, InspectionSession, Phase, RecordStatus, Transition,
        WorkflowEvent,
    },
    verdict::{overrides_suggestion, resolve},
};

const ENABLE_LOGS: bool = true;

/// What the view renders; published after every accepted transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub phase: Phase,
    pub serial_number: String,
    pub client: String,
    pub meter_id: Option<String>,
    pub meter_model: Option<String>,
    pub master_image: Option<ImageRef>,
    pub master_invalidated: bool,
    pub captured_image: Option<ImageRef>,
    pub diff_image: Option<ImageRef>,
    pub operator_decision_required: bool,
    pub suggested_verdict: Option<Verdict>,
    pub verdict: Option<Verdict>,
    pub verdict_source: Option<VerdictSource>,
    pub capture_id: Option<String>,
    pub record: Option<RecordStatus>,
    pub is_comparing: bool,
    pub is_submitting: bool,
}

impl From<&InspectionSession> for WorkflowSnapshot {
    fn from(session: &InspectionSession) -> Self {
        Self {
            phase: session.phase,
            serial_number: session.serial_number.clone(),
            client: session.client.clone(),
            meter_id: session.meter.as_ref().map(|m| m.id.clone()),
            meter_model: session.meter.as_ref().map(|m| m.model.clone()),
            master_image: session.master_image.clone(),
            master_invalidated: session.master_invalidated,
            captured_image: session.captured_image.clone(),
            diff_image: session.diff_image.clone(),
            operator_decision_required: session.operator_decision_required,
            suggested_verdict: session.suggested_verdict,
            verdict: session.verdict,
            verdict_source: session.verdict_source,
            capture_id: session.capture_id.clone(),
            record: session.record.clone(),
            is_comparing: session.is_comparing(),
            is_submitting: session.is_submitting(),
        }
    }
}

/// Owns the inspection session of one station and drives its collaborators.
///
/// The session lock is never held across a remote call: a start event is
/// applied, the lock released, the call awaited, and the epoch-tagged
/// completion applied under a fresh lock.
#[derive(Clone)]
pub struct InspectionController {
    session: Arc<Mutex<InspectionSession>>,
    catalog: Arc<dyn MeterCatalog>,
    vision: Arc<dyn VisionClient>,
    store: Arc<dyn InspectionStore>,
    meters: Arc<Mutex<Option<Vec<Meter>>>>,
    changes: Arc<watch::Sender<WorkflowSnapshot>>,
}

impl InspectionController {
    pub fn new(
        catalog: Arc<dyn MeterCatalog>,
        vision: Arc<dyn VisionClient>,
        store: Arc<dyn InspectionStore>,
    ) -> Self {
        let session = InspectionSession::new();
        let (changes, _) = watch::channel(WorkflowSnapshot::from(&session));

        Self {
            session: Arc::new(Mutex::new(session)),
            catalog,
            vision,
            store,
            meters: Arc::new(Mutex::new(None)),
            changes: Arc::new(changes),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.changes.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let guard = self.session.lock().await;
        WorkflowSnapshot::from(&*guard)
    }

    /// Catalog listing, cached until a submit asks for a refresh.
    pub async fn list_meters(&self) -> Result<Vec<Meter>, WorkflowError> {
        let mut cache = self.meters.lock().await;
        if let Some(meters) = cache.as_ref() {
            return Ok(meters.clone());
        }

        let meters = self
            .catalog
            .list_meters()
            .await
            .map_err(|err| WorkflowError::transport(RemoteCall::CatalogLookup, &err))?;
        *cache = Some(meters.clone());
        Ok(meters)
    }

    pub async fn select_meter(&self, meter_id: &str) -> Result<WorkflowSnapshot, WorkflowError> {
        let meter_id = meter_id.trim();
        let meter = self
            .catalog
            .find_meter(meter_id)
            .await
            .map_err(|err| WorkflowError::transport(RemoteCall::CatalogLookup, &err))?
            .ok_or_else(|| WorkflowError::UnknownMeter {
                meter_id: meter_id.to_string(),
            })?;

        log_info!("Selected meter {} ({})", meter.id, meter.model);
        self.perform(WorkflowEvent::SelectMeter(meter)).await
    }

    pub async fn edit_field(
        &self,
        field: EditableField,
        value: impl Into<String>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        self.perform(WorkflowEvent::EditField {
            field,
            value: value.into(),
        })
        .await
    }

    /// Captures and compares when no image is held, otherwise discards the
    /// held result so the unit can be captured again.
    pub async fn capture_or_retry(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let capture_id = Uuid::new_v4().to_string();
        self.perform(WorkflowEvent::CaptureOrRetry { capture_id })
            .await
    }

    pub async fn submit_operator_decision(
        &self,
        decision: Verdict,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let suggested = self.session.lock().await.suggested_verdict;
        if overrides_suggestion(suggested, decision) {
            log_info!("Operator overrode the suggested verdict with {}", decision);
        }
        self.perform(WorkflowEvent::OperatorDecision(decision)).await
    }

    pub async fn resubmit_record(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        self.perform(WorkflowEvent::ResubmitRecord).await
    }

    pub async fn recapture_master(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        self.perform(WorkflowEvent::RecaptureMaster).await
    }

    pub async fn continue_cycle(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        self.perform(WorkflowEvent::Continue).await
    }

    pub async fn submit_new_cycle(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        self.perform(WorkflowEvent::SubmitNewCycle).await
    }

    /// Drops the current cycle. A call still in flight keeps running but its
    /// result will be discarded.
    pub async fn abandon(&self) -> WorkflowSnapshot {
        if let Err(err) = self.dispatch(WorkflowEvent::Abandon).await {
            log_error!("Abandon was rejected: {}", err);
        }
        self.snapshot().await
    }

    async fn perform(&self, event: WorkflowEvent) -> Result<WorkflowSnapshot, WorkflowError> {
        let effects = self.dispatch(event).await?;
        self.run_effects(effects).await?;
        Ok(self.snapshot().await)
    }

    async fn dispatch(&self, event: WorkflowEvent) -> Result<Vec<Effect>, WorkflowError> {
        let name = event.name();
        let mut guard = self.session.lock().await;

        match apply(&guard, event) {
            Ok(Transition { session, effects }) => {
                debug_assert_eq!(session.invariant_violation(), None, "after {name}");
                if session.phase != guard.phase {
                    log_info!("Inspection {} -> {} ({})", guard.phase, session.phase, name);
                }
                *guard = session;
                self.changes.send_replace(WorkflowSnapshot::from(&*guard));
                Ok(effects)
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::InvalidTransition => {
                        log_warn!("Rejected {}: {}", name, err);
                    }
                    ErrorKind::Abandoned => {
                        log_warn!("Discarded {}: {}", name, err);
                    }
                    ErrorKind::Validation | ErrorKind::Transport => {}
                }
                Err(err)
            }
        }
    }

    async fn run_effects(&self, effects: Vec<Effect>) -> Result<(), WorkflowError> {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Compare { epoch, request } => {
                    let failure = match self.vision.compare(&request).await {
                        Ok(response) => match resolve(response) {
                            Ok(outcome) => {
                                let follow_up = self
                                    .dispatch(WorkflowEvent::ComparisonCompleted { epoch, outcome })
                                    .await?;
                                queue.extend(follow_up);
                                continue;
                            }
                            Err(violation) => anyhow::Error::new(violation),
                        },
                        Err(err) => err,
                    };

                    log_error!(
                        "Comparison for serial {} failed: {:#}",
                        request.serial_number,
                        failure
                    );
                    self.dispatch(WorkflowEvent::ComparisonFailed { epoch })
                        .await?;
                    return Err(WorkflowError::transport(RemoteCall::Comparison, &failure));
                }

                Effect::PersistRecord { epoch, record } => {
                    match self.store.save_inspection(&record).await {
                        Ok(()) => {
                            self.dispatch(WorkflowEvent::RecordSaved { epoch }).await?;
                        }
                        Err(err) => {
                            log_error!("Failed to store inspection {}: {:#}", record.id, err);
                            self.dispatch(WorkflowEvent::RecordFailed {
                                epoch,
                                reason: format!("{err:#}"),
                            })
                            .await?;
                            return Err(WorkflowError::transport(RemoteCall::RecordStore, &err));
                        }
                    }
                }

                Effect::CaptureMaster { epoch } => match self.vision.capture_master().await {
                    Ok(image) => {
                        log_info!("Captured new master image: {}", image.describe());
                        self.dispatch(WorkflowEvent::MasterRecaptured { epoch, image })
                            .await?;
                    }
                    Err(err) => {
                        log_error!("Master capture failed: {:#}", err);
                        return Err(WorkflowError::transport(RemoteCall::MasterCapture, &err));
                    }
                },

                Effect::RefreshCatalog => {
                    *self.meters.lock().await = None;
                }
            }
        }

        Ok(())
    }
}
