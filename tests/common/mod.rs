#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};
use tokio::sync::{oneshot, Notify};

use meter_inspect_lib::{
    db::{Meter, NewInspection, Verdict},
    images::ImageRef,
    traits::{InspectionStore, MeterCatalog, VisionClient},
    vision::{CompareRequest, CompareResponse},
    workflow::{EditableField, InspectionController},
};

pub fn sample_png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode png");
    buffer
}

pub fn meter(id: &str, model: &str) -> Meter {
    Meter {
        id: id.into(),
        model: model.into(),
        image: ImageRef::inline(sample_png(8, 8, 200)),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn automatic(verdict: Verdict) -> CompareResponse {
    CompareResponse {
        captured_image: ImageRef::inline(sample_png(8, 8, 120)),
        diff_image: Some(ImageRef::inline(sample_png(8, 8, 10))),
        verdict: Some(verdict),
        operator_decision_required: false,
    }
}

pub fn needs_operator(suggested: Option<Verdict>) -> CompareResponse {
    CompareResponse {
        captured_image: ImageRef::inline(sample_png(8, 8, 90)),
        diff_image: None,
        verdict: suggested,
        operator_decision_required: true,
    }
}

pub struct FakeCatalog {
    meters: Vec<Meter>,
    listings: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(meters: Vec<Meter>) -> Self {
        Self {
            meters,
            listings: AtomicUsize::new(0),
        }
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeterCatalog for FakeCatalog {
    async fn list_meters(&self) -> Result<Vec<Meter>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.meters.clone())
    }

    async fn find_meter(&self, meter_id: &str) -> Result<Option<Meter>> {
        Ok(self.meters.iter().find(|m| m.id == meter_id).cloned())
    }
}

/// Vision service double with scripted answers. `hold_next` parks the next
/// comparison until the returned sender fires (or is dropped).
pub struct FakeVision {
    responses: Mutex<VecDeque<Result<CompareResponse, String>>>,
    masters: Mutex<VecDeque<ImageRef>>,
    requests: Mutex<Vec<CompareRequest>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    pub started: Notify,
}

impl FakeVision {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            masters: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            started: Notify::new(),
        }
    }

    pub fn respond(&self, response: CompareResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn fail(&self, reason: &str) {
        self.responses.lock().unwrap().push_back(Err(reason.to_string()));
    }

    pub fn push_master(&self, image: ImageRef) {
        self.masters.lock().unwrap().push_back(image);
    }

    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }

    pub fn compare_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompareRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for FakeVision {
    async fn compare(&self, request: &CompareRequest) -> Result<CompareResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.started.notify_one();
            let _ = gate.await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted comparison response")),
        }
    }

    async fn capture_master(&self) -> Result<ImageRef> {
        self.masters
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("camera offline"))
    }
}

/// Inspection store that keeps records in memory, idempotent on id.
pub struct RecordingStore {
    records: Mutex<Vec<NewInspection>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<NewInspection> {
        self.records.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InspectionStore for RecordingStore {
    async fn save_inspection(&self, record: &NewInspection) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("store offline"));
        }
        let mut records = self.records.lock().unwrap();
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
        Ok(())
    }
}

pub struct Harness {
    pub controller: InspectionController,
    pub catalog: Arc<FakeCatalog>,
    pub vision: Arc<FakeVision>,
    pub store: Arc<RecordingStore>,
}

impl Harness {
    pub fn new() -> Self {
        let catalog = Arc::new(FakeCatalog::new(vec![
            meter("M1", "EM-100"),
            meter("M2", "WM-20"),
        ]));
        let vision = Arc::new(FakeVision::new());
        let store = Arc::new(RecordingStore::new());
        let controller = InspectionController::new(catalog.clone(), vision.clone(), store.clone());

        Self {
            controller,
            catalog,
            vision,
            store,
        }
    }

    /// Meter M1, serial S100, client Acme.
    pub async fn ready(&self) {
        self.controller.select_meter("M1").await.unwrap();
        self.controller
            .edit_field(EditableField::SerialNumber, "S100")
            .await
            .unwrap();
        self.controller
            .edit_field(EditableField::Client, "Acme")
            .await
            .unwrap();
    }
}
