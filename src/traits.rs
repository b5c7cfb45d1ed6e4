//! Seams between the inspection workflow and the services it drives.

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    db::{Meter, NewInspection},
    images::ImageRef,
    vision::{CompareRequest, CompareResponse},
};

/// Read-only lookup of meter definitions.
#[async_trait]
pub trait MeterCatalog: Send + Sync {
    async fn list_meters(&self) -> Result<Vec<Meter>>;

    /// `Ok(None)` when the id is not in the catalog.
    async fn find_meter(&self, meter_id: &str) -> Result<Option<Meter>>;
}

/// The remote vision service that photographs the meter under the camera
/// and compares it against a master image.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// One capture + comparison round trip. Treated as atomic: it either
    /// yields a full response or fails without side effects on the session.
    async fn compare(&self, request: &CompareRequest) -> Result<CompareResponse>;

    /// Takes a single frame to serve as a new master image.
    async fn capture_master(&self) -> Result<ImageRef>;
}

/// Write side of the inspection history.
#[async_trait]
pub trait InspectionStore: Send + Sync {
    /// Must be idempotent on `record.id`.
    async fn save_inspection(&self, record: &NewInspection) -> Result<()>;
}
