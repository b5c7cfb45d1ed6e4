mod http;

use serde::Serialize;

use crate::{db::Verdict, images::ImageRef};

pub use http::HttpVisionClient;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub serial_number: String,
    pub model_type: String,
    pub master_image: ImageRef,
}

/// Raw comparison result. Whether it is usable is decided by
/// `workflow::verdict::resolve`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareResponse {
    pub captured_image: ImageRef,
    pub diff_image: Option<ImageRef>,
    pub verdict: Option<Verdict>,
    pub operator_decision_required: bool,
}
