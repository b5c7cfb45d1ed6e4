pub mod commands;
pub mod controller;
pub mod error;
pub mod state;
pub mod verdict;

pub use controller::{InspectionController, WorkflowSnapshot};
pub use error::{ErrorKind, Operation, RemoteCall, WorkflowError};
pub use state::{EditableField, Phase, RecordStatus, SessionField};
pub use verdict::{ComparisonOutcome, Resolution};
