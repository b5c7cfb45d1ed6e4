pub mod inspection;
pub mod meter;

pub use inspection::{InspectionRecord, InspectionStats, NewInspection, Verdict, VerdictSource};
pub use meter::{Meter, MeterInput, MeterSummary};
