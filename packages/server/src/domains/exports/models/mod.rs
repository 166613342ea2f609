pub mod job;
pub mod row;

pub use job::{
    CancelOutcome, ExportFilters, ExportFormat, ExportJob, ExportMode, ExportStatus, LabelPolicy,
    ERROR_CANCELLED, ERROR_FAILED, ERROR_LIMIT_EXCEEDED,
};
pub use row::ExportRow;
