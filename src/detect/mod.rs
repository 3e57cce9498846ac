//! Remote classification.
//!
//! `DetectionClient` uploads one encoded frame per call and maps the reply
//! (or the lack of one) to a `ClassificationOutcome`. The classification
//! algorithm itself lives behind the HTTP endpoint.

mod client;
mod outcome;

pub use client::{
    Classifier, DetectionClient, DEFAULT_SUBMIT_TIMEOUT, UPLOAD_FIELD, UPLOAD_FILENAME,
};
pub use outcome::{
    is_reportable_label, ClassificationOutcome, FAILED_LABEL, LABEL_FIELDS, UNKNOWN_LABEL,
};
