pub(crate) mod deadline;
mod error;
pub(crate) mod exam_policy;
pub(crate) mod grading;
pub(crate) mod integrity_monitor;
pub(crate) mod manual_review;
pub(crate) mod notifier;
pub(crate) mod ranking;
pub(crate) mod session_lifecycle;
pub(crate) mod submission_coordinator;
pub(crate) mod violation_classifier;

pub(crate) use error::IntegrityError;
