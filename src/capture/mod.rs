pub mod ledger;
pub mod scheduler;

pub use scheduler::{CaptureScheduler, CaptureSettings};
