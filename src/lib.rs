//! Client core for the Anchor chapter check-in kiosk: scan or type an
//! attendance payload, deliver it, and keep it safe offline until it can be.

pub mod capture;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod db;
pub mod delivery;
pub mod model;
pub mod payload;
pub mod queue;
pub mod store;

pub use coordinator::{CheckinError, SubmissionCoordinator};
pub use model::{AttendancePayload, Notice, QueuedSubmission, SubmissionOutcome};
pub use queue::OfflineQueue;
