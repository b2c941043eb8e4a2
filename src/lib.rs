//! Headless content review and collaboration workflow service.
//!
//! The library exposes the review state machine, the collaboration
//! registry, the notification dispatcher and the orchestrator that glues
//! them together over a SQLite store. The binary in `main.rs` runs the
//! scheduled queue drain.

pub mod collab;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod mailer;
pub mod model;
pub mod review;
pub mod workflow;

pub use error::WorkflowError;
pub use model::{Actor, ContentItem, ContentKind, ReviewStatus, Role};
pub use review::{Action, Outcome, Revision};
