//! `conductor-store` — typed SQLite access to job metadata.
//!
//! Owns the Job / JobSchedule / JobInstance / JobQueue tables. All SQL in
//! the workspace that touches these rows lives here; the scheduler and the
//! agent only see typed accessors on [`MetadataStore`].

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::MetadataStore;
pub use types::{Job, JobInstance, JobQueue, JobSchedule};
