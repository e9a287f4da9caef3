//! Job Record data model.

pub mod record;

pub use record::{
    Checkpoint, JobControl, JobProgress, JobRecord, JobStatus, INTERRUPTED, STOPPED_BY_USER,
};
