use std::path::Path;

use log::{info, warn};

use crate::batch::orchestrator::BatchState;

/// Something that happened during a batch run
#[derive(Debug, Clone, Copy)]
pub enum BatchEvent<'a> {
    StateChanged(BatchState),
    FileUploaded { row: usize, local: &'a Path, remote: &'a str, reused: bool },
    TaskCreated { row: usize, title: &'a str, submission_id: &'a str },
    RowFailed { row: usize, reason: &'a str },
}

/// Receives batch events after each state transition
///
/// Keeps progress output out of the orchestrator.
pub trait BatchObserver {
    fn notify(&mut self, event: &BatchEvent<'_>);
}

/// Writes batch events to the log
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn notify(&mut self, event: &BatchEvent<'_>) {
        match event {
            BatchEvent::StateChanged(state) => info!("Batch is {state}"),
            BatchEvent::FileUploaded { row, local, remote, reused: false } => {
                info!("Row {row}: uploaded {} to {remote}", local.display())
            }
            BatchEvent::FileUploaded { row, local, remote, reused: true } => {
                info!("Row {row}: {} already uploaded to {remote}", local.display())
            }
            BatchEvent::TaskCreated { row, title, submission_id } => info!("Row {row}: created {title} ({submission_id})"),
            BatchEvent::RowFailed { row, reason } => warn!("Row {row} failed: {reason}"),
        }
    }
}
