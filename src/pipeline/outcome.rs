//! Stages, states and the terminal outcome of a run.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::convert::ConverterError;
use crate::mail::{DeliveryReceipt, MailError};
use crate::template::TemplateError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RENDERING_FAILED: i32 = 2;
pub const EXIT_CONVERSION_FAILED: i32 = 3;
pub const EXIT_DELIVERY_FAILED: i32 = 4;
pub const EXIT_INTERRUPTED: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rendering,
    Converting,
    Delivering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Rendering => "Rendering",
            Stage::Converting => "Converting",
            Stage::Delivering => "Delivering",
        })
    }
}

/// Position of a run in `Start -> Rendering -> Converting -> Delivering -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Rendering,
    Converting,
    Delivering,
    Done,
    Failed(Stage),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

/// Underlying cause of a failed stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Conversion(#[from] ConverterError),
    #[error(transparent)]
    Delivery(#[from] MailError),
    #[error("run was cancelled before this stage started")]
    Cancelled,
    #[error("run deadline passed before this stage started")]
    TimedOut,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub subject: String,
    pub receipt: DeliveryReceipt,
    pub artifact_size: u64,
    /// Set only when artifacts are retained after the run.
    pub artifact_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum RunStatus {
    Done(RunReport),
    Failed { stage: Stage, cause: StageError },
}

/// The single terminal result of one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Every state the run passed through, ending in a terminal one.
    pub trace: Vec<RunState>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Done(_))
    }

    pub fn report(&self) -> Option<&RunReport> {
        match &self.status {
            RunStatus::Done(report) => Some(report),
            RunStatus::Failed { .. } => None,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.status {
            RunStatus::Done(_) => None,
            RunStatus::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn cause(&self) -> Option<&StageError> {
        match &self.status {
            RunStatus::Done(_) => None,
            RunStatus::Failed { cause, .. } => Some(cause),
        }
    }

    pub fn reached(&self, state: RunState) -> bool {
        self.trace.contains(&state)
    }

    /// Process exit code for a hosting binary.
    pub fn exit_code(&self) -> i32 {
        match &self.status {
            RunStatus::Done(_) => EXIT_SUCCESS,
            RunStatus::Failed {
                cause: StageError::Cancelled | StageError::TimedOut,
                ..
            } => EXIT_INTERRUPTED,
            RunStatus::Failed { stage, .. } => match stage {
                Stage::Rendering => EXIT_RENDERING_FAILED,
                Stage::Converting => EXIT_CONVERSION_FAILED,
                Stage::Delivering => EXIT_DELIVERY_FAILED,
            },
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            RunStatus::Done(report) => write!(
                f,
                "run {} done: '{}' delivered to {} recipient(s)",
                self.run_id,
                report.subject,
                report.receipt.recipients.len()
            ),
            RunStatus::Failed { stage, cause } => {
                write!(f, "run {} failed at {}: {}", self.run_id, stage, cause)
            }
        }
    }
}
