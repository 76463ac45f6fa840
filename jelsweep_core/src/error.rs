use crate::executor::ToolInvocationError;
use crate::trial::TrialStage;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole sweep.
///
/// These only arise during setup (configuration checks, cover discovery,
/// capacity probing, shared payload generation). Once trials start running,
/// every failure is contained to its trial as a [`TrialError`].
#[derive(Error, Debug)]
pub enum SweepError {
    /// The configuration describes no valid trial space.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured sample cover image does not exist.
    #[error("Cover image '{id}' not found at {path:?}")]
    MissingCover { id: String, path: PathBuf },

    /// Neither explicit images nor cover directories produced a usable cover.
    #[error("No cover images available for the sweep")]
    NoCovers,

    /// Probing the payload capacity of the reference cover failed.
    #[error("Capacity probe failed for {path:?}: {source}")]
    CapacityProbe {
        path: PathBuf,
        #[source]
        source: ToolInvocationError,
    },

    /// The probed capacity leaves no room once the header margin is reserved.
    #[error("Capacity of {capacity} bytes leaves no room after the {margin}-byte margin")]
    NoPayloadRoom { capacity: usize, margin: usize },

    /// The shared payload could not be generated.
    #[error("Payload generation failed: {0}")]
    PayloadGeneration(#[source] ToolInvocationError),

    /// Preparing the reference cover for the capacity probe failed.
    #[error("Failed to prepare reference cover '{id}': {source}")]
    ReferenceCover {
        id: String,
        #[source]
        source: ToolInvocationError,
    },

    #[error("Sweep I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SweepError {
    fn from(err: std::io::Error) -> Self {
        SweepError::Io(err.to_string())
    }
}

/// A failure contained to a single trial.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("{stage} stage failed: {source}")]
    Tool {
        stage: TrialStage,
        #[source]
        source: ToolInvocationError,
    },
    #[error("{stage} stage I/O error: {reason}")]
    Io { stage: TrialStage, reason: String },
}

impl TrialError {
    pub fn tool(stage: TrialStage) -> impl FnOnce(ToolInvocationError) -> TrialError {
        move |source| TrialError::Tool { stage, source }
    }

    pub fn io(stage: TrialStage) -> impl FnOnce(std::io::Error) -> TrialError {
        move |err| TrialError::Io {
            stage,
            reason: err.to_string(),
        }
    }

    pub fn stage(&self) -> TrialStage {
        match self {
            TrialError::Tool { stage, .. } | TrialError::Io { stage, .. } => *stage,
        }
    }
}
