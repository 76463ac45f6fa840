pub mod aggregator;
pub mod capacity;
pub mod codec;
pub mod config;
pub mod covers;
pub mod error;
pub mod executor;
pub mod hamming;
pub mod orchestrator;
pub mod payload;
pub mod plan;
pub mod transcode;
pub mod trial;

#[cfg(test)]
mod testing;

pub use aggregator::{Aggregator, CategorySummary, RunInfo, SweepReport};
pub use capacity::{CapacityProbe, payload_size_for};
pub use codec::{EmbedOptions, ExtractOptions, FrequencySet, LengthSource, StegoCodec};
pub use config::SweepConfig;
pub use covers::{CoverCache, CoverSource};
pub use error::{SweepError, TrialError};
pub use executor::{CommandExecutor, ToolExecutor, ToolInvocation, ToolInvocationError};
pub use hamming::{HammingDistance, compare};
pub use orchestrator::{Orchestrator, SweepSetup};
pub use payload::{Payload, PayloadGenerator};
pub use plan::plan_trials;
pub use transcode::Transcoder;
pub use trial::{EmbedMode, Recompression, Trial, TrialOutcome, TrialResult, TrialStage};
