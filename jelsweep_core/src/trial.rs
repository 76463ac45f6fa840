use crate::codec::{EmbedOptions, ExtractOptions, FrequencySet, LengthSource};
use crate::hamming::HammingDistance;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sweep category: how the payload is framed inside the stego image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedMode {
    /// No length header, no seed; the harness supplies the length.
    Plain,
    /// The codec stores the payload length in the image.
    LengthEmbedded,
    /// Seeded permutation on both sides; length supplied by the harness.
    Seeded,
}

impl fmt::Display for EmbedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmbedMode::Plain => "plain",
            EmbedMode::LengthEmbedded => "length-embedded",
            EmbedMode::Seeded => "seeded",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recompression {
    None,
    /// Embed into a high-quality cover, then re-encode the stego image down
    /// to the trial quality before extracting.
    Requantize,
}

impl fmt::Display for Recompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recompression::None => "none",
            Recompression::Requantize => "requantize",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrialStage {
    Cover,
    Payload,
    Embed,
    Recompress,
    Extract,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrialStage::Cover => "cover",
            TrialStage::Payload => "payload",
            TrialStage::Embed => "embed",
            TrialStage::Recompress => "recompress",
            TrialStage::Extract => "extract",
        })
    }
}

/// One point of the sweep's parameter space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trial {
    pub index: usize,
    /// Position of the cover in the sweep's cover list.
    pub cover_index: usize,
    pub cover_id: String,
    pub quality: u8,
    /// The cover is embedded into exactly as stored, so `quality` was never
    /// applied to anything.
    pub as_encoded: bool,
    pub frequency_set: FrequencySet,
    pub mode: EmbedMode,
    pub recompression: Recompression,
    /// Embed into the high-quality cover and let the codec requantize to `quality`.
    pub quality_override: bool,
    pub seed: Option<u32>,
    pub ecc_length: Option<u32>,
}

impl Trial {
    pub fn embed_length(&self) -> bool {
        self.mode == EmbedMode::LengthEmbedded
    }

    pub fn embed_options(&self) -> EmbedOptions {
        EmbedOptions {
            frequency_set: self.frequency_set.clone(),
            quality_override: self.quality_override.then_some(self.quality),
            seed: self.seed,
            ecc_length: self.ecc_length,
            embed_length: self.embed_length(),
        }
    }

    /// Extraction mirrors the embed side: same seed, same coefficients, and
    /// the payload length whenever the image does not carry it.
    pub fn extract_options(&self, payload_len: usize) -> ExtractOptions {
        ExtractOptions {
            frequency_set: self.frequency_set.clone(),
            seed: self.seed,
            ecc_length: self.ecc_length,
            length: if self.embed_length() {
                LengthSource::Embedded
            } else {
                LengthSource::OutOfBand(payload_len)
            },
        }
    }

    /// The quality this trial tested, or `as-is` when none was applied.
    pub fn quality_label(&self) -> String {
        if self.as_encoded {
            "as-is".to_string()
        } else {
            self.quality.to_string()
        }
    }

    /// The run of trials this one belongs to on the progress stream.
    pub fn category_label(&self) -> String {
        format!(
            "cover {}, {}, frequencies {}, recompression {}",
            self.cover_id, self.mode, self.frequency_set, self.recompression
        )
    }

    /// Directory name unique to this trial, readable in a file listing.
    pub fn scratch_name(&self) -> String {
        let quality = if self.as_encoded {
            "as-is".to_string()
        } else {
            format!("q{}", self.quality)
        };
        let mut name = format!(
            "{:05}-{}-{}-{quality}",
            self.index,
            self.cover_id.replace('/', "_"),
            self.mode
        );
        if self.recompression == Recompression::Requantize {
            name.push_str("-requant");
        }
        if self.quality_override {
            name.push_str("-override");
        }
        name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub bit_errors: u64,
    pub total_bits: u64,
    /// Secondary byte-for-byte check; never decides pass/fail.
    pub exact_match: bool,
    pub sent_len: usize,
    pub recovered_len: usize,
}

impl Measurement {
    pub fn new(
        distance: HammingDistance,
        exact_match: bool,
        sent_len: usize,
        recovered_len: usize,
    ) -> Self {
        Self {
            bit_errors: distance.bit_errors,
            total_bits: distance.total_bits,
            exact_match,
            sent_len,
            recovered_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum TrialOutcome {
    Measured(Measurement),
    Failed { stage: TrialStage, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialResult {
    pub trial: Trial,
    pub outcome: TrialOutcome,
}

impl TrialResult {
    pub fn bit_errors(&self) -> u64 {
        match &self.outcome {
            TrialOutcome::Measured(m) => m.bit_errors,
            TrialOutcome::Failed { .. } => 0,
        }
    }

    pub fn total_bits(&self) -> u64 {
        match &self.outcome {
            TrialOutcome::Measured(m) => m.total_bits,
            TrialOutcome::Failed { .. } => 0,
        }
    }

    /// Only a trial that was measured with zero bit errors passes.
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, TrialOutcome::Measured(m) if m.bit_errors == 0)
    }

    pub fn is_tool_failure(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Failed { .. })
    }

    /// The `<quality>:<bitErrors>` progress token.
    pub fn progress_line(&self) -> String {
        let quality = self.trial.quality_label();
        match &self.outcome {
            TrialOutcome::Measured(m) => format!("{quality}:{}", m.bit_errors),
            TrialOutcome::Failed { .. } => format!("{quality}:error"),
        }
    }
}
