//! Embed/extract adapter around the external steganographic codec.
//!
//! This is the only place that knows the codec's flag syntax. Callers hand
//! over typed option structs; the command lines are assembled here.

use crate::executor::{ToolExecutor, ToolInvocation, ToolInvocationError, remove_stale_output};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Number of DCT coefficients in an 8x8 block.
const DCT_COEFFICIENTS: u8 = 64;

/// DCT coefficient selection handed to the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrequencySet {
    /// Let the codec's own heuristic pick the coefficients.
    Auto,
    Explicit(Vec<u8>),
}

impl FrequencySet {
    /// The `-freq` argument, or `None` when the codec should choose.
    pub fn as_arg(&self) -> Option<String> {
        match self {
            FrequencySet::Auto => None,
            FrequencySet::Explicit(_) => Some(self.to_string()),
        }
    }
}

impl fmt::Display for FrequencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencySet::Auto => f.write_str("auto"),
            FrequencySet::Explicit(indices) => {
                let list: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                f.write_str(&list.join(","))
            }
        }
    }
}

impl TryFrom<String> for FrequencySet {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrequencySet> for String {
    fn from(value: FrequencySet) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for FrequencySet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(FrequencySet::Auto);
        }
        let mut indices = Vec::new();
        for part in trimmed.split(',') {
            let index: u8 = part
                .trim()
                .parse()
                .map_err(|_| format!("invalid coefficient index '{part}' in frequency set '{s}'"))?;
            if index >= DCT_COEFFICIENTS {
                return Err(format!(
                    "coefficient index {index} out of range 0..{DCT_COEFFICIENTS}"
                ));
            }
            indices.push(index);
        }
        Ok(FrequencySet::Explicit(indices))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOptions {
    pub frequency_set: FrequencySet,
    /// Requantize the cover to this quality while embedding.
    pub quality_override: Option<u8>,
    pub seed: Option<u32>,
    pub ecc_length: Option<u32>,
    /// Store the payload length inside the stego image.
    pub embed_length: bool,
}

/// How the extractor learns the payload length.
///
/// The extractor cannot detect a wrong length on its own and silently returns
/// garbage, so the harness must carry the length whenever it was not embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSource {
    Embedded,
    OutOfBand(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub frequency_set: FrequencySet,
    /// Must equal the seed used at embed time.
    pub seed: Option<u32>,
    pub ecc_length: Option<u32>,
    pub length: LengthSource,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct StegoCodec {
    executor: Arc<dyn ToolExecutor>,
    embed_command: Vec<String>,
    extract_command: Vec<String>,
}

impl StegoCodec {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        embed_command: Vec<String>,
        extract_command: Vec<String>,
    ) -> Self {
        Self {
            executor,
            embed_command,
            extract_command,
        }
    }

    pub fn embed_args(
        cover: &Path,
        payload: &Path,
        out: &Path,
        options: &EmbedOptions,
    ) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(seed) = options.seed {
            args.extend(["-seed".to_string(), seed.to_string()]);
        }
        if let Some(quality) = options.quality_override {
            args.extend(["-quality".to_string(), quality.to_string()]);
        }
        if let Some(freq) = options.frequency_set.as_arg() {
            args.extend(["-freq".to_string(), freq]);
        }
        if !options.embed_length {
            args.push("-nolength".to_string());
        }
        if let Some(ecc) = options.ecc_length {
            args.extend(["-ecc".to_string(), ecc.to_string()]);
        }
        args.extend([
            "-data".to_string(),
            path_arg(payload),
            path_arg(cover),
            path_arg(out),
        ]);
        args
    }

    pub fn extract_args(stego: &Path, out: &Path, options: &ExtractOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(seed) = options.seed {
            args.extend(["-seed".to_string(), seed.to_string()]);
        }
        if let Some(freq) = options.frequency_set.as_arg() {
            args.extend(["-freq".to_string(), freq]);
        }
        if let LengthSource::OutOfBand(len) = options.length {
            args.extend(["-length".to_string(), len.to_string()]);
        }
        if let Some(ecc) = options.ecc_length {
            args.extend(["-ecc".to_string(), ecc.to_string()]);
        }
        args.extend([path_arg(stego), path_arg(out)]);
        args
    }

    /// Hides the payload file in `cover`, writing the stego image to `out`.
    pub fn embed(
        &self,
        cover: &Path,
        payload: &Path,
        out: &Path,
        options: &EmbedOptions,
        timeout: Duration,
    ) -> Result<(), ToolInvocationError> {
        let invocation = ToolInvocation::from_command(
            &self.embed_command,
            Self::embed_args(cover, payload, out, options),
        );
        remove_stale_output(&invocation.program, out)?;
        self.executor.run(&invocation, timeout)?;
        if !out.exists() {
            return Err(ToolInvocationError::MissingOutput {
                program: invocation.program,
                path: out.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Recovers the hidden bytes from `stego` into `out` and returns them.
    pub fn extract(
        &self,
        stego: &Path,
        out: &Path,
        options: &ExtractOptions,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolInvocationError> {
        let invocation = ToolInvocation::from_command(
            &self.extract_command,
            Self::extract_args(stego, out, options),
        );
        remove_stale_output(&invocation.program, out)?;
        self.executor.run(&invocation, timeout)?;
        std::fs::read(out).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolInvocationError::MissingOutput {
                    program: invocation.program.clone(),
                    path: out.to_path_buf(),
                }
            } else {
                ToolInvocationError::io(&invocation.program, e)
            }
        })
    }
}
