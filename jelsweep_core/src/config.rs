use crate::codec::FrequencySet;
use crate::error::SweepError;
use crate::trial::{EmbedMode, Recompression};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadMode {
    /// One payload generated during setup and shared by every trial.
    #[default]
    PerSweep,
    /// A fresh payload of the same length generated inside each trial.
    PerTrial,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SweepSettings {
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
    #[serde(default = "default_max_quality")]
    pub max_quality: u8,
    #[serde(default = "default_high_quality")]
    pub high_quality: u8,
    #[serde(default = "default_frequency_sets")]
    pub frequency_sets: Vec<FrequencySet>,
    #[serde(default = "default_modes")]
    pub modes: Vec<EmbedMode>,
    #[serde(default = "default_recompression")]
    pub recompression: Vec<Recompression>,
    #[serde(default)]
    pub quality_override: bool,
    pub seed: Option<u32>,
    pub ecc_length: Option<u32>,
    pub payload_bytes: Option<usize>,
    #[serde(default = "default_header_margin")]
    pub header_margin: usize,
    #[serde(default)]
    pub payload_mode: PayloadMode,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_timeout_ms")]
    pub trial_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub setup_timeout_ms: u64,
    #[serde(default)]
    pub keep_passing_artifacts: bool,
}

pub fn default_min_quality() -> u8 {
    30
}
pub fn default_max_quality() -> u8 {
    99
}
pub fn default_high_quality() -> u8 {
    75
}
fn default_frequency_sets() -> Vec<FrequencySet> {
    vec![FrequencySet::Auto]
}
fn default_modes() -> Vec<EmbedMode> {
    vec![EmbedMode::Plain, EmbedMode::LengthEmbedded, EmbedMode::Seeded]
}
fn default_recompression() -> Vec<Recompression> {
    vec![Recompression::None]
}
pub fn default_header_margin() -> usize {
    16
}
pub fn default_threads() -> usize {
    1
}
fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            max_quality: default_max_quality(),
            high_quality: default_high_quality(),
            frequency_sets: default_frequency_sets(),
            modes: default_modes(),
            recompression: default_recompression(),
            quality_override: false,
            seed: None,
            ecc_length: None,
            payload_bytes: None,
            header_margin: default_header_margin(),
            payload_mode: PayloadMode::default(),
            threads: default_threads(),
            trial_timeout_ms: default_timeout_ms(),
            setup_timeout_ms: default_timeout_ms(),
            keep_passing_artifacts: false,
        }
    }
}

impl SweepSettings {
    pub fn qualities(&self) -> std::ops::RangeInclusive<u8> {
        self.min_quality..=self.max_quality
    }

    pub fn trial_timeout(&self) -> Duration {
        Duration::from_millis(self.trial_timeout_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverImage {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverDirectory {
    pub path: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverSettings {
    /// Raw source images, encoded to JPEG at every quality a trial asks for.
    #[serde(default = "default_cover_images")]
    pub images: Vec<CoverImage>,
    /// Directories of ready-made JPEG covers, used as-is.
    #[serde(default)]
    pub directories: Vec<CoverDirectory>,
}

fn default_cover_images() -> Vec<CoverImage> {
    vec![CoverImage {
        id: "tree640".to_string(),
        path: PathBuf::from("data/images/tree640.pnm"),
    }]
}

impl Default for CoverSettings {
    fn default() -> Self {
        Self {
            images: default_cover_images(),
            directories: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    #[serde(default = "default_embed_command")]
    pub embed: Vec<String>,
    #[serde(default = "default_extract_command")]
    pub extract: Vec<String>,
    #[serde(default = "default_capacity_command")]
    pub capacity: Vec<String>,
    #[serde(default = "default_generate_command")]
    pub generate: Vec<String>,
    /// Template with `{input}`, `{output}` and `{quality}` placeholders.
    #[serde(default = "default_transcode_template")]
    pub encode: Vec<String>,
    #[serde(default = "default_transcode_template")]
    pub reencode: Vec<String>,
    /// Template with `{before}`, `{after}` and `{output}` placeholders.
    pub diff: Option<Vec<String>>,
}

fn default_embed_command() -> Vec<String> {
    vec!["wedge".to_string()]
}
fn default_extract_command() -> Vec<String> {
    vec!["unwedge".to_string()]
}
fn default_capacity_command() -> Vec<String> {
    vec!["wcap".to_string()]
}
fn default_generate_command() -> Vec<String> {
    vec!["randmsg".to_string()]
}
fn default_transcode_template() -> Vec<String> {
    ["convert", "{input}", "-quality", "{quality}", "{output}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            embed: default_embed_command(),
            extract: default_extract_command(),
            capacity: default_capacity_command(),
            generate: default_generate_command(),
            encode: default_transcode_template(),
            reencode: default_transcode_template(),
            diff: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub covers: CoverSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

pub fn default_work_dir() -> PathBuf {
    PathBuf::from("./.jelsweep_work")
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep: SweepSettings::default(),
            covers: CoverSettings::default(),
            tools: ToolSettings::default(),
            work_dir: default_work_dir(),
        }
    }
}

impl SweepConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: SweepConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Rejects configurations that cannot describe a trial space.
    pub fn validate(&self) -> Result<(), SweepError> {
        let s = &self.sweep;
        for (name, q) in [
            ("min-quality", s.min_quality),
            ("max-quality", s.max_quality),
            ("high-quality", s.high_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(SweepError::InvalidConfig(format!(
                    "{name} must be within 1..=100, got {q}"
                )));
            }
        }
        if s.min_quality > s.max_quality {
            return Err(SweepError::InvalidConfig(format!(
                "min-quality {} exceeds max-quality {}",
                s.min_quality, s.max_quality
            )));
        }
        if s.frequency_sets.is_empty() {
            return Err(SweepError::InvalidConfig(
                "frequency-sets must not be empty".to_string(),
            ));
        }
        if s.modes.is_empty() {
            return Err(SweepError::InvalidConfig("modes must not be empty".to_string()));
        }
        if s.recompression.is_empty() {
            return Err(SweepError::InvalidConfig(
                "recompression must not be empty".to_string(),
            ));
        }
        if s.threads == 0 {
            return Err(SweepError::InvalidConfig("threads must be at least 1".to_string()));
        }
        if s.trial_timeout_ms == 0 || s.setup_timeout_ms == 0 {
            return Err(SweepError::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        if s.payload_bytes == Some(0) {
            return Err(SweepError::InvalidConfig(
                "payload-bytes must be greater than zero".to_string(),
            ));
        }

        let t = &self.tools;
        for (name, command) in [
            ("embed", &t.embed),
            ("extract", &t.extract),
            ("capacity", &t.capacity),
            ("generate", &t.generate),
            ("encode", &t.encode),
            ("reencode", &t.reencode),
        ] {
            if command.first().is_none_or(|p| p.is_empty()) {
                return Err(SweepError::InvalidConfig(format!(
                    "tools.{name} must name a program"
                )));
            }
        }
        if let Some(diff) = &t.diff {
            if diff.first().is_none_or(|p| p.is_empty()) {
                return Err(SweepError::InvalidConfig(
                    "tools.diff must name a program".to_string(),
                ));
            }
        }
        Ok(())
    }
}
