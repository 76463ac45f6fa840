//! Drives the sweep: setup, then one embed/extract/compare cycle per trial.
//!
//! Setup failures abort the sweep. Anything that goes wrong inside a trial
//! is recorded on that trial's result and the sweep moves on, since finding
//! every failing combination is the point of running it.

use crate::aggregator::{Aggregator, RunInfo, SweepReport};
use crate::capacity::{CapacityProbe, payload_size_for};
use crate::codec::StegoCodec;
use crate::config::{PayloadMode, SweepConfig};
use crate::covers::{CoverCache, CoverSource, discover_covers};
use crate::error::{SweepError, TrialError};
use crate::executor::{ToolExecutor, ToolInvocationError};
use crate::hamming;
use crate::payload::{Payload, PayloadGenerator};
use crate::plan::plan_trials;
use crate::transcode::Transcoder;
use crate::trial::{Measurement, Recompression, Trial, TrialOutcome, TrialResult, TrialStage};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything fixed before the first trial runs.
#[derive(Debug, Clone)]
pub struct SweepSetup {
    pub covers: Vec<CoverSource>,
    pub trials: Vec<Trial>,
    pub payload_len: usize,
    /// Present in per-sweep payload mode.
    pub shared_payload: Option<Payload>,
    pub seed: u32,
}

pub struct Orchestrator {
    config: SweepConfig,
    generator: PayloadGenerator,
    probe: CapacityProbe,
    transcoder: Transcoder,
    codec: StegoCodec,
    cover_cache: CoverCache,
}

impl Orchestrator {
    pub fn new(config: SweepConfig, executor: Arc<dyn ToolExecutor>) -> Self {
        let tools = &config.tools;
        let generator = PayloadGenerator::new(executor.clone(), tools.generate.clone());
        let probe = CapacityProbe::new(executor.clone(), tools.capacity.clone());
        let transcoder = Transcoder::new(
            executor.clone(),
            tools.encode.clone(),
            tools.reencode.clone(),
            tools.diff.clone(),
        );
        let codec = StegoCodec::new(executor, tools.embed.clone(), tools.extract.clone());
        let cover_cache = CoverCache::new(config.work_dir.join("covers"));
        Self {
            config,
            generator,
            probe,
            transcoder,
            codec,
            cover_cache,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn trials_dir(&self) -> PathBuf {
        self.config.work_dir.join("trials")
    }

    /// Warm-up: validate, find covers, size and generate the payload, plan trials.
    pub fn setup(&self) -> Result<SweepSetup, SweepError> {
        self.config.validate()?;
        let settings = &self.config.sweep;

        std::fs::create_dir_all(self.cover_cache.dir())?;
        std::fs::create_dir_all(self.trials_dir())?;

        let covers = discover_covers(&self.config.covers)?;
        info!(count = covers.len(), "covers ready");

        let seed = settings
            .seed
            .unwrap_or_else(|| rand::rng().random_range(1..=u32::MAX));
        let timeout = settings.setup_timeout();

        let payload_len = match settings.payload_bytes {
            Some(bytes) => bytes,
            None => {
                let reference = &covers[0];
                let cover = self
                    .cover_cache
                    .cover_at(&self.transcoder, reference, settings.min_quality, timeout)
                    .map_err(|source| SweepError::ReferenceCover {
                        id: reference.id.clone(),
                        source,
                    })?;
                let capacity = self.probe.probe(&cover, timeout).map_err(|source| {
                    SweepError::CapacityProbe {
                        path: cover.clone(),
                        source,
                    }
                })?;
                info!(cover = ?cover, capacity, "probed cover capacity");
                payload_size_for(capacity, settings.header_margin).ok_or(
                    SweepError::NoPayloadRoom {
                        capacity,
                        margin: settings.header_margin,
                    },
                )?
            }
        };

        let shared_payload = match settings.payload_mode {
            PayloadMode::PerSweep => {
                let payload = self
                    .generator
                    .generate(payload_len, &self.config.work_dir.join("payload.dat"), timeout)
                    .map_err(SweepError::PayloadGeneration)?;
                info!(bytes = payload.len(), md5 = %payload.digest(), "generated payload");
                Some(payload)
            }
            PayloadMode::PerTrial => None,
        };

        let trials = plan_trials(settings, &covers, seed);
        info!(trials = trials.len(), seed, payload_len, "sweep planned");

        Ok(SweepSetup {
            covers,
            trials,
            payload_len,
            shared_payload,
            seed,
        })
    }

    /// Runs every planned trial, calling `on_result` as each one finishes.
    ///
    /// With more than one thread, `on_result` sees trials in completion order;
    /// the returned report is always ordered by trial index.
    pub fn run<F>(&self, setup: &SweepSetup, mut on_result: F) -> SweepReport
    where
        F: FnMut(&TrialResult),
    {
        let threads = self.config.sweep.threads.clamp(1, setup.trials.len().max(1));
        let mut aggregator = Aggregator::new();

        if threads == 1 {
            for trial in &setup.trials {
                let result = self.run_trial(setup, trial);
                on_result(&result);
                aggregator.accumulate(result);
            }
        } else {
            let next = AtomicUsize::new(0);
            let (tx, rx) = mpsc::channel::<TrialResult>();
            std::thread::scope(|scope| {
                for _ in 0..threads {
                    let tx = tx.clone();
                    let next = &next;
                    scope.spawn(move || {
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(trial) = setup.trials.get(index) else {
                                break;
                            };
                            if tx.send(self.run_trial(setup, trial)).is_err() {
                                break;
                            }
                        }
                    });
                }
                drop(tx);
                for result in rx {
                    on_result(&result);
                    aggregator.accumulate(result);
                }
            });
        }

        aggregator.finalize(RunInfo {
            payload_len: setup.payload_len,
            payload_digest: setup.shared_payload.as_ref().map(Payload::digest),
            seed: setup.seed,
        })
    }

    /// Runs a single trial; never fails, failures become the trial's outcome.
    pub fn run_trial(&self, setup: &SweepSetup, trial: &Trial) -> TrialResult {
        let scratch = self.trials_dir().join(trial.scratch_name());
        let deadline = Instant::now() + self.config.sweep.trial_timeout();

        let measured = reset_scratch(&scratch)
            .map_err(TrialError::io(TrialStage::Cover))
            .and_then(|()| self.execute_trial(setup, trial, &scratch, deadline));

        let outcome = match measured {
            Ok(measurement) => TrialOutcome::Measured(measurement),
            Err(err) => {
                warn!(
                    trial = trial.index,
                    quality = trial.quality,
                    mode = %trial.mode,
                    error = %err,
                    "trial failed"
                );
                TrialOutcome::Failed {
                    stage: err.stage(),
                    message: err.to_string(),
                }
            }
        };
        let result = TrialResult {
            trial: trial.clone(),
            outcome,
        };

        // Artifacts of failing trials stay behind for inspection.
        if result.passed() && !self.config.sweep.keep_passing_artifacts {
            if let Err(e) = std::fs::remove_dir_all(&scratch) {
                warn!(dir = ?scratch, error = %e, "failed to clean trial scratch directory");
            }
        }
        result
    }

    fn budget(&self, deadline: Instant, stage: TrialStage) -> Result<Duration, TrialError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TrialError::Tool {
                stage,
                source: ToolInvocationError::Timeout {
                    program: format!("trial {stage}"),
                    timeout: self.config.sweep.trial_timeout(),
                },
            });
        }
        Ok(remaining)
    }

    fn execute_trial(
        &self,
        setup: &SweepSetup,
        trial: &Trial,
        scratch: &Path,
        deadline: Instant,
    ) -> Result<Measurement, TrialError> {
        let settings = &self.config.sweep;

        let source = setup
            .covers
            .get(trial.cover_index)
            .ok_or_else(|| TrialError::Io {
                stage: TrialStage::Cover,
                reason: format!("no cover #{} ('{}')", trial.cover_index, trial.cover_id),
            })?;
        let cover_quality =
            if trial.recompression == Recompression::Requantize || trial.quality_override {
                settings.high_quality
            } else {
                trial.quality
            };
        let cover = self
            .cover_cache
            .cover_at(
                &self.transcoder,
                source,
                cover_quality,
                self.budget(deadline, TrialStage::Cover)?,
            )
            .map_err(TrialError::tool(TrialStage::Cover))?;

        let generated;
        let payload = match &setup.shared_payload {
            Some(shared) => shared,
            None => {
                generated = self
                    .generator
                    .generate(
                        setup.payload_len,
                        &scratch.join("payload.dat"),
                        self.budget(deadline, TrialStage::Payload)?,
                    )
                    .map_err(TrialError::tool(TrialStage::Payload))?;
                &generated
            }
        };

        let stego = scratch.join("stego.jpg");
        self.codec
            .embed(
                &cover,
                &payload.path,
                &stego,
                &trial.embed_options(),
                self.budget(deadline, TrialStage::Embed)?,
            )
            .map_err(TrialError::tool(TrialStage::Embed))?;

        let carrier = match trial.recompression {
            Recompression::None => stego.clone(),
            Recompression::Requantize => {
                let requantized = scratch.join(format!("stego-q{}.jpg", trial.quality));
                self.transcoder
                    .reencode(
                        &stego,
                        trial.quality,
                        &requantized,
                        self.budget(deadline, TrialStage::Recompress)?,
                    )
                    .map_err(TrialError::tool(TrialStage::Recompress))?;
                requantized
            }
        };

        let recovered = self
            .codec
            .extract(
                &carrier,
                &scratch.join("recovered.dat"),
                &trial.extract_options(payload.len()),
                self.budget(deadline, TrialStage::Extract)?,
            )
            .map_err(TrialError::tool(TrialStage::Extract))?;

        let distance = hamming::compare(&payload.bytes, &recovered);
        let exact = hamming::exact_match(&payload.bytes, &recovered);
        debug!(
            trial = trial.index,
            bit_errors = distance.bit_errors,
            total_bits = distance.total_bits,
            exact,
            "trial compared"
        );

        if !distance.is_clean() && trial.recompression == Recompression::Requantize {
            self.render_difference(&stego, &carrier, scratch, deadline);
        }

        Ok(Measurement::new(
            distance,
            exact,
            payload.len(),
            recovered.len(),
        ))
    }

    fn render_difference(&self, before: &Path, after: &Path, scratch: &Path, deadline: Instant) {
        let Ok(timeout) = self.budget(deadline, TrialStage::Recompress) else {
            warn!(dir = ?scratch, "no time left to render difference image");
            return;
        };
        match self
            .transcoder
            .render_difference(before, after, &scratch.join("diff.jpg"), timeout)
        {
            Ok(Some(())) => debug!(dir = ?scratch, "rendered difference image"),
            Ok(None) => {}
            Err(e) => warn!(dir = ?scratch, error = %e, "failed to render difference image"),
        }
    }
}

/// Empties a trial's scratch directory. Artifacts of a failing trial from an
/// earlier run in the same work dir must not be mistaken for fresh output.
fn reset_scratch(scratch: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(scratch) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(scratch)
}
