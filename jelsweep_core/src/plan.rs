use crate::config::SweepSettings;
use crate::covers::CoverSource;
use crate::trial::{EmbedMode, Recompression, Trial};

/// Expands the configured axes into the ordered list of trials.
///
/// Order: cover, frequency set, mode, recompression, quality, and finally the
/// quality-override twin (only for trials without recompression). The run
/// seed is attached to seeded trials only. Indices are dense and serve as the
/// trial sort key.
///
/// A pre-encoded cover embedded as stored does not depend on the quality
/// axis, so it gets a single `as-is` trial per category instead of one per
/// quality.
pub fn plan_trials(settings: &SweepSettings, covers: &[CoverSource], seed: u32) -> Vec<Trial> {
    let mut trials = Vec::new();
    for (cover_index, cover) in covers.iter().enumerate() {
        for frequency_set in &settings.frequency_sets {
            for &mode in &settings.modes {
                for &recompression in &settings.recompression {
                    for quality in settings.qualities() {
                        let overrides: &[bool] =
                            if settings.quality_override && recompression == Recompression::None {
                                &[false, true]
                            } else {
                                &[false]
                            };
                        for &quality_override in overrides {
                            let as_encoded = cover.preencoded
                                && recompression == Recompression::None
                                && !quality_override;
                            if as_encoded && quality != settings.min_quality {
                                continue;
                            }
                            trials.push(Trial {
                                index: trials.len(),
                                cover_index,
                                cover_id: cover.id.clone(),
                                quality,
                                as_encoded,
                                frequency_set: frequency_set.clone(),
                                mode,
                                recompression,
                                quality_override,
                                seed: (mode == EmbedMode::Seeded).then_some(seed),
                                ecc_length: settings.ecc_length,
                            });
                        }
                    }
                }
            }
        }
    }
    trials
}
