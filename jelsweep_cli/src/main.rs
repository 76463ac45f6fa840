use jelsweep_core::config::SweepConfig;
use jelsweep_core::executor::CommandExecutor;
use jelsweep_core::orchestrator::Orchestrator;
use jelsweep_core::trial::TrialResult;

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG_FILE: &str = "jelsweep.toml";

/// Exit status when the sweep ran but found bit errors or failed trials.
const EXIT_TRIALS_FAILED: u8 = 1;
/// Exit status when the sweep could not be set up at all.
const EXIT_SETUP_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[clap(author, version, about = "JPEG steganography codec quality sweep", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Scratch directory for covers, stego images and recovered payloads.
    #[clap(short, long)]
    work_dir: Option<PathBuf>,
    #[clap(long)]
    min_quality: Option<u8>,
    #[clap(long)]
    max_quality: Option<u8>,
    #[clap(short, long)]
    threads: Option<usize>,
    /// Fixed seed for seeded trials instead of a fresh one per run.
    #[clap(long)]
    seed: Option<u32>,
    /// Also write the full report as JSON.
    #[clap(long)]
    report_json: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<SweepConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            SweepConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                SweepConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file and no '{DEFAULT_CONFIG_FILE}' found, using defaults.");
                SweepConfig::default()
            }
        }
    };

    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(q) = cli.min_quality {
        config.sweep.min_quality = q;
    }
    if let Some(q) = cli.max_quality {
        config.sweep.max_quality = q;
    }
    if let Some(threads) = cli.threads {
        config.sweep.threads = threads;
    }
    if let Some(seed) = cli.seed {
        config.sweep.seed = Some(seed);
    }
    Ok(config)
}

/// Writes the `<quality>:<bits>` stream, one flushed line per trial.
///
/// A sequential sweep gets a `#` header whenever the cover, mode, frequency
/// set or recompression changes. Parallel workers interleave categories, so
/// there every line names its own.
struct ProgressPrinter<W: Write> {
    out: W,
    interleaved: bool,
    current: Option<String>,
}

impl<W: Write> ProgressPrinter<W> {
    fn new(out: W, interleaved: bool) -> Self {
        Self {
            out,
            interleaved,
            current: None,
        }
    }

    fn print(&mut self, result: &TrialResult) -> std::io::Result<()> {
        let category = result.trial.category_label();
        if self.interleaved {
            writeln!(self.out, "{}  # {category}", result.progress_line())?;
        } else {
            if self.current.as_deref() != Some(category.as_str()) {
                writeln!(self.out, "# {category}")?;
                self.current = Some(category);
            }
            writeln!(self.out, "{}", result.progress_line())?;
        }
        self.out.flush()
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    debug!("Effective configuration: {config:#?}");

    let sweep = Orchestrator::new(config, Arc::new(CommandExecutor::new()));
    let setup = match sweep.setup() {
        Ok(setup) => setup,
        Err(e) => {
            error!("Sweep setup failed: {e}");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    println!("# quality, hamming distance");
    println!("# Using message length of {} bytes.", setup.payload_len);
    let mut progress = ProgressPrinter::new(std::io::stdout(), sweep.config().sweep.threads > 1);
    let start_time = Instant::now();
    let report = sweep.run(&setup, |result| {
        // Progress is best-effort; a closed stdout must not stop the sweep.
        let _ = progress.print(result);
    });
    info!("Sweep finished in {:.2?}.", start_time.elapsed());

    println!();
    println!("{report}");

    if let Some(path) = &cli.report_json {
        match report.write_json(path) {
            Ok(()) => info!("Wrote JSON report to {path:?}"),
            Err(e) => warn!("Failed to write JSON report to {path:?}: {e}"),
        }
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TRIALS_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jelsweep_core::codec::FrequencySet;
    use jelsweep_core::trial::{
        EmbedMode, Measurement, Recompression, Trial, TrialOutcome, TrialStage,
    };

    fn result(index: usize, mode: EmbedMode, quality: u8, bit_errors: Option<u64>) -> TrialResult {
        let outcome = match bit_errors {
            Some(bit_errors) => TrialOutcome::Measured(Measurement {
                bit_errors,
                total_bits: 128,
                exact_match: bit_errors == 0,
                sent_len: 16,
                recovered_len: 16,
            }),
            None => TrialOutcome::Failed {
                stage: TrialStage::Extract,
                message: "unwedge exited with code 1".to_string(),
            },
        };
        TrialResult {
            trial: Trial {
                index,
                cover_index: 0,
                cover_id: "tree640".to_string(),
                quality,
                as_encoded: false,
                frequency_set: FrequencySet::Auto,
                mode,
                recompression: Recompression::None,
                quality_override: false,
                seed: None,
                ecc_length: None,
            },
            outcome,
        }
    }

    #[test]
    fn sequential_progress_marks_each_category() {
        let mut printer = ProgressPrinter::new(Vec::new(), false);
        printer.print(&result(0, EmbedMode::Plain, 30, Some(0))).unwrap();
        printer.print(&result(1, EmbedMode::Plain, 31, None)).unwrap();
        printer.print(&result(2, EmbedMode::Seeded, 30, Some(4))).unwrap();
        let text = String::from_utf8(printer.out).unwrap();
        assert_eq!(
            text,
            "# cover tree640, plain, frequencies auto, recompression none\n\
             30:0\n\
             31:error\n\
             # cover tree640, seeded, frequencies auto, recompression none\n\
             30:4\n"
        );
    }

    #[test]
    fn interleaved_progress_names_the_category_on_every_line() {
        let mut printer = ProgressPrinter::new(Vec::new(), true);
        printer.print(&result(2, EmbedMode::Seeded, 30, Some(0))).unwrap();
        printer.print(&result(0, EmbedMode::Plain, 30, Some(1))).unwrap();
        let text = String::from_utf8(printer.out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("30:0  # "));
        assert!(lines[0].ends_with("seeded, frequencies auto, recompression none"));
        assert!(lines[1].starts_with("30:1  # "));
        assert!(lines[1].contains(", plain, "));
    }

    #[test]
    fn cli_overrides_apply_on_top_of_defaults() {
        let dir = std::env::temp_dir().join("jelsweep-cli-test-does-not-exist.toml");
        let cli = Cli::parse_from(["jelsweep_cli", "--config-file", dir.to_str().unwrap()]);
        assert!(load_config(&cli).is_err());

        let cli = Cli::parse_from([
            "jelsweep_cli",
            "--work-dir",
            "/tmp/jelsweep",
            "--min-quality",
            "40",
            "--max-quality",
            "41",
            "--threads",
            "3",
            "--seed",
            "20",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/tmp/jelsweep"));
        assert_eq!(config.sweep.qualities().count(), 2);
        assert_eq!(config.sweep.threads, 3);
        assert_eq!(config.sweep.seed, Some(20));
    }
}
