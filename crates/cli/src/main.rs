//! debounce-bench - load generator for the debounce crate

use anyhow::{Context, Result};
use clap::Parser;
use cli_lib::{bench, report, BenchConfig};
use debounce::DebouncerSettings;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_PAYLOAD_LIMIT: usize = 1024;

/// Hammer one debouncer from many threads and check nothing is lost
#[derive(Parser, Debug)]
#[command(name = "debounce-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of triggering threads
    #[arg(long, default_value = "4")]
    threads: usize,

    /// Triggers issued by each thread
    #[arg(long, default_value = "100000")]
    triggers: u64,

    /// Maximum random pause between triggers, in microseconds
    #[arg(long, default_value = "0")]
    pause_us: u64,

    /// Debounce window in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Debounce timeout in milliseconds (absent: no timeout)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Minimum gap between handler starts in milliseconds
    #[arg(long)]
    event_spacing_ms: Option<u64>,

    /// Minimum gap from handler end to next start in milliseconds
    #[arg(long)]
    handler_spacing_ms: Option<u64>,

    /// Timing granularity in milliseconds
    #[arg(long)]
    granularity_ms: Option<u64>,

    /// Simulated handler latency in milliseconds
    #[arg(long, default_value = "0")]
    handler_ms: u64,

    /// Attach a payload to every trigger (buffered debouncer)
    #[arg(long)]
    payloads: bool,

    /// Payload buffer limit, implies --payloads
    #[arg(long)]
    payload_limit: Option<usize>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the final dispatch
    #[arg(long, default_value = "30")]
    settle_secs: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn file_settings(&self) -> Result<DebouncerSettings> {
        let mut settings = match &self.config {
            Some(path) => DebouncerSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => DebouncerSettings::default(),
        };

        if let Some(value) = self.window_ms {
            settings.debounce_window_ms = value;
        }
        if let Some(value) = self.timeout_ms {
            settings.debounce_timeout_ms = Some(value);
        }
        if let Some(value) = self.event_spacing_ms {
            settings.event_spacing_ms = value;
        }
        if let Some(value) = self.handler_spacing_ms {
            settings.handler_spacing_ms = value;
        }
        if let Some(value) = self.granularity_ms {
            settings.timing_granularity_ms = value;
        }
        if let Some(value) = self.payload_limit {
            settings.payload_limit = Some(value);
        }
        Ok(settings)
    }

    fn bench_config(&self) -> Result<BenchConfig> {
        let file = self.file_settings()?;
        let settings = file.to_settings().context("Invalid debouncer settings")?;

        let payload_limit = if self.payloads || self.payload_limit.is_some() {
            Some(file.payload_limit.unwrap_or(DEFAULT_PAYLOAD_LIMIT))
        } else {
            None
        };
        if payload_limit == Some(0) {
            anyhow::bail!("payload limit must be at least 1");
        }

        Ok(BenchConfig {
            threads: self.threads,
            triggers_per_thread: self.triggers,
            pause: Duration::from_micros(self.pause_us),
            handler_work: Duration::from_millis(self.handler_ms),
            settings,
            payload_limit,
            settle_timeout: Duration::from_secs(self.settle_secs),
        })
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} triggers")
    {
        bar.set_style(style);
    }
    bar
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.bench_config()?;

    let progress = if cli.json {
        None
    } else {
        Some(progress_bar(config.threads as u64 * config.triggers_per_thread))
    };

    let result = bench::run(&config, progress).await?;

    if cli.json {
        print!("{}", report::to_json(&result)?);
    } else {
        print!("{}", report::render(&result));
    }

    result.verify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("debounce-bench").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_mean_no_timeout() {
        let config = parse(&[]).bench_config().unwrap();
        assert!(!config.settings.has_timeout());
        assert_eq!(config.payload_limit, None);
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "debounce_window_ms = 100\nevent_spacing_ms = 7\npayload_limit = 16").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = parse(&["--config", &path, "--window-ms", "5", "--payloads"])
            .bench_config()
            .unwrap();
        assert_eq!(config.settings.debounce_window, Duration::from_millis(5));
        assert_eq!(config.settings.event_spacing, Duration::from_millis(7));
        assert_eq!(config.payload_limit, Some(16));
    }

    #[test]
    fn test_payload_limit_implies_buffered() {
        let config = parse(&["--payload-limit", "8"]).bench_config().unwrap();
        assert_eq!(config.payload_limit, Some(8));
    }

    #[test]
    fn test_zero_payload_limit_rejected() {
        assert!(parse(&["--payload-limit", "0"]).bench_config().is_err());
    }
}
