use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use cirrus_pload::{PloadConfig, run_once};

/// Take one current/voltage/power reading from the CS5480 on an Ember board
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = cirrus_pload::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Chip command prefix, `_pload` is appended
    #[arg(long)]
    prefix: Option<String>,

    /// Voltage the chip was calibrated against, in V
    #[arg(long)]
    voltage_reference: Option<f64>,

    /// Current the chip was calibrated against, in A
    #[arg(long)]
    current_reference: Option<f64>,

    /// Path to em3xx_load
    #[arg(long)]
    helper: Option<PathBuf>,

    /// Results file
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Trace log file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<PloadConfig> {
        let mut config = PloadConfig::load_from(&self.config)
            .with_context(|| format!("Invalid configuration in {}", self.config.display()))?;

        if let Some(prefix) = &self.prefix {
            config.command_prefix = prefix.clone();
        }
        if let Some(v) = self.voltage_reference {
            config.calibration.voltage_reference = v;
        }
        if let Some(i) = self.current_reference {
            config.calibration.current_reference = i;
        }
        if let Some(helper) = &self.helper {
            config.gateway.executable = helper.clone();
        }
        if let Some(data_file) = &self.data_file {
            config.output.data_file = data_file.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.output.log_file = log_file.clone();
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
        config.validate().context("Invalid command line override")?;
        Ok(config)
    }
}

fn init_logging(config: &PloadConfig) -> anyhow::Result<()> {
    let level = tracing::Level::from_str(&config.log_level)
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;
    let log_file = File::create(&config.output.log_file)
        .with_context(|| format!("Cannot create {}", config.output.log_file.display()))?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file).and(io::stderr))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// A record left over from an earlier run must not be mistaken for this one
fn remove_stale_record(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn write_record(path: &Path, record: &str) -> io::Result<()> {
    fs::write(path, record)
}

async fn run(config: &PloadConfig) -> anyhow::Result<()> {
    remove_stale_record(&config.output.data_file)
        .with_context(|| format!("Cannot remove {}", config.output.data_file.display()))?;

    let reading = run_once(config).await?;

    let record = reading.to_record();
    println!("{}", record);
    write_record(&config.output.data_file, &record)
        .with_context(|| format!("Cannot write {}", config.output.data_file.display()))?;
    info!("Record written to {}", config.output.data_file.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            println!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
