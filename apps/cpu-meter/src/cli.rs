use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cpu-meter",
    version,
    about = "Drive a cloudBit output with the current CPU usage reported by dstat"
)]
pub struct Cli {
    /// JSON file with fallback settings for anything not set in the environment.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Sample file to follow (overrides CPU_METER_SAMPLE_FILE).
    #[arg(long)]
    pub sample_file: Option<PathBuf>,
    /// Follow the sample file without launching the sampler.
    #[arg(long, default_value_t = false, conflicts_with = "require_sampler")]
    pub skip_sampler: bool,
    /// Exit if the sampler cannot be launched.
    #[arg(long, default_value_t = false)]
    pub require_sampler: bool,
    /// Log output commands instead of sending them.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
