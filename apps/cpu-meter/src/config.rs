use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api-http.littlebitscloud.cc";
pub const DEFAULT_SAMPLE_FILE: &str = "dstat.csv";
pub const DEFAULT_SAMPLER_PROGRAM: &str = "dstat";

#[derive(Debug, Clone)]
pub struct Config {
    pub upload: UploadConfig,
    pub sampler: SamplerConfig,
    pub sample_file: PathBuf,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct UploadConfig {
    pub api_base: Url,
    pub access_token: String,
    pub device_id: String,
    pub timeout: Duration,
}

// Keeps the bearer token out of `{:?}` output.
impl std::fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadConfig")
            .field("api_base", &self.api_base.as_str())
            .field("access_token", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// Optional JSON file consulted for any key not set in the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileOverrides {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub sample_file: Option<String>,
    #[serde(default)]
    pub sampler_program: Option<String>,
    #[serde(default)]
    pub sampler_args: Option<Vec<String>>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub http_timeout_seconds: Option<u64>,
}

impl FileOverrides {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl Config {
    pub fn from_env(config_path: Option<&Path>) -> Result<Self> {
        dotenv().ok();

        let config_path = config_path
            .map(Path::to_path_buf)
            .or_else(|| env_lookup("CPU_METER_CONFIG_PATH").map(PathBuf::from));
        let overrides = match config_path {
            Some(path) => Some(FileOverrides::load(&path)?),
            None => None,
        };

        Self::resolve(env_lookup, overrides.as_ref())
    }

    /// Builds a config from `lookup` (environment first), then `overrides`, then defaults.
    pub fn resolve<F>(lookup: F, overrides: Option<&FileOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = FileOverrides::default();
        let file = overrides.unwrap_or(&defaults);

        let access_token = env_string(&lookup, "CPU_METER_ACCESS_TOKEN", file.access_token.clone())?;
        let device_id = env_string(&lookup, "CPU_METER_DEVICE_ID", file.device_id.clone())?;

        let api_base = env_string(
            &lookup,
            "CPU_METER_API_BASE",
            file.api_base
                .clone()
                .or_else(|| Some(DEFAULT_API_BASE.to_string())),
        )?;
        let api_base = Url::parse(&api_base).context("invalid CPU_METER_API_BASE")?;
        if api_base.cannot_be_a_base() || !matches!(api_base.scheme(), "http" | "https") {
            bail!("CPU_METER_API_BASE must be an absolute http(s) URL");
        }

        let sample_file = PathBuf::from(env_string(
            &lookup,
            "CPU_METER_SAMPLE_FILE",
            file.sample_file
                .clone()
                .or_else(|| Some(DEFAULT_SAMPLE_FILE.to_string())),
        )?);

        let program = env_string(
            &lookup,
            "CPU_METER_SAMPLER_PROGRAM",
            file.sampler_program
                .clone()
                .or_else(|| Some(DEFAULT_SAMPLER_PROGRAM.to_string())),
        )?;
        let args = match lookup("CPU_METER_SAMPLER_ARGS") {
            Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
            None => file.sampler_args.clone().unwrap_or_default(),
        };

        let poll_interval_ms = env_u64(
            &lookup,
            "CPU_METER_POLL_INTERVAL_MS",
            file.poll_interval_ms.filter(|v| *v != 0).unwrap_or(250),
        )?;
        let http_timeout_seconds = env_u64(
            &lookup,
            "CPU_METER_HTTP_TIMEOUT_SECONDS",
            file.http_timeout_seconds.filter(|v| *v != 0).unwrap_or(5),
        )?;

        Ok(Self {
            upload: UploadConfig {
                api_base,
                access_token,
                device_id,
                timeout: Duration::from_secs(http_timeout_seconds.max(1)),
            },
            sampler: SamplerConfig { program, args },
            sample_file,
            poll_interval: Duration::from_millis(poll_interval_ms.max(10)),
        })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_string<F>(lookup: &F, key: &str, fallback: Option<String>) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .or_else(|| fallback.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        .ok_or_else(|| anyhow!("missing env var {key}"))
}

fn env_u64<F>(lookup: &F, key: &str, fallback: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => Ok(fallback),
    }
}
