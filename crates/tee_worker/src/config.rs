//! Layered configuration: TOML file < environment < CLI flag.
//!
//! `Args` is the clap-parsed layer: every field is optional so we can tell
//! "not supplied on the command line or environment" apart from "supplied
//! and happens to match the default." `Config` is the fully-resolved
//! result of folding an optional TOML file's values underneath `Args`,
//! then falling back to hardcoded defaults; it's what the rest of the
//! worker actually reads.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealingMode {
    Enclave,
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::fmt::Display for SealingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealingMode::Enclave => write!(f, "enclave"),
            SealingMode::Standalone => write!(f, "standalone"),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// The CLI/environment layer. `env` attributes make clap check
/// `TEE_WORKER_*` whenever the flag itself is absent; a field stays
/// `None` only when neither was supplied, which is how we know to fall
/// through to the config file and then the hardcoded default.
#[derive(Debug, Parser)]
#[command(name = "tee-worker", about = "Confidential-compute job worker")]
pub struct Args {
    /// Optional TOML file providing defaults for any field below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TEE_WORKER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "TEE_WORKER_API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "TEE_WORKER_MAX_JOBS")]
    pub max_jobs: Option<usize>,

    #[arg(long, env = "TEE_WORKER_FAST_QUEUE_SIZE")]
    pub fast_queue_size: Option<usize>,

    #[arg(long, env = "TEE_WORKER_SLOW_QUEUE_SIZE")]
    pub slow_queue_size: Option<usize>,

    #[arg(long, env = "TEE_WORKER_EXTERNAL_PRIORITY_ENDPOINT")]
    pub external_worker_id_priority_endpoint: Option<String>,

    #[arg(long, env = "TEE_WORKER_PRIORITY_REFRESH_SECONDS")]
    pub priority_refresh_interval_seconds: Option<u64>,

    #[arg(long, env = "TEE_WORKER_RESULT_CACHE_MAX_SIZE")]
    pub result_cache_max_size: Option<usize>,

    #[arg(long, env = "TEE_WORKER_RESULT_CACHE_MAX_AGE_SECONDS")]
    pub result_cache_max_age_seconds: Option<u64>,

    #[arg(long, env = "TEE_WORKER_JOB_TIMEOUT_SECONDS")]
    pub job_timeout_seconds: Option<u64>,

    #[arg(long, env = "TEE_WORKER_STATS_BUF_SIZE")]
    pub stats_buf_size: Option<usize>,

    #[arg(long, env = "TEE_WORKER_ID")]
    pub worker_id: Option<String>,

    #[arg(long, env = "TEE_WORKER_SEALING_MODE", value_enum)]
    pub sealing_mode: Option<SealingMode>,

    /// PEM-encoded RSA public key used to verify `/setkey` submissions.
    /// Required for `/setkey` to be reachable at all; ignored in
    /// standalone mode.
    #[arg(long, env = "TEE_WORKER_SETKEY_PUBLIC_KEY_PEM")]
    pub setkey_public_key_pem: Option<String>,

    #[arg(long, env = "TEE_WORKER_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "TEE_WORKER_BIND_ADDR")]
    pub bind_addr: Option<String>,
}

/// Mirrors `Args` field-for-field but via `serde` instead of `clap`; this
/// is what a `--config` TOML file deserializes into. Any field it omits
/// simply stays `None` and falls through to the hardcoded default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    api_key: Option<String>,
    max_jobs: Option<usize>,
    fast_queue_size: Option<usize>,
    slow_queue_size: Option<usize>,
    external_worker_id_priority_endpoint: Option<String>,
    priority_refresh_interval_seconds: Option<u64>,
    result_cache_max_size: Option<usize>,
    result_cache_max_age_seconds: Option<u64>,
    job_timeout_seconds: Option<u64>,
    stats_buf_size: Option<usize>,
    worker_id: Option<String>,
    sealing_mode: Option<SealingMode>,
    setkey_public_key_pem: Option<String>,
    log_format: Option<LogFormat>,
    bind_addr: Option<String>,
}

/// The fully-resolved configuration the rest of the worker reads. Every
/// field here is a concrete value: the three layers have already been
/// folded together by [`Config::load`].
#[derive(Debug)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub max_jobs: usize,
    pub fast_queue_size: usize,
    pub slow_queue_size: usize,
    pub external_worker_id_priority_endpoint: Option<String>,
    pub priority_refresh_interval_seconds: u64,
    pub result_cache_max_size: usize,
    pub result_cache_max_age_seconds: u64,
    pub job_timeout_seconds: u64,
    pub stats_buf_size: usize,
    pub worker_id: Option<String>,
    pub sealing_mode: SealingMode,
    pub setkey_public_key_pem: Option<String>,
    pub log_format: LogFormat,
    pub bind_addr: String,
}

macro_rules! resolve {
    ($args:expr, $file:expr, $field:ident, $default:expr) => {
        $args
            .$field
            .take()
            .or($file.$field.take())
            .unwrap_or($default)
    };
}

impl Config {
    /// Parses CLI flags and environment variables via clap, folds an
    /// optional `--config` TOML file underneath them, and applies
    /// hardcoded defaults for anything still unset. Precedence, lowest
    /// to highest: TOML file, environment, CLI flag.
    pub fn load() -> anyhow::Result<Self> {
        let mut args = Args::parse();

        let mut file = match &args.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("config file {} is not readable: {e}", path.display())
                })?;
                toml::from_str::<FileConfig>(&contents)
                    .map_err(|e| anyhow::anyhow!("config file {} is invalid: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        Ok(Config {
            data_dir: args.data_dir.take().or(file.data_dir.take()),
            api_key: args.api_key.take().or(file.api_key.take()),
            max_jobs: resolve!(args, file, max_jobs, 10),
            fast_queue_size: resolve!(args, file, fast_queue_size, 100),
            slow_queue_size: resolve!(args, file, slow_queue_size, 500),
            external_worker_id_priority_endpoint: args
                .external_worker_id_priority_endpoint
                .take()
                .or(file.external_worker_id_priority_endpoint.take()),
            priority_refresh_interval_seconds: resolve!(
                args,
                file,
                priority_refresh_interval_seconds,
                900
            ),
            result_cache_max_size: resolve!(args, file, result_cache_max_size, 1000),
            result_cache_max_age_seconds: resolve!(args, file, result_cache_max_age_seconds, 600),
            job_timeout_seconds: resolve!(args, file, job_timeout_seconds, 300),
            stats_buf_size: resolve!(args, file, stats_buf_size, 256),
            worker_id: args.worker_id.take().or(file.worker_id.take()),
            sealing_mode: resolve!(args, file, sealing_mode, SealingMode::Enclave),
            setkey_public_key_pem: args
                .setkey_public_key_pem
                .take()
                .or(file.setkey_public_key_pem.take()),
            log_format: resolve!(args, file, log_format, LogFormat::Pretty),
            bind_addr: args
                .bind_addr
                .take()
                .or(file.bind_addr.take())
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fast_queue_size == 0 || self.slow_queue_size == 0 {
            anyhow::bail!("queue sizes must be non-zero");
        }
        if self.priority_refresh_interval_seconds < 10 {
            anyhow::bail!("priority_refresh_interval_seconds must be at least 10");
        }
        if self.sealing_mode == SealingMode::Enclave && self.setkey_public_key_pem.is_none() {
            tracing::warn!(
                "enclave mode started without a setkey public key; /setkey will reject everything"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_rejects_unknown_fields() {
        let err = toml::from_str::<FileConfig>("not_a_real_field = 1").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn file_config_accepts_a_sparse_document() {
        let parsed: FileConfig = toml::from_str(
            r#"
            max_jobs = 4
            sealing_mode = "standalone"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.max_jobs, Some(4));
        assert!(matches!(parsed.sealing_mode, Some(SealingMode::Standalone)));
        assert!(parsed.api_key.is_none());
    }
}
