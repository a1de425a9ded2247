//! Command-line flags, each with a `PLUGIN_*` or `DRONE_*` environment fallback.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Cache build directories in S3 between pipeline runs.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "stash")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Plugin mode: rebuild, restore or flush
    #[arg(long, env = "PLUGIN_MODE")]
    pub mode: Option<String>,

    /// Rebuild the cache directories (deprecated, use --mode)
    #[arg(long, env = "PLUGIN_REBUILD")]
    pub rebuild: bool,

    /// Restore the cache directories (deprecated, use --mode)
    #[arg(long, env = "PLUGIN_RESTORE")]
    pub restore: bool,

    /// Flush the cache (deprecated, use --mode)
    #[arg(long, env = "PLUGIN_FLUSH")]
    pub flush: bool,

    /// File name of the cache archive; its suffix selects the format
    #[arg(long, env = "PLUGIN_FILENAME")]
    pub filename: Option<String>,

    /// Storage root (bucket) of cache files
    #[arg(long, env = "PLUGIN_ROOT")]
    pub root: Option<String>,

    /// Path to cache files relative to the root
    #[arg(long, env = "PLUGIN_PATH")]
    pub path: Option<String>,

    /// Path to default cache files relative to the root
    #[arg(long, env = "PLUGIN_FALLBACK_PATH")]
    pub fallback_path: Option<String>,

    /// Path to flushable cache files relative to the root
    #[arg(long, env = "PLUGIN_FLUSH_PATH")]
    pub flush_path: Option<String>,

    /// Flush cache files older than this many days
    #[arg(long, env = "PLUGIN_FLUSH_AGE", default_value_t = 30)]
    pub flush_age: i64,

    /// Directories to cache
    #[arg(long, env = "PLUGIN_MOUNT", value_delimiter = ',')]
    pub mount: Vec<String>,

    /// Directory to change into before archiving or restoring
    #[arg(long, env = "PLUGIN_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// PEM encoded CA certificate to install
    #[arg(long, env = "PLUGIN_CACERT")]
    pub cacert: Option<String>,

    /// File holding a PEM encoded CA certificate to install
    #[arg(long, env = "PLUGIN_CACERT_PATH")]
    pub cacert_path: Option<PathBuf>,

    /// S3 endpoint, `s3://bucket` or `file:///dir`
    #[arg(long, env = "PLUGIN_SERVER")]
    pub endpoint: Option<String>,

    /// S3 transfer acceleration endpoint; any value enables acceleration
    #[arg(long, env = "PLUGIN_ACCELERATED_ENDPOINT")]
    pub accelerated_endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "PLUGIN_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "PLUGIN_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// S3 session token
    #[arg(long, env = "PLUGIN_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// S3 region
    #[arg(long, env = "PLUGIN_REGION")]
    pub region: Option<String>,

    /// Path to an S3 credentials file
    #[arg(long, env = "PLUGIN_FILE_CREDENTIALS_PATH")]
    pub file_credentials: Option<PathBuf>,

    /// Profile in the S3 credentials file
    #[arg(long, env = "PLUGIN_PROFILE")]
    pub profile: Option<String>,

    /// Repository owner
    #[arg(long, env = "DRONE_REPO_OWNER", default_value = "")]
    pub repo_owner: String,

    /// Repository name
    #[arg(long, env = "DRONE_REPO_NAME", default_value = "")]
    pub repo_name: String,

    /// Branch of the commit being built
    #[arg(long, env = "DRONE_COMMIT_BRANCH", default_value = "master")]
    pub commit_branch: String,

    /// Default branch of the repository
    #[arg(long, env = "DRONE_REPO_BRANCH", default_value = "master")]
    pub repo_branch: String,

    /// Enable debug logging
    #[arg(long, env = "PLUGIN_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(long, env = "PLUGIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Args {
    /// Fill unset S3 options from their secondary environment variables.
    ///
    /// clap reads one variable per flag; the rest are checked here in order.
    pub fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .copied()
                .filter_map(&lookup)
                .find(|value| !value.is_empty())
        };

        fill(&mut self.endpoint, || {
            first(&["PLUGIN_ENDPOINT", "CACHE_S3_ENDPOINT", "CACHE_S3_SERVER", "S3_ENDPOINT"])
        });
        fill(&mut self.accelerated_endpoint, || first(&["CACHE_S3_ACCELERATED_ENDPOINT"]));
        fill(&mut self.access_key, || first(&["CACHE_S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]));
        fill(&mut self.secret_key, || {
            first(&["CACHE_S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"])
        });
        fill(&mut self.session_token, || {
            first(&["CACHE_S3_SESSION_TOKEN", "AWS_SESSION_TOKEN"])
        });
        fill(&mut self.region, || first(&["CACHE_S3_REGION"]));
        fill(&mut self.profile, || first(&["CACHE_S3_PROFILE", "AWS_PROFILE"]));
        if self.file_credentials.is_none() {
            self.file_credentials =
                first(&["CACHE_FILE_CREDENTIALS_PATH", "AWS_SHARED_CREDENTIALS_FILE"])
                    .map(PathBuf::from);
        }
    }
}

fn fill(slot: &mut Option<String>, fallback: impl FnOnce() -> Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        *slot = fallback();
    }
}
