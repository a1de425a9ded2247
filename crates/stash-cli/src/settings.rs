//! Validated plugin settings.

use crate::args::Args;
use stash_cache::ArchiveFormat;
use stash_core::{Error, Result, clean_path};
use stash_s3::S3Options;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;

const AWS_DOMAIN: &str = "amazonaws.com";
const AWS_ENDPOINT: &str = "https://s3.amazonaws.com";
const DEFAULT_FILENAME: &str = "archive.tar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Rebuild,
    Restore,
    Flush,
}

impl Mode {
    fn parse(mode: &str) -> Result<Self> {
        match mode {
            "rebuild" => Ok(Mode::Rebuild),
            "restore" => Ok(Mode::Restore),
            "flush" => Ok(Mode::Flush),
            other => Err(invalid(format!("invalid mode {} specified", other))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Rebuild => write!(f, "rebuild"),
            Mode::Restore => write!(f, "restore"),
            Mode::Flush => write!(f, "flush"),
        }
    }
}

/// Where archives are stored.
#[derive(Debug, Clone)]
pub enum Backend {
    S3(S3Options),
    /// `file://` endpoint: blobs below a local directory.
    Filesystem(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub format: ArchiveFormat,
    pub filename: String,
    pub root: String,
    pub path: String,
    pub fallback_path: String,
    pub flush_path: String,
    pub flush_age: i64,
    pub mounts: Vec<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub cacert: Option<String>,
    pub cacert_path: Option<PathBuf>,
    pub backend: Backend,
}

impl Settings {
    /// Validate `args` and fill in defaults.
    pub fn resolve(args: Args) -> Result<Self> {
        let mode = resolve_mode(&args)?;
        info!(mode = %mode, "Using mode");

        let filename =
            non_empty(args.filename.clone()).unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let format = ArchiveFormat::from_filename(&filename)?;
        debug!(filename = %filename, format = %format, "Using filename");

        let path = non_empty(args.path.clone()).unwrap_or_else(|| {
            format!("{}/{}/{}", args.repo_owner, args.repo_name, args.commit_branch)
        });
        let fallback_path = non_empty(args.fallback_path.clone()).unwrap_or_else(|| {
            format!("{}/{}/{}", args.repo_owner, args.repo_name, args.repo_branch)
        });
        let flush_path = non_empty(args.flush_path.clone())
            .unwrap_or_else(|| format!("{}/{}", args.repo_owner, args.repo_name));

        let mounts: Vec<PathBuf> = args
            .mount
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(PathBuf::from)
            .collect();
        if mode == Mode::Rebuild && mounts.is_empty() {
            return Err(invalid("cache not specified"));
        }

        let mut root = non_empty(args.root.clone()).unwrap_or_default();
        let backend = resolve_backend(&args, &mut root)?;

        Ok(Self {
            mode,
            format,
            filename,
            root,
            path,
            fallback_path,
            flush_path,
            flush_age: args.flush_age,
            mounts,
            workdir: args.workdir,
            cacert: non_empty(args.cacert),
            cacert_path: args.cacert_path,
            backend,
        })
    }

    /// Storage key of this build's archive.
    pub fn cache_key(&self) -> String {
        clean_path(&[&self.root, &self.path, &self.filename])
    }

    pub fn fallback_key(&self) -> String {
        clean_path(&[&self.root, &self.fallback_path, &self.filename])
    }

    pub fn flush_prefix(&self) -> String {
        clean_path(&[&self.root, &self.flush_path])
    }
}

/// Exactly one mode, given either by name or by one deprecated boolean.
fn resolve_mode(args: &Args) -> Result<Mode> {
    let flags = [
        (args.rebuild, Mode::Rebuild),
        (args.restore, Mode::Restore),
        (args.flush, Mode::Flush),
    ];
    let set: Vec<Mode> = flags.iter().filter(|(on, _)| *on).map(|(_, m)| *m).collect();

    match non_empty(args.mode.clone()) {
        Some(_) if !set.is_empty() => Err(invalid("mode specified multiple ways")),
        Some(mode) => Mode::parse(&mode),
        None => {
            info!(
                rebuild = args.rebuild,
                restore = args.restore,
                flush = args.flush,
                "Mode specified using boolean config"
            );
            match set.as_slice() {
                [] => Err(invalid("no mode specified")),
                [mode] => Ok(*mode),
                _ => Err(invalid("multiple modes specified")),
            }
        }
    }
}

/// Parse the endpoint, moving any bucket it names into `root`.
fn resolve_backend(args: &Args, root: &mut String) -> Result<Backend> {
    let endpoint = non_empty(args.endpoint.clone()).unwrap_or_else(|| AWS_ENDPOINT.to_string());
    let url = Url::parse(&endpoint)
        .map_err(|_| invalid(format!("could not parse endpoint {}", endpoint)))?;

    if url.scheme() == "file" {
        let dir = url
            .to_file_path()
            .map_err(|_| invalid(format!("could not parse endpoint {}", endpoint)))?;
        info!(dir = %dir.display(), "Using filesystem store");
        return Ok(Backend::Filesystem(dir));
    }

    let mut is_aws = false;
    let mut custom_endpoint = Some(endpoint.trim_end_matches('/').to_string());
    let mut bucket = String::new();
    let mut region = String::new();

    let host = url.host_str().unwrap_or_default();
    if host.ends_with(AWS_DOMAIN) {
        is_aws = true;
        let labels: Vec<&str> = host.split('.').collect();
        let s3_label = match labels.len() {
            // bucket.s3.region.amazonaws.com
            5 => {
                debug!(host, "Using virtual host style access");
                bucket = labels[0].to_string();
                region = labels[2].to_string();
                1
            }
            // s3.region.amazonaws.com/bucket
            4 => {
                debug!(host, "Using path style access");
                bucket = url.path().trim_matches('/').to_string();
                region = labels[1].to_string();
                0
            }
            3 => 0,
            _ => return Err(invalid(format!("unknown aws domain for url {}", endpoint))),
        };
        if labels[s3_label] != "s3" {
            return Err(invalid(format!("unknown aws domain for url {}", endpoint)));
        }
        custom_endpoint = None;
    } else if url.scheme() == "s3" {
        debug!(endpoint = %endpoint, "Using s3 url");
        bucket = host.to_string();
        custom_endpoint = None;
    } else if url.scheme() != "https" && url.scheme() != "http" {
        return Err(invalid(format!("unknown scheme for endpoint {}", endpoint)));
    }

    if !bucket.is_empty() {
        info!(bucket = %bucket, "Bucket found in S3 endpoint");
        if !root.is_empty() {
            return Err(invalid(format!(
                "bucket {} already specified in endpoint remove from root",
                bucket
            )));
        }
        *root = bucket;
    }

    let mut configured_region = non_empty(args.region.clone()).unwrap_or_default();
    if !region.is_empty() {
        info!(region = %region, "Region found in S3 endpoint");
        if !configured_region.is_empty() {
            return Err(invalid(format!(
                "region {} already specified in endpoint remove from config",
                region
            )));
        }
        configured_region = region;
    }

    let access_key = non_empty(args.access_key.clone());
    let secret_key = non_empty(args.secret_key.clone());
    let credentials_file = args
        .file_credentials
        .clone()
        .filter(|p| !p.as_os_str().is_empty());

    if (access_key.is_some() || secret_key.is_some()) && credentials_file.is_some() {
        return Err(invalid(
            "only one credentials method should be used: access-key and secret-key or the credentials file",
        ));
    }
    if let Some(file) = &credentials_file {
        if !file.exists() {
            return Err(invalid(format!("file {} does not exist", file.display())));
        }
    }

    if is_aws && root.is_empty() {
        return Err(invalid("no aws bucket specified in root or endpoint"));
    }

    let mut options = match &custom_endpoint {
        Some(endpoint) => S3Options::new(endpoint.clone()),
        None => S3Options::default(),
    }
    .with_region(configured_region)
    .with_accelerate(non_empty(args.accelerated_endpoint.clone()).is_some());

    if let (Some(access), Some(secret)) = (access_key, secret_key) {
        let token = non_empty(args.session_token.clone());
        options = options.with_static_credentials(access, secret, token);
    } else if let Some(file) = credentials_file {
        options = options.with_credentials_file(file, non_empty(args.profile.clone()));
    } else {
        options.profile = non_empty(args.profile.clone());
    }

    info!(
        endpoint = custom_endpoint.as_deref().unwrap_or(AWS_ENDPOINT),
        region = %options.region,
        "Using S3 endpoint"
    );
    Ok(Backend::S3(options))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidSettings(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            repo_owner: "octocat".to_string(),
            repo_name: "hello".to_string(),
            commit_branch: "feature".to_string(),
            repo_branch: "main".to_string(),
            flush_age: 30,
            root: Some("cache-bucket".to_string()),
            ..Default::default()
        }
    }

    fn with_mode(mode: &str) -> Args {
        Args {
            mode: Some(mode.to_string()),
            mount: vec!["node_modules".to_string()],
            ..args()
        }
    }

    fn s3(settings: &Settings) -> &S3Options {
        match &settings.backend {
            Backend::S3(options) => options,
            other => panic!("expected S3 backend, got {other:?}"),
        }
    }

    fn error_message(args: Args) -> String {
        match Settings::resolve(args) {
            Err(Error::InvalidSettings(message)) => message,
            other => panic!("expected invalid settings, got {other:?}"),
        }
    }

    #[test]
    fn test_mode_by_name() {
        assert_eq!(Settings::resolve(with_mode("restore")).unwrap().mode, Mode::Restore);
        assert_eq!(Settings::resolve(with_mode("flush")).unwrap().mode, Mode::Flush);
        assert!(error_message(with_mode("purge")).contains("invalid mode purge"));
    }

    #[test]
    fn test_mode_by_boolean() {
        let settings = Settings::resolve(Args {
            rebuild: true,
            mount: vec!["vendor".to_string()],
            ..args()
        })
        .unwrap();
        assert_eq!(settings.mode, Mode::Rebuild);
    }

    #[test]
    fn test_mode_conflicts() {
        assert_eq!(error_message(args()), "no mode specified");
        assert_eq!(
            error_message(Args {
                restore: true,
                flush: true,
                ..args()
            }),
            "multiple modes specified"
        );
        assert_eq!(
            error_message(Args {
                restore: true,
                ..with_mode("restore")
            }),
            "mode specified multiple ways"
        );
    }

    #[test]
    fn test_rebuild_requires_mounts() {
        let message = error_message(Args {
            mount: vec![" ".to_string()],
            ..with_mode("rebuild")
        });
        assert_eq!(message, "cache not specified");
    }

    #[test]
    fn test_default_paths_and_keys() {
        let settings = Settings::resolve(with_mode("restore")).unwrap();
        assert_eq!(settings.filename, "archive.tar");
        assert_eq!(settings.format, ArchiveFormat::Tar);
        assert_eq!(settings.cache_key(), "cache-bucket/octocat/hello/feature/archive.tar");
        assert_eq!(settings.fallback_key(), "cache-bucket/octocat/hello/main/archive.tar");
        assert_eq!(settings.flush_prefix(), "cache-bucket/octocat/hello");
    }

    #[test]
    fn test_explicit_paths_are_cleaned() {
        let settings = Settings::resolve(Args {
            path: Some("team//project/./cache/".to_string()),
            filename: Some("deps.tgz".to_string()),
            ..with_mode("rebuild")
        })
        .unwrap();
        assert_eq!(settings.format, ArchiveFormat::TarGz);
        assert_eq!(settings.cache_key(), "cache-bucket/team/project/cache/deps.tgz");
    }

    #[test]
    fn test_unsupported_filename() {
        let err = Settings::resolve(Args {
            filename: Some("cache.zip".to_string()),
            ..with_mode("restore")
        })
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_default_endpoint_is_aws() {
        let settings = Settings::resolve(with_mode("restore")).unwrap();
        let options = s3(&settings);
        assert!(options.endpoint.is_none());
        assert_eq!(options.region, "us-east-1");
    }

    #[test]
    fn test_aws_requires_bucket() {
        let message = error_message(Args {
            root: None,
            ..with_mode("restore")
        });
        assert_eq!(message, "no aws bucket specified in root or endpoint");
    }

    #[test]
    fn test_virtual_host_endpoint() {
        let settings = Settings::resolve(Args {
            root: None,
            endpoint: Some("https://builds.s3.eu-west-1.amazonaws.com".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        assert_eq!(settings.root, "builds");
        assert_eq!(s3(&settings).region, "eu-west-1");
        assert!(s3(&settings).endpoint.is_none());
        assert_eq!(settings.cache_key(), "builds/octocat/hello/feature/archive.tar");
    }

    #[test]
    fn test_path_style_endpoint() {
        let settings = Settings::resolve(Args {
            root: None,
            endpoint: Some("https://s3.us-west-2.amazonaws.com/builds".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        assert_eq!(settings.root, "builds");
        assert_eq!(s3(&settings).region, "us-west-2");
    }

    #[test]
    fn test_s3_scheme_endpoint() {
        let settings = Settings::resolve(Args {
            root: None,
            endpoint: Some("s3://builds".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        assert_eq!(settings.root, "builds");
        assert!(s3(&settings).endpoint.is_none());
    }

    #[test]
    fn test_endpoint_conflicts() {
        let message = error_message(Args {
            endpoint: Some("s3://builds".to_string()),
            ..with_mode("restore")
        });
        assert!(message.contains("already specified in endpoint remove from root"));

        let message = error_message(Args {
            root: None,
            region: Some("us-east-2".to_string()),
            endpoint: Some("https://builds.s3.eu-west-1.amazonaws.com".to_string()),
            ..with_mode("restore")
        });
        assert!(message.contains("already specified in endpoint remove from config"));

        let message = error_message(Args {
            endpoint: Some("https://storage.s3.amazonaws.com.example.amazonaws.com".to_string()),
            ..with_mode("restore")
        });
        assert!(message.starts_with("unknown aws domain"));

        let message = error_message(Args {
            endpoint: Some("ftp://minio:21".to_string()),
            ..with_mode("restore")
        });
        assert!(message.starts_with("unknown scheme"));
    }

    #[test]
    fn test_custom_endpoint_keeps_url() {
        let settings = Settings::resolve(Args {
            endpoint: Some("http://minio:9000/".to_string()),
            region: Some("local".to_string()),
            access_key: Some("minio".to_string()),
            secret_key: Some("minio123".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        let options = s3(&settings);
        assert_eq!(options.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(options.path_style);
        assert_eq!(options.region, "local");
        assert_eq!(options.static_credentials(), Some(("minio", "minio123")));
    }

    #[test]
    fn test_credentials_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("credentials");

        let message = error_message(Args {
            file_credentials: Some(file.clone()),
            ..with_mode("restore")
        });
        assert!(message.contains("does not exist"));

        std::fs::write(&file, "[default]\n").unwrap();
        let message = error_message(Args {
            file_credentials: Some(file.clone()),
            access_key: Some("AKIA".to_string()),
            ..with_mode("restore")
        });
        assert!(message.starts_with("only one credentials method"));

        let settings = Settings::resolve(Args {
            file_credentials: Some(file.clone()),
            profile: Some("ci".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        assert_eq!(s3(&settings).credentials_file.as_deref(), Some(file.as_path()));
        assert_eq!(s3(&settings).profile.as_deref(), Some("ci"));
    }

    #[test]
    fn test_file_endpoint_selects_filesystem() {
        let settings = Settings::resolve(Args {
            endpoint: Some("file:///var/cache/stash".to_string()),
            ..with_mode("restore")
        })
        .unwrap();
        match settings.backend {
            Backend::Filesystem(dir) => assert_eq!(dir, PathBuf::from("/var/cache/stash")),
            other => panic!("expected filesystem backend, got {other:?}"),
        }
    }
}
