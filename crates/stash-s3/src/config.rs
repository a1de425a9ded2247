//! Connection options for the S3 store.

use std::path::PathBuf;

/// Region used when neither the endpoint nor the caller names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Size of each multipart upload part. S3 requires at least 5 MiB.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Options for connecting to S3 or an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Custom endpoint URL. `None` talks to AWS.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials, used when both keys are set.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    /// Shared credentials file, read with `profile`.
    pub credentials_file: Option<PathBuf>,
    pub profile: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub path_style: bool,
    /// Route transfers through S3 Transfer Acceleration.
    pub accelerate: bool,
    pub part_size: usize,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            session_token: None,
            credentials_file: None,
            profile: None,
            path_style: false,
            accelerate: false,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl S3Options {
    /// Options for a custom endpoint; path-style addressing is enabled.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            path_style: true,
            ..Default::default()
        }
    }

    /// Set the region. An empty region keeps the default.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        let region = region.into();
        if !region.is_empty() {
            self.region = region;
        }
        self
    }

    /// Use static credentials.
    pub fn with_static_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self.session_token = session_token.filter(|t| !t.is_empty());
        self
    }

    /// Read credentials from a shared credentials file.
    pub fn with_credentials_file(
        mut self,
        path: impl Into<PathBuf>,
        profile: Option<String>,
    ) -> Self {
        self.credentials_file = Some(path.into());
        self.profile = profile.filter(|p| !p.is_empty());
        self
    }

    pub fn with_path_style(mut self, enable: bool) -> Self {
        self.path_style = enable;
        self
    }

    pub fn with_accelerate(mut self, enable: bool) -> Self {
        self.accelerate = enable;
        self
    }

    /// Set the multipart part size, raised to the S3 minimum if needed.
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    /// Static keys, when both halves are present.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Some((access, secret))
            }
            _ => None,
        }
    }
}
