//! `ObjectStore` backed by the AWS SDK.

use crate::config::S3Options;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use chrono::{DateTime, Utc};
use stash_core::{Error, ObjectKey, ObjectStore, Result, StoredObject};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// S3 object store. Keys are `bucket/object-key`.
pub struct S3Store {
    client: Client,
    options: S3Options,
}

impl S3Store {
    /// Build a client from `options`.
    ///
    /// Static keys take precedence over a credentials file, which takes
    /// precedence over the default provider chain (environment, profile,
    /// instance metadata).
    pub async fn connect(options: S3Options) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()));

        if let Some(endpoint) = &options.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let Some((access_key, secret_key)) = options.static_credentials() {
            debug!("Using static S3 credentials");
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                options.session_token.clone(),
                None,
                "stash",
            ));
        } else if let Some(file) = &options.credentials_file {
            debug!(file = %file.display(), profile = ?options.profile, "Using S3 credentials file");
            let files = ProfileFiles::builder()
                .with_file(ProfileFileKind::Credentials, file)
                .build();
            loader = loader.profile_files(files);
            if let Some(profile) = &options.profile {
                loader = loader.profile_name(profile);
            }
        } else if let Some(profile) = &options.profile {
            loader = loader.profile_name(profile);
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(options.path_style)
            .accelerate(options.accelerate)
            .build();

        info!(
            endpoint = options.endpoint.as_deref().unwrap_or("aws"),
            region = %options.region,
            path_style = options.path_style,
            "S3 client ready"
        );
        Self::with_client(Client::from_conf(config), options)
    }

    pub fn with_client(client: Client, options: S3Options) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &S3Options {
        &self.options
    }

    async fn put_multipart(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        first: Vec<u8>,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let raw = key.to_string();
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1;
        let mut next = Some(first);

        while let Some(buf) = next.take() {
            let len = buf.len();
            let output = self
                .client
                .upload_part()
                .bucket(key.bucket())
                .key(key.key())
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| sdk_error(&raw, e))?;

            debug!(key = %key, part_number, size = len, "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            total += len as u64;
            part_number += 1;

            if len == self.options.part_size {
                let more = read_part(source, self.options.part_size).await?;
                if !more.is_empty() {
                    next = Some(more);
                }
            }
        }

        self.client
            .complete_multipart_upload()
            .bucket(key.bucket())
            .key(key.key())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error(&raw, e))?;

        Ok(total)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;

        let output = self
            .client
            .get_object()
            .bucket(parsed.bucket())
            .key(parsed.key())
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        let mut body = output.body;
        let mut size = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| sdk_error(key, e))? {
            // Sink failures stay I/O errors so a consumer hang-up is recognizable.
            sink.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        sink.flush().await?;

        info!(key = %parsed, size, "Object downloaded");
        Ok(())
    }

    async fn put(&self, key: &str, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;

        let first = read_part(source, self.options.part_size).await?;
        if first.len() < self.options.part_size {
            let size = first.len();
            self.client
                .put_object()
                .bucket(parsed.bucket())
                .key(parsed.key())
                .body(ByteStream::from(first))
                .send()
                .await
                .map_err(|e| sdk_error(key, e))?;
            info!(key = %parsed, size, "Object uploaded");
            return Ok(());
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(parsed.bucket())
            .key(parsed.key())
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::transport(key, "no upload id in multipart response"))?
            .to_string();

        match self.put_multipart(&parsed, &upload_id, first, source).await {
            Ok(size) => {
                info!(key = %parsed, size, "Object uploaded");
                Ok(())
            }
            Err(e) => {
                let aborted = self
                    .client
                    .abort_multipart_upload()
                    .bucket(parsed.bucket())
                    .key(parsed.key())
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = aborted {
                    warn!(
                        key = %parsed,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let parsed = ObjectKey::parse(prefix)?;

        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(parsed.bucket())
                .prefix(parsed.key())
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error(prefix, e))?;

            for object in page.contents() {
                let Some(name) = object.key() else {
                    continue;
                };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                entries.push(StoredObject::new(
                    format!("{}/{}", parsed.bucket(), name),
                    object.size().unwrap_or_default().max(0) as u64,
                    last_modified,
                ));
            }

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        info!(prefix = %parsed, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;

        self.client
            .delete_object()
            .bucket(parsed.bucket())
            .key(parsed.key())
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        info!(key = %parsed, "Object deleted");
        Ok(())
    }
}

fn sdk_error<E: std::error::Error>(key: &str, err: E) -> Error {
    Error::transport(key, DisplayErrorContext(err))
}

/// Read up to `size` bytes; a short result means the stream ended.
async fn read_part(
    source: &mut (dyn AsyncRead + Send + Unpin),
    size: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size);
    (&mut *source).take(size as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}
