use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::header::{HeaderName, HeaderValue};
use tokio::time::Instant;
use url::Url;

use crate::error::{Result, SaveError};

/// Empty strings are treated like absent values so options decoded from a
/// JSON API response can be used as they are.
#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    pub local_temp_path: Option<PathBuf>,
    pub temp_file_prefix: String,
    pub remote_id: String,
    pub remote_url: String,
    pub presigned_put: Option<String>,
    pub presigned_delete: Option<String>,
    /// One URL per part; a non-empty list selects a multipart upload.
    pub presigned_parts: Vec<String>,
    pub part_size: u64,
    pub presigned_complete_multipart: Option<String>,
    pub presigned_abort_multipart: Option<String>,
    pub put_headers: BTreeMap<String, String>,
    pub maximum_size: Option<i64>,
    pub deadline: Option<Instant>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteMode<'a> {
    None,
    Single {
        url: &'a str,
    },
    Multipart {
        part_urls: &'a [String],
        part_size: u64,
        complete_url: &'a str,
        abort_url: Option<&'a str>,
    },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl SaveOptions {
    pub fn local_dir(&self) -> Option<&Path> {
        self.local_temp_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub fn is_local(&self) -> bool {
        self.local_dir().is_some()
    }

    pub fn is_multipart(&self) -> bool {
        !self.presigned_parts.is_empty()
    }

    pub fn is_remote(&self) -> bool {
        self.is_multipart() || non_empty(&self.presigned_put).is_some()
    }

    pub fn delete_url(&self) -> Option<&str> {
        non_empty(&self.presigned_delete)
    }

    pub fn validate(&self) -> Result<RemoteMode<'_>> {
        if let Some(limit) = self.maximum_size
            && limit <= 0
        {
            return Err(SaveError::Configuration(
                "maximum size must be positive".into(),
            ));
        }
        for (name, value) in &self.put_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SaveError::Configuration(format!("invalid header name {name:?}")))?;
            HeaderValue::from_str(value).map_err(|_| {
                SaveError::Configuration(format!("invalid value for header {name:?}"))
            })?;
        }
        if let Some(url) = self.delete_url() {
            check_url("delete", url)?;
        }

        if self.is_multipart() {
            if self.part_size == 0 {
                return Err(SaveError::Configuration(
                    "part size is required for multipart uploads".into(),
                ));
            }
            let complete_url = non_empty(&self.presigned_complete_multipart).ok_or_else(|| {
                SaveError::Configuration(
                    "complete URL is required for multipart uploads".into(),
                )
            })?;
            for url in &self.presigned_parts {
                check_url("part", url)?;
            }
            check_url("complete", complete_url)?;
            let abort_url = non_empty(&self.presigned_abort_multipart);
            if let Some(url) = abort_url {
                check_url("abort", url)?;
            }
            return Ok(RemoteMode::Multipart {
                part_urls: &self.presigned_parts,
                part_size: self.part_size,
                complete_url,
                abort_url,
            });
        }

        if let Some(url) = non_empty(&self.presigned_put) {
            check_url("PUT", url)?;
            return Ok(RemoteMode::Single { url });
        }

        Ok(RemoteMode::None)
    }
}

fn check_url(kind: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|err| SaveError::Configuration(format!("invalid {kind} URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SaveError::Configuration(format!(
            "unsupported scheme {other:?} in {kind} URL"
        ))),
    }
}
