use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, SaveError};
use crate::fanout::ChunkReceiver;
use crate::remote::{
    EtagKind, ObjectStoreClient, RemoteLeg, RemoteObject, etag_matches_md5, normalize_etag,
    scrub_url,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MultipartState {
    Initiated,
    Uploading(usize),
    Committing,
    Committed,
    Aborting,
    Aborted,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortOutcome {
    Aborted,
    NotConfigured,
    Failed(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: usize,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload<'a> {
    #[serde(rename = "Part")]
    parts: &'a [CompletedPart],
}

/// Either a `CompleteMultipartUploadResult` or an `Error` document; the
/// store may send the latter with a 200 status.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompleteMultipartUploadResponse {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "ETag")]
    etag: Option<String>,
}

pub struct Multipart {
    client: ObjectStoreClient,
    part_urls: Vec<String>,
    part_size: u64,
    complete_url: String,
    abort_url: Option<String>,
    headers: BTreeMap<String, String>,
    deadline: Instant,
    abort_timeout: Duration,
    state: MultipartState,
    parts: Vec<CompletedPart>,
}

impl Multipart {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: ObjectStoreClient,
        part_urls: Vec<String>,
        part_size: u64,
        complete_url: String,
        abort_url: Option<String>,
        headers: BTreeMap<String, String>,
        deadline: Instant,
        abort_timeout: Duration,
    ) -> Self {
        Self {
            client,
            part_urls,
            part_size,
            complete_url,
            abort_url,
            headers,
            deadline,
            abort_timeout,
            state: MultipartState::Initiated,
            parts: Vec::new(),
        }
    }

    pub fn state(&self) -> MultipartState {
        self.state
    }

    fn transition(&mut self, next: MultipartState) {
        debug!(from = ?self.state, to = ?next, "multipart state change");
        self.state = next;
    }

    async fn upload_and_commit(&mut self, chunks: &mut ChunkReceiver) -> Result<String> {
        let abort = chunks.abort_token().clone();
        self.upload_parts(chunks, &abort).await?;

        self.transition(MultipartState::Committing);
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(SaveError::Interrupted),
            etag = self.complete() => etag,
        }
    }

    async fn upload_parts(
        &mut self,
        chunks: &mut ChunkReceiver,
        abort: &CancellationToken,
    ) -> Result<()> {
        let mut pending: Option<Bytes> = None;
        loop {
            let mut part = PartBuffer::new().await?;
            let mut end_of_stream = false;

            while part.len < self.part_size {
                let chunk = match pending.take() {
                    Some(chunk) => chunk,
                    None => match chunks.next().await? {
                        Some(chunk) => chunk,
                        None => {
                            end_of_stream = true;
                            break;
                        }
                    },
                };
                let room = usize::try_from(self.part_size - part.len).unwrap_or(usize::MAX);
                let mut chunk = chunk;
                if chunk.len() > room {
                    pending = Some(chunk.split_off(room));
                }
                part.write(&chunk).await?;
            }

            // The stream ended exactly on a part boundary.
            if part.len == 0 && !self.parts.is_empty() {
                return Ok(());
            }

            let part_number = self.parts.len() + 1;
            if part_number > self.part_urls.len() {
                return Err(SaveError::NotEnoughParts {
                    available: self.part_urls.len(),
                });
            }
            self.transition(MultipartState::Uploading(part_number));
            let etag = self.upload_part(part_number, part, abort).await?;
            self.parts.push(CompletedPart { part_number, etag });

            if end_of_stream {
                return Ok(());
            }
        }
    }

    async fn upload_part(
        &self,
        part_number: usize,
        part: PartBuffer,
        abort: &CancellationToken,
    ) -> Result<String> {
        let url = &self.part_urls[part_number - 1];
        let (body, length, md5) = part.into_body().await?;
        let put = self
            .client
            .put(url, &self.headers, body, Some(length), self.deadline);
        let etag = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(SaveError::Interrupted),
            etag = put => etag?,
        };

        if !etag_matches_md5(&etag, &md5) {
            return Err(SaveError::RemoteIntegrity(format!(
                "ETag mismatch on part {part_number}: expected {md5:?}, got {etag:?}"
            )));
        }
        debug!(part_number, length, url = %scrub_url(url), "uploaded part");
        Ok(etag)
    }

    async fn complete(&mut self) -> Result<String> {
        self.parts.sort_by_key(|part| part.part_number);
        let body = complete_request_body(&self.parts)?;
        let response = self
            .client
            .post_xml(
                "CompleteMultipartUpload",
                &self.complete_url,
                body,
                self.deadline,
            )
            .await?;
        let etag = parse_complete_response(&response)?;
        self.transition(MultipartState::Committed);
        Ok(etag)
    }

    /// Releases the server side session. Never fails: the outcome is
    /// reported and logged so a leaked session can be told apart.
    pub async fn abort(&mut self) -> AbortOutcome {
        self.transition(MultipartState::Aborting);
        let outcome = match &self.abort_url {
            None => AbortOutcome::NotConfigured,
            Some(url) => {
                let deadline = Instant::now() + self.abort_timeout;
                match self
                    .client
                    .delete("AbortMultipartUpload", url, deadline)
                    .await
                {
                    Ok(()) => AbortOutcome::Aborted,
                    Err(err) => AbortOutcome::Failed(err.to_string()),
                }
            }
        };

        match &outcome {
            AbortOutcome::Aborted => debug!(abort_outcome = "aborted", "multipart upload aborted"),
            AbortOutcome::NotConfigured => warn!(
                abort_outcome = "not_configured",
                "no abort URL, multipart upload left to expire"
            ),
            AbortOutcome::Failed(reason) => error!(
                abort_outcome = "failed",
                %reason,
                "failed to abort multipart upload"
            ),
        }
        self.transition(MultipartState::Aborted);
        outcome
    }
}

#[async_trait]
impl RemoteLeg for Multipart {
    async fn upload(&mut self, mut chunks: ChunkReceiver) -> Result<RemoteObject> {
        match self.upload_and_commit(&mut chunks).await {
            Ok(etag) => Ok(RemoteObject {
                etag,
                kind: EtagKind::Multipart,
            }),
            Err(err) => {
                drop(chunks);
                warn!(?err, state = ?self.state, "multipart upload failed");
                self.abort().await;
                Err(err)
            }
        }
    }
}

struct PartBuffer {
    file: File,
    len: u64,
    md5: Md5,
}

impl PartBuffer {
    async fn new() -> Result<Self> {
        let file = task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(|err| part_buffer_error(std::io::Error::other(err)))?
            .map_err(part_buffer_error)?;
        Ok(Self {
            file: File::from_std(file),
            len: 0,
            md5: Md5::new(),
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await.map_err(part_buffer_error)?;
        self.md5.update(data);
        self.len += data.len() as u64;
        Ok(())
    }

    async fn into_body(mut self) -> Result<(Body, u64, String)> {
        self.file.flush().await.map_err(part_buffer_error)?;
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(part_buffer_error)?;
        let md5 = hex::encode(self.md5.finalize());
        Ok((
            Body::wrap_stream(ReaderStream::new(self.file)),
            self.len,
            md5,
        ))
    }
}

fn part_buffer_error(source: std::io::Error) -> SaveError {
    SaveError::LocalWrite {
        path: std::env::temp_dir(),
        source,
    }
}

fn complete_request_body(parts: &[CompletedPart]) -> Result<String> {
    quick_xml::se::to_string(&CompleteMultipartUpload { parts }).map_err(|err| {
        SaveError::Configuration(format!("failed to encode CompleteMultipartUpload: {err}"))
    })
}

fn parse_complete_response(body: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(body).map_err(|_| {
        SaveError::RemoteIntegrity("CompleteMultipartUpload response is not UTF-8".into())
    })?;
    let response: CompleteMultipartUploadResponse = quick_xml::de::from_str(text)
        .map_err(|err| {
            SaveError::RemoteIntegrity(format!("invalid CompleteMultipartUpload response: {err}"))
        })?;

    if let Some(code) = response.code {
        return Err(SaveError::RemoteIntegrity(format!(
            "CompleteMultipartUpload failed: {code}: {}",
            response.message.unwrap_or_default()
        )));
    }

    response
        .etag
        .map(|etag| normalize_etag(&etag))
        .filter(|etag| !etag.is_empty())
        .ok_or_else(|| SaveError::RemoteIntegrity("empty CompleteMultipartUploadResult".into()))
}
