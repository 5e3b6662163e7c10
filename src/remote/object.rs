use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Body;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, SaveError};
use crate::fanout::ChunkReceiver;
use crate::remote::{EtagKind, ObjectStoreClient, RemoteLeg, RemoteObject, scrub_url};

pub struct SinglePut {
    client: ObjectStoreClient,
    url: String,
    headers: BTreeMap<String, String>,
    content_length: Option<u64>,
    deadline: Instant,
}

impl SinglePut {
    pub fn new(
        client: ObjectStoreClient,
        url: String,
        headers: BTreeMap<String, String>,
        content_length: Option<u64>,
        deadline: Instant,
    ) -> Self {
        Self {
            client,
            url,
            headers,
            content_length,
            deadline,
        }
    }
}

#[async_trait]
impl RemoteLeg for SinglePut {
    async fn upload(&mut self, chunks: ChunkReceiver) -> Result<RemoteObject> {
        let abort = chunks.abort_token().clone();
        let body = Body::wrap_stream(chunks.into_body_stream());
        let put = self.client.put(
            &self.url,
            &self.headers,
            body,
            self.content_length,
            self.deadline,
        );

        let etag = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(SaveError::Interrupted),
            etag = put => etag?,
        };
        debug!(url = %scrub_url(&self.url), %etag, "single PUT uploaded");

        Ok(RemoteObject {
            etag,
            kind: EtagKind::ContentMd5,
        })
    }
}
