use async_trait::async_trait;

use crate::error::Result;
use crate::fanout::ChunkReceiver;

pub mod client;
pub mod multipart;
pub mod object;

pub use client::{ObjectStoreClient, etag_matches_md5, normalize_etag, scrub_url};
pub use multipart::{AbortOutcome, Multipart, MultipartState};
pub use object::SinglePut;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EtagKind {
    ContentMd5,
    Multipart,
}

#[derive(Clone, Debug)]
pub struct RemoteObject {
    pub etag: String,
    pub kind: EtagKind,
}

/// Implementations must read the subscription to its end or fail, and must
/// not leave server side state behind when they fail.
#[async_trait]
pub trait RemoteLeg: Send {
    async fn upload(&mut self, chunks: ChunkReceiver) -> Result<RemoteObject>;
}
