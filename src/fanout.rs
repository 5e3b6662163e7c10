use std::io;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::digest::{HashingReader, into_save_error};
use crate::error::{Result, SaveError};

pub const CHUNK_SIZE: usize = 32 * 1024;
const CHANNEL_CAPACITY: usize = 4;

/// Single reader that copies every chunk of the source to each subscriber.
///
/// Subscribers see end-of-stream only when the source was read to the end
/// and passed its size checks. On any failure the shared abort token is
/// cancelled before the senders are dropped, so a closed channel is never
/// mistaken for a complete stream.
pub struct FanOut {
    senders: Vec<mpsc::Sender<Bytes>>,
    abort: CancellationToken,
}

impl FanOut {
    pub fn new(abort: CancellationToken) -> Self {
        Self {
            senders: Vec::new(),
            abort,
        }
    }

    pub fn subscribe(&mut self) -> ChunkReceiver {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.senders.push(tx);
        ChunkReceiver {
            rx,
            abort: self.abort.clone(),
        }
    }

    pub async fn pump<R>(self, reader: &mut HashingReader<R>, ctx: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let result = self.copy(reader, ctx).await;
        if result.is_err() {
            self.abort.cancel();
        }
        drop(self.senders);
        result
    }

    async fn copy<R>(&self, reader: &mut HashingReader<R>, ctx: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            let read = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(SaveError::Cancelled),
                _ = self.abort.cancelled() => return Err(SaveError::Interrupted),
                read = reader.read_buf(&mut buf) => read.map_err(into_save_error)?,
            };
            if read == 0 {
                return Ok(());
            }

            let chunk = buf.split().freeze();
            for sender in &self.senders {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(SaveError::Cancelled),
                    _ = self.abort.cancelled() => return Err(SaveError::Interrupted),
                    sent = sender.send(chunk.clone()) => {
                        if sent.is_err() {
                            return Err(SaveError::Interrupted);
                        }
                    }
                }
            }
        }
    }
}

pub struct ChunkReceiver {
    rx: mpsc::Receiver<Bytes>,
    abort: CancellationToken,
}

impl ChunkReceiver {
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(SaveError::Interrupted),
            chunk = self.rx.recv() => match chunk {
                Some(chunk) => Ok(Some(chunk)),
                None if self.abort.is_cancelled() => Err(SaveError::Interrupted),
                None => Ok(None),
            },
        }
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn into_body_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::unfold(Some(self), |state| async move {
            let mut receiver = state?;
            match receiver.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(receiver))),
                Ok(None) => None,
                Err(err) => Some((Err(io::Error::other(err)), None)),
            }
        })
    }
}
