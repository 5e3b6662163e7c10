use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use md5::Md5;
use pin_project_lite::pin_project;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Result, SaveError};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Digests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl Digests {
    pub fn of(data: &[u8]) -> Self {
        let mut hash = MultiHash::default();
        hash.update(data);
        hash.finish()
    }

    pub(crate) fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("md5", self.md5.as_str()),
            ("sha1", self.sha1.as_str()),
            ("sha256", self.sha256.as_str()),
            ("sha512", self.sha512.as_str()),
        ]
    }
}

#[derive(Clone, Default)]
pub struct MultiHash {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
}

impl MultiHash {
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    pub fn finish(self) -> Digests {
        Digests {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

pin_project! {
    /// A non-positive `expected` size means the length is unknown. Size
    /// violations surface as read errors carrying a [`SaveError`]; use
    /// [`into_save_error`] to recover it.
    pub struct HashingReader<R> {
        #[pin]
        inner: R,
        hash: MultiHash,
        count: i64,
        expected: i64,
        limit: Option<i64>,
        finished: bool,
    }
}

impl<R> HashingReader<R> {
    pub fn new(inner: R, expected: i64, limit: Option<i64>) -> Self {
        Self {
            inner,
            hash: MultiHash::default(),
            count: 0,
            expected,
            limit,
            finished: false,
        }
    }

    pub fn finish(self) -> Result<(Digests, i64)> {
        if !self.finished {
            return Err(SaveError::Interrupted);
        }
        Ok((self.hash.finish(), self.count))
    }
}

impl<R: AsyncRead> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let filled = &buf.filled()[before..];

        if filled.is_empty() {
            if *this.expected > 0 && *this.count != *this.expected {
                return Poll::Ready(Err(io::Error::other(SaveError::Size {
                    expected: *this.expected,
                    actual: *this.count,
                })));
            }
            *this.finished = true;
            return Poll::Ready(Ok(()));
        }

        this.hash.update(filled);
        *this.count += filled.len() as i64;

        if let Some(limit) = *this.limit
            && *this.count > limit
        {
            return Poll::Ready(Err(io::Error::other(SaveError::EntityTooLarge { limit })));
        }
        if *this.expected > 0 && *this.count > *this.expected {
            return Poll::Ready(Err(io::Error::other(SaveError::Size {
                expected: *this.expected,
                actual: *this.count,
            })));
        }

        Poll::Ready(Ok(()))
    }
}

pub fn into_save_error(err: io::Error) -> SaveError {
    if err.get_ref().is_some_and(|inner| inner.is::<SaveError>()) {
        if let Some(inner) = err.into_inner()
            && let Ok(save) = inner.downcast::<SaveError>()
        {
            return *save;
        }
        return SaveError::Interrupted;
    }
    SaveError::SourceRead(err)
}
