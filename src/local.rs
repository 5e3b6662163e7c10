use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SaveError};
use crate::fanout::ChunkReceiver;

pub struct LocalFile {
    path: PathBuf,
    file: File,
}

impl LocalFile {
    pub async fn create(dir: &Path, prefix: &str) -> Result<Self> {
        let path = dir.join(format!("{prefix}{}", Uuid::new_v4().simple()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| SaveError::LocalWrite {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "created local temp file");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn persist(self, mut chunks: ChunkReceiver) -> Result<PathBuf> {
        let Self { path, mut file } = self;
        let write_err = |source| SaveError::LocalWrite {
            path: path.clone(),
            source,
        };

        while let Some(chunk) = chunks.next().await? {
            file.write_all(&chunk).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        Ok(path)
    }
}

pub async fn remove_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
