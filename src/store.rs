use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::{Artifacts, CleanupSupervisor};
use crate::config::Config;
use crate::digest::HashingReader;
use crate::error::{Result, SaveError};
use crate::fanout::FanOut;
use crate::handler::FileHandler;
use crate::local::LocalFile;
use crate::options::{RemoteMode, SaveOptions};
use crate::remote::{
    EtagKind, Multipart, ObjectStoreClient, RemoteLeg, RemoteObject, SinglePut, etag_matches_md5,
};

pub const DEFAULT_OBJECT_STORE_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

static DEFAULT_STORE: Lazy<FileStore> = Lazy::new(FileStore::default);

/// Cheap to clone; clones share the HTTP client and the cleanup tasks.
#[derive(Clone, Debug)]
pub struct FileStore {
    client: ObjectStoreClient,
    supervisor: CleanupSupervisor,
    object_store_timeout: Duration,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(
            ObjectStoreClient::default(),
            DEFAULT_OBJECT_STORE_TIMEOUT,
            DEFAULT_CLEANUP_TIMEOUT,
        )
    }
}

impl FileStore {
    pub fn new(
        client: ObjectStoreClient,
        object_store_timeout: Duration,
        cleanup_timeout: Duration,
    ) -> Self {
        Self {
            supervisor: CleanupSupervisor::new(client.clone(), cleanup_timeout),
            client,
            object_store_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build object store HTTP client")?;
        Ok(Self::new(
            ObjectStoreClient::new(http),
            cfg.object_store_timeout,
            cfg.cleanup_timeout,
        ))
    }

    pub fn supervisor(&self) -> &CleanupSupervisor {
        &self.supervisor
    }

    /// Waits until every registered cleanup has run. Contexts that are never
    /// cancelled keep this pending.
    pub async fn shutdown(&self) {
        self.supervisor.wait().await;
    }

    /// `expected_size <= 0` means the length is unknown. On success the
    /// artifacts stay in place until `ctx` is cancelled; on failure they are
    /// removed before this returns.
    pub async fn save_from_reader<R>(
        &self,
        ctx: &CancellationToken,
        reader: R,
        expected_size: i64,
        opts: &SaveOptions,
    ) -> Result<FileHandler>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mode = opts.validate()?;
        if let Some(limit) = opts.maximum_size
            && expected_size > limit
        {
            return Err(SaveError::EntityTooLarge { limit });
        }
        if ctx.is_cancelled() {
            return Err(SaveError::Cancelled);
        }

        let deadline = opts
            .deadline
            .unwrap_or_else(|| Instant::now() + self.object_store_timeout);
        debug!(
            local = opts.is_local(),
            remote = opts.is_remote(),
            multipart = opts.is_multipart(),
            expected_size,
            "starting save"
        );

        let local = match opts.local_dir() {
            Some(dir) => Some(LocalFile::create(dir, &opts.temp_file_prefix).await?),
            None => None,
        };
        let local_path = local.as_ref().map(|file| file.path().to_path_buf());
        let remote = self.remote_leg(mode, expected_size, opts, deadline);
        let has_remote = remote.is_some();

        let result = self
            .transfer(ctx, reader, expected_size, opts, local, remote)
            .await
            .and_then(|(reader, remote)| {
                let (digests, size) = reader.finish()?;
                if let Some(remote) = &remote {
                    verify_etag(remote, &digests.md5)?;
                }
                Ok(FileHandler::new(
                    opts.temp_file_prefix.clone(),
                    local_path.clone(),
                    opts.remote_id.clone(),
                    opts.remote_url.clone(),
                    size,
                    digests,
                    remote.map(|remote| remote.etag),
                ))
            });

        let artifacts = Artifacts {
            local_path,
            remote_delete_url: opts
                .delete_url()
                .filter(|_| has_remote)
                .map(str::to_string),
        };
        match result {
            Ok(handler) => {
                info!(
                    size = handler.size(),
                    md5 = %handler.md5(),
                    local = ?handler.local_path(),
                    remote_id = %handler.remote_id(),
                    "upload saved"
                );
                self.supervisor.register(ctx.clone(), artifacts);
                Ok(handler)
            }
            Err(err) => {
                warn!(?err, "save failed, removing artifacts");
                artifacts
                    .remove(&self.client, self.supervisor.timeout())
                    .await;
                Err(err)
            }
        }
    }

    pub async fn save_from_disk(
        &self,
        ctx: &CancellationToken,
        path: impl AsRef<Path>,
        opts: &SaveOptions,
    ) -> Result<FileHandler> {
        let path = path.as_ref();
        let open_error = |source| SaveError::Open {
            path: PathBuf::from(path),
            source,
        };
        let file = File::open(path).await.map_err(open_error)?;
        let len = file.metadata().await.map_err(open_error)?.len();
        let expected_size = i64::try_from(len).unwrap_or(i64::MAX);
        self.save_from_reader(ctx, file, expected_size, opts).await
    }

    fn remote_leg(
        &self,
        mode: RemoteMode<'_>,
        expected_size: i64,
        opts: &SaveOptions,
        deadline: Instant,
    ) -> Option<Box<dyn RemoteLeg>> {
        match mode {
            RemoteMode::None => None,
            RemoteMode::Single { url } => Some(Box::new(SinglePut::new(
                self.client.clone(),
                url.to_string(),
                opts.put_headers.clone(),
                u64::try_from(expected_size).ok().filter(|len| *len > 0),
                deadline,
            ))),
            RemoteMode::Multipart {
                part_urls,
                part_size,
                complete_url,
                abort_url,
            } => Some(Box::new(Multipart::new(
                self.client.clone(),
                part_urls.to_vec(),
                part_size,
                complete_url.to_string(),
                abort_url.map(str::to_string),
                opts.put_headers.clone(),
                deadline,
                self.supervisor.timeout(),
            ))),
        }
    }

    async fn transfer<R>(
        &self,
        ctx: &CancellationToken,
        reader: R,
        expected_size: i64,
        opts: &SaveOptions,
        local: Option<LocalFile>,
        remote: Option<Box<dyn RemoteLeg>>,
    ) -> Result<(HashingReader<R>, Option<RemoteObject>)>
    where
        R: AsyncRead + Send + Unpin,
    {
        let abort = ctx.child_token();
        let mut fanout = FanOut::new(abort.clone());
        let local = local.map(|file| (file, fanout.subscribe()));
        let remote = remote.map(|leg| (leg, fanout.subscribe()));
        let mut reader = HashingReader::new(reader, expected_size, opts.maximum_size);
        let interrupt = &abort;

        let (pumped, persisted, uploaded) = tokio::join!(
            fanout.pump(&mut reader, ctx),
            async move {
                match local {
                    Some((file, chunks)) => interrupt_on_error(interrupt, file.persist(chunks).await),
                    None => Ok(PathBuf::new()),
                }
            },
            async move {
                match remote {
                    Some((mut leg, chunks)) => {
                        interrupt_on_error(interrupt, leg.upload(chunks).await).map(Some)
                    }
                    None => Ok(None),
                }
            },
        );

        match (pumped, persisted, uploaded) {
            (Ok(()), Ok(_), Ok(remote)) => Ok((reader, remote)),
            (pumped, persisted, uploaded) => Err(root_cause(
                [pumped.err(), persisted.err(), uploaded.err()],
                ctx,
            )),
        }
    }
}

fn interrupt_on_error<T>(abort: &CancellationToken, result: Result<T>) -> Result<T> {
    if result.is_err() {
        abort.cancel();
    }
    result
}

/// The first error that is not a knock-on interruption, in pump, local,
/// remote order.
fn root_cause(
    errors: impl IntoIterator<Item = Option<SaveError>>,
    ctx: &CancellationToken,
) -> SaveError {
    let mut errors: Vec<SaveError> = errors.into_iter().flatten().collect();
    if let Some(index) = errors.iter().position(|err| !err.is_interruption()) {
        return errors.swap_remove(index);
    }
    if ctx.is_cancelled() {
        SaveError::Cancelled
    } else {
        SaveError::Interrupted
    }
}

fn verify_etag(remote: &RemoteObject, md5: &str) -> Result<()> {
    if remote.kind == EtagKind::ContentMd5 && !etag_matches_md5(&remote.etag, md5) {
        return Err(SaveError::RemoteIntegrity(format!(
            "ETag mismatch: expected {md5}, got {:?}",
            remote.etag
        )));
    }
    Ok(())
}

/// [`FileStore::save_from_reader`] on a process-wide store.
///
/// Its HTTP connection pool is bound to the runtime that first used it, and
/// `shutdown` cannot be awaited on it. Applications running several runtimes,
/// and tests, should own a [`FileStore`] instead.
pub async fn save_from_reader<R>(
    ctx: &CancellationToken,
    reader: R,
    expected_size: i64,
    opts: &SaveOptions,
) -> Result<FileHandler>
where
    R: AsyncRead + Send + Unpin,
{
    DEFAULT_STORE
        .save_from_reader(ctx, reader, expected_size, opts)
        .await
}

/// [`FileStore::save_from_disk`] on the process-wide store; see [`save_from_reader`].
pub async fn save_from_disk(
    ctx: &CancellationToken,
    path: impl AsRef<Path>,
    opts: &SaveOptions,
) -> Result<FileHandler> {
    DEFAULT_STORE.save_from_disk(ctx, path, opts).await
}
