use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::local;
use crate::remote::{ObjectStoreClient, scrub_url};

#[derive(Clone, Debug, Default)]
pub struct Artifacts {
    pub local_path: Option<PathBuf>,
    pub remote_delete_url: Option<String>,
}

impl Artifacts {
    pub fn is_empty(&self) -> bool {
        self.local_path.is_none() && self.remote_delete_url.is_none()
    }

    pub async fn remove(self, client: &ObjectStoreClient, timeout: Duration) {
        if let Some(path) = self.local_path {
            match local::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed local temp file"),
                Err(err) => error!(
                    path = %path.display(),
                    ?err,
                    "failed to remove local temp file"
                ),
            }
        }

        if let Some(url) = self.remote_delete_url {
            let deadline = Instant::now() + timeout;
            match client.delete("DeleteObject", &url, deadline).await {
                Ok(()) => debug!(url = %scrub_url(&url), "deleted remote object"),
                Err(err) => error!(
                    url = %scrub_url(&url),
                    ?err,
                    "failed to delete remote object"
                ),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CleanupSupervisor {
    client: ObjectStoreClient,
    timeout: Duration,
    tracker: TaskTracker,
}

impl CleanupSupervisor {
    pub fn new(client: ObjectStoreClient, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            tracker: TaskTracker::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn register(&self, ctx: CancellationToken, artifacts: Artifacts) {
        if artifacts.is_empty() {
            return;
        }
        let client = self.client.clone();
        let timeout = self.timeout;
        self.tracker.spawn(async move {
            ctx.cancelled().await;
            debug!("context done, removing upload artifacts");
            artifacts.remove(&client, timeout).await;
        });
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for every registered cleanup to finish. Only returns once all
    /// their contexts have been cancelled.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
