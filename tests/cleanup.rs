#[cfg(not(any(test, feature = "test-util")))]
compile_error!("Enable the `test-util` feature to run these tests outside `cargo test`.");

use std::time::Duration;

use tempfile::TempDir;
use tokio::fs;
use tokio::task::yield_now;
use tokio_util::sync::CancellationToken;
use upload_filestore::cleanup::{Artifacts, CleanupSupervisor};
use upload_filestore::remote::ObjectStoreClient;
use upload_filestore::test_support::StubServer;

const OBJECT_PATH: &str = "/bucket/object";

fn supervisor() -> CleanupSupervisor {
    CleanupSupervisor::new(ObjectStoreClient::default(), Duration::from_secs(5))
}

#[tokio::test]
async fn cleanup_waits_for_cancellation() {
    let temp_dir = TempDir::new().expect("temp dir");
    let server = StubServer::start().await.expect("start stub");
    let path = temp_dir.path().join("upload-kept");
    fs::write(&path, b"payload").await.expect("write file");

    let supervisor = supervisor();
    let ctx = CancellationToken::new();
    supervisor.register(
        ctx.clone(),
        Artifacts {
            local_path: Some(path.clone()),
            remote_delete_url: Some(server.url(OBJECT_PATH)),
        },
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    yield_now().await;
    assert!(fs::metadata(&path).await.is_ok(), "file kept while ctx alive");
    assert_eq!(server.deletes_count(), 0);

    ctx.cancel();
    supervisor.wait().await;

    assert!(fs::metadata(&path).await.is_err(), "file should be removed");
    assert_eq!(server.deletes_count(), 1);
}

#[tokio::test]
async fn cleanup_runs_once_per_registration() {
    let server = StubServer::start().await.expect("start stub");
    let supervisor = supervisor();
    let ctx = CancellationToken::new();
    for _ in 0..2 {
        supervisor.register(
            ctx.child_token(),
            Artifacts {
                local_path: None,
                remote_delete_url: Some(server.url(OBJECT_PATH)),
            },
        );
    }

    ctx.cancel();
    ctx.cancel();
    supervisor.wait().await;
    assert_eq!(server.deletes_count(), 2);

    ctx.cancel();
    supervisor.wait().await;
    assert_eq!(server.deletes_count(), 2);
}

#[tokio::test]
async fn cleanup_failures_are_only_logged() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("upload-unreachable");
    fs::write(&path, b"payload").await.expect("write file");

    // Nothing listens on the discard port, so the delete fails.
    let artifacts = Artifacts {
        local_path: Some(path.clone()),
        remote_delete_url: Some("http://127.0.0.1:9/bucket/object".into()),
    };
    artifacts
        .remove(&ObjectStoreClient::default(), Duration::from_secs(2))
        .await;

    assert!(
        fs::metadata(&path).await.is_err(),
        "local removal does not depend on the remote delete"
    );
}

#[tokio::test]
async fn waiting_twice_is_allowed() {
    let temp_dir = TempDir::new().expect("temp dir");
    let supervisor = supervisor();

    for name in ["first", "second"] {
        let path = temp_dir.path().join(name);
        fs::write(&path, b"payload").await.expect("write file");
        let ctx = CancellationToken::new();
        supervisor.register(
            ctx.clone(),
            Artifacts {
                local_path: Some(path.clone()),
                remote_delete_url: None,
            },
        );
        ctx.cancel();
        supervisor.wait().await;
        assert!(fs::metadata(&path).await.is_err(), "{name} should be removed");
    }
}
