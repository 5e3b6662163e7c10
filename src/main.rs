use std::path::PathBuf;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;

use upload_filestore::{FileStore, config::Config, obs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing();

    let mut args = std::env::args_os().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: filestore-save <path>");
    };
    if args.next().is_some() {
        bail!("usage: filestore-save <path>");
    }

    let cfg = Config::from_env()?;
    let store = FileStore::from_config(&cfg)?;
    let ctx = CancellationToken::new();

    let handler = store
        .save_from_disk(&ctx, &path, &cfg.save_options())
        .await
        .with_context(|| format!("failed to save {}", path.display()))?;

    let fields = handler.finalize_fields("file");
    println!("{}", serde_json::to_string_pretty(&fields)?);

    tracing::info!("upload kept until interrupted");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    ctx.cancel();
    store.shutdown().await;
    Ok(())
}
