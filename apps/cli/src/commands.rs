//! Command implementations.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nimbus_auth::{AuthError, CredentialStore, HttpTokenSource, RefreshGuard};
use nimbus_jobs::{JobPoller, PollError};
use nimbus_remote::HttpRemote;
use nimbus_state::{CheckpointStore, fingerprint};
use nimbus_transfer::{TransferError, UploadEngine, UploadEvent, UploadOutcome};

use crate::config::Config;
use crate::progress::{SpeedCalculator, format_bytes, format_duration};

/// Builds the authenticated remote client, refusing to proceed when no
/// credential has been provisioned yet.
fn build_remote(config: &Config) -> anyhow::Result<HttpRemote> {
    let cred_path = config.credential_path();
    let store = CredentialStore::new(&cred_path);
    let initial = match store.load() {
        Ok(cred) => cred,
        Err(AuthError::NoCredential) => {
            bail!(
                "no credential found at {}; obtain a token pair for this client and place it there",
                cred_path.display()
            );
        }
        Err(e) => return Err(e).context("failed to load credential"),
    };

    let source = Arc::new(HttpTokenSource::new(
        config.token_endpoint.clone(),
        config.client_id.clone(),
        initial,
    ));
    let guard = Arc::new(RefreshGuard::new(
        source,
        Box::new(move |cred| store.save(cred)),
    ));
    Ok(HttpRemote::new(config.base_url.clone(), guard))
}

pub async fn upload(
    config: &Config,
    cancel: CancellationToken,
    local: &Path,
    remote_path: &str,
    restart: bool,
) -> anyhow::Result<()> {
    let remote = build_remote(config)?;
    let store = CheckpointStore::new(config.state_dir())?;

    if restart {
        discard_checkpoint(&remote, &store, local, remote_path).await?;
    }

    let engine = UploadEngine::new(&remote, &store, cancel)
        .with_chunk_size(config.chunk_size)
        .context("invalid chunk_size in configuration")?;

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut speed = SpeedCalculator::new();
        while let Some(UploadEvent::Progress {
            bytes_completed,
            total_size,
        }) = rx.recv().await
        {
            speed.record(bytes_completed);
            let percent = if total_size == 0 {
                100.0
            } else {
                bytes_completed as f64 / total_size as f64 * 100.0
            };
            let mut line = format!(
                "\r{} / {} ({percent:.1}%)",
                format_bytes(bytes_completed),
                format_bytes(total_size),
            );
            let bps = speed.bytes_per_second();
            if bps > 0.0 {
                line.push_str(&format!("  {}/s", format_bytes(bps as u64)));
            }
            if let Some(eta) = speed.eta(total_size.saturating_sub(bytes_completed))
                && !eta.is_zero()
            {
                line.push_str(&format!("  ETA {}", format_duration(eta)));
            }
            print!("{line}");
            let _ = std::io::stdout().flush();
        }
        println!();
    });

    let outcome = engine.upload(local, remote_path, &tx).await;
    drop(tx);
    let _ = printer.await;

    match outcome {
        Ok(UploadOutcome::Completed(item)) => {
            match item {
                Some(item) => info!(id = %item.id, size = item.size, "upload complete"),
                None => info!("upload complete"),
            }
            println!("uploaded {} to {remote_path}", local.display());
            Ok(())
        }
        Ok(UploadOutcome::Interrupted { bytes_completed }) => {
            println!(
                "interrupted with {} completed; rerun the same command to resume",
                format_bytes(bytes_completed)
            );
            Ok(())
        }
        Err(e @ TransferError::ChunkRejected { .. }) => {
            Err(e).context("upload failed; rerun the same command to resume")
        }
        Err(e) => Err(e).context("upload failed"),
    }
}

/// Discards the pending checkpoint for the pair, cancelling its upload
/// session on the server when one is recorded.
async fn discard_checkpoint(
    remote: &HttpRemote,
    store: &CheckpointStore,
    local: &Path,
    remote_path: &str,
) -> anyhow::Result<()> {
    use nimbus_remote::RemoteService;

    let fp = fingerprint(&local.display().to_string(), remote_path);
    if let Some(cp) = store.load(&fp) {
        info!(remote_path, "discarding checkpoint at user request");
        if let Err(e) = remote.cancel_upload_session(&cp.session_url).await {
            warn!(error = %e, "failed to cancel previous upload session");
        }
        store.delete(&fp)?;
    }
    Ok(())
}

pub async fn watch(
    config: &Config,
    cancel: CancellationToken,
    job_url: &str,
) -> anyhow::Result<()> {
    let remote = build_remote(config)?;
    let poller = JobPoller::new(&remote, cancel);

    let (tx, mut rx) = mpsc::channel::<nimbus_jobs::JobProgress>(16);
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            print!(
                "\r{:?} ({:.0}%)        ",
                progress.state, progress.percentage_complete
            );
            let _ = std::io::stdout().flush();
        }
        println!();
    });

    let result = poller.await_completion(job_url, &tx).await;
    drop(tx);
    let _ = printer.await;

    match result {
        Ok(Some(resource_id)) => {
            println!("job completed: {resource_id}");
            Ok(())
        }
        Ok(None) => {
            println!("job completed");
            Ok(())
        }
        Err(PollError::Cancelled) => {
            println!("stopped watching; the job keeps running on the server");
            Ok(())
        }
        Err(e) => Err(e).context("job monitoring failed"),
    }
}

pub fn resume_info(config: &Config, local: &Path, remote_path: &str) -> anyhow::Result<()> {
    let store = CheckpointStore::new(config.state_dir())?;
    let fp = fingerprint(&local.display().to_string(), remote_path);

    let Some(cp) = store.load(&fp) else {
        println!(
            "no pending upload for {} -> {remote_path}",
            local.display()
        );
        return Ok(());
    };

    println!("pending upload: {} -> {}", cp.local_path, cp.remote_path);
    println!("  completed:      {}", format_bytes(cp.bytes_completed));
    if let Ok(meta) = std::fs::metadata(local)
        && meta.len() > 0
    {
        println!(
            "  progress:       {:.1}%",
            cp.bytes_completed as f64 / meta.len() as f64 * 100.0
        );
    }
    println!("  session expiry: {}", cp.session_expiry.to_rfc3339());
    if cp.is_expired(chrono::Utc::now()) {
        println!("  session has expired; the next upload starts fresh");
    }
    Ok(())
}
