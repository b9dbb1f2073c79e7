//! Storage health check
//!
//! Listing alone passes on read-only credentials, so the check also writes,
//! reads back and deletes a small marker object.

use anyhow::{Context, Result};
use opendal::Operator;
use uuid::Uuid;

const CHECK_PREFIX: &str = "health/";

/// Verify the backend is reachable and writable.
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/").await.context("storage health check: listing root")?;

    let marker = format!("{CHECK_PREFIX}{}", Uuid::new_v4());
    let payload = marker.clone().into_bytes();
    op.write(&marker, payload.clone())
        .await
        .with_context(|| format!("storage health check: writing {marker}"))?;

    let read = op
        .read(&marker)
        .await
        .with_context(|| format!("storage health check: reading {marker}"));
    // always try to clean up, even when the read failed
    let removed = op.delete(&marker).await;

    if read?.to_vec() != payload {
        anyhow::bail!("storage health check: {marker} came back altered");
    }
    removed.with_context(|| format!("storage health check: deleting {marker}"))?;
    tracing::debug!(%marker, "storage health check ok");
    Ok(())
}

/// Returns true if storage is reachable and writable (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
