//! Crash recovery: re-register live instances from their last snapshots.

use anyhow::{Context, Result};
use respite_core::{InstanceId, SessionHost};

use crate::store::InstanceStore;

/// Load every live snapshot from `store` into `host`.
///
/// Instances that cannot be recovered (missing definitions, a user who already
/// has a live run) are logged and skipped. Returns the recovered ids.
pub async fn recover_live<S>(store: &S, host: &SessionHost) -> Result<Vec<InstanceId>>
where
    S: InstanceStore + ?Sized,
{
    let snapshots = store
        .list_live()
        .await
        .context("failed to list live instances")?;

    let mut recovered = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let id = snapshot.id;
        match host.recover(snapshot) {
            Ok(id) => recovered.push(id),
            Err(error) => {
                tracing::warn!(instance_id = %id, error = %error, "instance not recovered");
            }
        }
    }
    tracing::info!(recovered = recovered.len(), "live instances recovered");
    Ok(recovered)
}
