//! Idempotent create-or-update
//!
//! Creation is attempted first. A conflict means the object already
//! exists; depending on the [`OnConflict`] policy the live object is either
//! accepted as-is or compared against the desired one and replaced when
//! metadata or spec differ.

use tracing::{info, instrument, warn};

use crate::controller::platform::{ManagedObject, Platform};
use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
use crate::controller::metrics;

/// What to do when the object already exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnConflict {
    /// Diff metadata and spec, replace on any difference
    Replace,
    /// Accept the existing object
    Keep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
    Unchanged,
    Kept,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Replaced => "replaced",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::Kept => "kept",
        }
    }
}

/// Ensure `desired` exists in `namespace`
#[instrument(skip(platform, desired), fields(kind = %desired.kind(), name = %desired.name()))]
pub async fn upsert(
    platform: &dyn Platform,
    namespace: &str,
    desired: &ManagedObject,
    policy: OnConflict,
) -> Result<UpsertOutcome> {
    let kind = desired.kind();
    let name = desired.name();

    let outcome = match platform.create(namespace, desired).await {
        Ok(_) => {
            info!("Created {} {}", kind, name);
            UpsertOutcome::Created
        }
        Err(Error::Conflict { .. }) => match policy {
            OnConflict::Keep => {
                warn!("{} {} already exists, proceeding", kind, name);
                UpsertOutcome::Kept
            }
            OnConflict::Replace => {
                let live = platform.get(namespace, kind, name).await?;
                if differs(&live, desired)? {
                    warn!("{} {} already exists and differs, replacing", kind, name);
                    let mut replacement = desired.clone();
                    replacement.metadata_mut().resource_version =
                        live.metadata().resource_version.clone();
                    platform.replace(namespace, &replacement).await?;
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        },
        Err(e) => return Err(e),
    };

    #[cfg(feature = "metrics")]
    metrics::inc_upsert(kind.as_str(), outcome.as_str());

    Ok(outcome)
}

/// Compare metadata and spec by JSON value
///
/// Every field counts, including server-populated ones and regenerated
/// credentials, so an object read back from a live cluster rarely compares
/// equal to a freshly built one.
pub fn differs(live: &ManagedObject, desired: &ManagedObject) -> Result<bool> {
    let live_meta = serde_json::to_value(live.metadata())?;
    let desired_meta = serde_json::to_value(desired.metadata())?;
    Ok(live_meta != desired_meta || live.spec_value()? != desired.spec_value()?)
}
