//! Acquisition and caching of paywall artifacts.
use std::{collections::HashMap, future::Future, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{presentation::SubscriptionStatus, Error, Result};

/// A fully acquired paywall, ready to be handed to the presentation surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaywallArtifact {
    #[allow(missing_docs)]
    pub identifier: String,
    /// Opaque presentation payload. The core never inspects it; the host's surface renders it.
    pub contents: serde_json::Value,
}

/// Source of paywall artifacts. The host implements this over its own asset pipeline (network
/// fetch, embedded webview warm-up, bundled assets).
pub trait PaywallAcquisition: Send + Sync + 'static {
    /// Acquire the artifact for `identifier`. Called at most once per in-flight identifier; the
    /// manager deduplicates concurrent requests.
    fn acquire_paywall(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<PaywallArtifact>> + Send;
}

/// Number of acquisition retries used while the user is not known to be subscribed. A presentation
/// is likely imminent, so the manager works hard to produce an artifact.
pub const RETRY_COUNT_INACTIVE: u32 = 6;

/// Retries when a paywall is unlikely to be shown (e.g. the user is already subscribed).
const RETRY_COUNT_ACTIVE: u32 = 0;

/// Acquisition effort appropriate for `status`.
pub fn retry_count_for(status: &SubscriptionStatus) -> u32 {
    match status {
        SubscriptionStatus::Active => RETRY_COUNT_ACTIVE,
        SubscriptionStatus::Inactive | SubscriptionStatus::Unknown => RETRY_COUNT_INACTIVE,
    }
}

/// Caches acquired paywall artifacts and collapses concurrent acquisitions of the same identifier
/// into a single underlying call.
///
/// Successful acquisitions stay cached until [`PaywallManager::remove_paywall`]. Failed
/// acquisitions deliver the same error to every request sharing the flight, then leave the cache so
/// a later request starts fresh.
pub struct PaywallManager<A> {
    pub(crate) acquisition: A,
    cache: std::sync::Mutex<HashMap<String, Arc<OnceCell<Result<PaywallArtifact>>>>>,
}

impl<A: PaywallAcquisition> PaywallManager<A> {
    pub fn new(acquisition: A) -> PaywallManager<A> {
        PaywallManager {
            acquisition,
            cache: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Return the artifact for `identifier`, acquiring it if it is not cached.
    ///
    /// `retry_count` only applies if this call starts the acquisition; requests joining an
    /// in-flight acquisition share its outcome.
    pub async fn get_paywall(&self, identifier: &str, retry_count: u32) -> Result<PaywallArtifact> {
        let cell = {
            let mut cache = self
                .cache
                .lock()
                .expect("thread holding paywall cache lock should not panic");
            Arc::clone(cache.entry(identifier.to_owned()).or_default())
        };

        let result = cell
            .get_or_init(|| self.acquire_with_retries(identifier, retry_count))
            .await
            .clone();

        if result.is_err() {
            let mut cache = self
                .cache
                .lock()
                .expect("thread holding paywall cache lock should not panic");
            // Only evict the flight we participated in. A concurrent request may have already
            // replaced the slot with a fresh cell.
            if cache
                .get(identifier)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                cache.remove(identifier);
            }
        }

        result
    }

    /// Drop the cached artifact for `identifier`, forcing the next request to re-acquire it.
    pub fn remove_paywall(&self, identifier: &str) {
        let mut cache = self
            .cache
            .lock()
            .expect("thread holding paywall cache lock should not panic");
        cache.remove(identifier);
    }

    async fn acquire_with_retries(
        &self,
        identifier: &str,
        retry_count: u32,
    ) -> Result<PaywallArtifact> {
        let mut attempts_left = retry_count;
        loop {
            match self.acquisition.acquire_paywall(identifier).await {
                Ok(artifact) => return Ok(artifact),
                Err(err) if attempts_left == 0 => {
                    log::warn!(target: "paywall",
                        identifier;
                        "giving up acquiring paywall: {err}");
                    return Err(Error::AcquisitionFailed {
                        identifier: identifier.to_owned(),
                    });
                }
                Err(err) => {
                    attempts_left -= 1;
                    log::debug!(target: "paywall",
                        identifier,
                        attempts_left;
                        "retrying paywall acquisition after error: {err}");
                }
            }
        }
    }
}
