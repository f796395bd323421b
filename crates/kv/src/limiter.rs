use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Per-endpoint bound on in-flight requests.
///
/// Each endpoint gets a FIFO semaphore sized by its `max_inflight` policy on
/// first use. Callers over the bound queue in arrival order; nothing is rejected.
#[derive(Clone, Default)]
pub struct InflightLimiter {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

struct Slot {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// Holds one in-flight slot of an endpoint until dropped.
#[derive(Debug)]
pub struct InflightGuard {
    _permit: OwnedSemaphorePermit,
}

impl InflightLimiter {
    fn semaphore(&self, endpoint_id: &str, max_inflight: usize) -> Arc<Semaphore> {
        let mut slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = slots.get(endpoint_id) {
            return slot.semaphore.clone();
        }
        let max = max_inflight.max(1);
        let semaphore = Arc::new(Semaphore::new(max));
        slots.insert(
            endpoint_id.to_string(),
            Slot {
                semaphore: semaphore.clone(),
                max,
            },
        );
        semaphore
    }

    /// Wait for a slot of `endpoint_id`. `max_inflight` sizes the endpoint's
    /// semaphore the first time it's seen and is ignored afterwards.
    pub async fn acquire(&self, endpoint_id: &str, max_inflight: usize) -> Result<InflightGuard> {
        let semaphore = self.semaphore(endpoint_id, max_inflight);

        match semaphore.acquire_owned().await {
            Ok(permit) => Ok(InflightGuard { _permit: permit }),
            Err(_closed) => Err(Error::LimiterClosed(endpoint_id.to_string())),
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, endpoint_id: &str, max_inflight: usize) -> Option<InflightGuard> {
        self.semaphore(endpoint_id, max_inflight)
            .try_acquire_owned()
            .ok()
            .map(|permit| InflightGuard { _permit: permit })
    }

    /// Number of requests currently holding a slot of `endpoint_id`.
    pub fn inflight_count(&self, endpoint_id: &str) -> usize {
        let slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(endpoint_id) {
            Some(slot) => slot.max - slot.semaphore.available_permits(),
            None => 0,
        }
    }
}
