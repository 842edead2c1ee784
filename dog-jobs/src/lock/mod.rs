//! Lock coordinator: acquire/release against the distributed lock service.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{JobsResult, LockToken};

/// A lock held on behalf of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub resource: String,
    pub token: LockToken,
    pub ttl: Duration,
}

/// Contract of the distributed lock service
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lock on `resource` for at most `ttl`.
    ///
    /// Fails with [`crate::JobsError::LockContention`] when someone else holds
    /// it, or [`crate::JobsError::LockService`] when the service is unreachable.
    async fn acquire(&self, resource: &str, ttl: Duration) -> JobsResult<Lease>;

    /// Give the lock back. Failing here is never fatal; the TTL frees it anyway.
    async fn release(&self, lease: &Lease) -> JobsResult<()>;
}

/// Namespaces lock resources and owns the release policy
#[derive(Clone)]
pub struct LockCoordinator {
    service: Arc<dyn LockService>,
    prefix: String,
}

impl LockCoordinator {
    pub fn new(service: Arc<dyn LockService>, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
        }
    }

    /// Resource key for items of `job_name` sharing `unique_value`
    pub fn resource_key(&self, job_name: &str, unique_value: &str) -> String {
        format!("{}:{}:lock:{}", self.prefix, job_name, unique_value)
    }

    pub async fn acquire(&self, job_name: &str, unique_value: &str, ttl: Duration) -> JobsResult<HeldLock> {
        let resource = self.resource_key(job_name, unique_value);
        let lease = self.service.acquire(&resource, ttl).await?;
        debug!("Acquired lock {} for {:?}", lease.resource, ttl);

        Ok(HeldLock {
            lease,
            service: self.service.clone(),
        })
    }
}

/// A lock that must be given back once the item is done
pub struct HeldLock {
    lease: Lease,
    service: Arc<dyn LockService>,
}

impl HeldLock {
    pub fn resource(&self) -> &str {
        &self.lease.resource
    }

    /// Release the lock; failures are logged and swallowed
    pub async fn release(self) {
        match self.service.release(&self.lease).await {
            Ok(()) => debug!("Released lock {}", self.lease.resource),
            Err(e) => warn!("Failed to release lock {}: {}", self.lease.resource, e),
        }
    }
}
