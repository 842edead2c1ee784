use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Lease, LockService};
use crate::{JobsError, JobsResult, LockToken};

/// Single-process lock service with TTL leases
#[derive(Clone, Default)]
pub struct MemoryLockService {
    leases: Arc<Mutex<HashMap<String, (LockToken, Instant)>>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `resource` is held and not yet expired
    pub fn is_locked(&self, resource: &str) -> bool {
        self.leases
            .lock()
            .get(resource)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, resource: &str, ttl: Duration) -> JobsResult<Lease> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        if let Some((_, expires_at)) = leases.get(resource) {
            if *expires_at > now {
                return Err(JobsError::LockContention {
                    resource: resource.to_string(),
                });
            }
        }

        let token = LockToken::new();
        leases.insert(resource.to_string(), (token.clone(), now + ttl));

        Ok(Lease {
            resource: resource.to_string(),
            token,
            ttl,
        })
    }

    async fn release(&self, lease: &Lease) -> JobsResult<()> {
        let mut leases = self.leases.lock();

        match leases.get(&lease.resource) {
            Some((token, expires_at)) if *token == lease.token && *expires_at > Instant::now() => {
                leases.remove(&lease.resource);
                Ok(())
            }
            _ => Err(JobsError::LockRelease {
                resource: lease.resource.clone(),
                reason: "lock expired or is owned by another holder".to_string(),
            }),
        }
    }
}
