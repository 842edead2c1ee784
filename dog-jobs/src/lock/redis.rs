use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::info;

use super::{Lease, LockService};
use crate::{JobsError, JobsResult, LockToken};

const RELEASE_IF_OWNER_LUA: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock service backed by Redis `SET NX PX`
#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisLockService {
    pub async fn connect(url: &str) -> JobsResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis lock service");

        Ok(Self {
            conn,
            release_script: Script::new(RELEASE_IF_OWNER_LUA),
        })
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, resource: &str, ttl: Duration) -> JobsResult<Lease> {
        let mut conn = self.conn.clone();
        let token = LockToken::new();

        let reply: Option<String> = redis::cmd("SET")
            .arg(resource)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => Ok(Lease {
                resource: resource.to_string(),
                token,
                ttl,
            }),
            None => Err(JobsError::LockContention {
                resource: resource.to_string(),
            }),
        }
    }

    async fn release(&self, lease: &Lease) -> JobsResult<()> {
        let mut conn = self.conn.clone();

        let released: i64 = self
            .release_script
            .key(&lease.resource)
            .arg(lease.token.as_str())
            .invoke_async(&mut conn)
            .await?;

        if released == 1 {
            Ok(())
        } else {
            Err(JobsError::LockRelease {
                resource: lease.resource.clone(),
                reason: "lock expired or is owned by another holder".to_string(),
            })
        }
    }
}
