use crate::{Error, InflightLimiter, RedisClient, Result};
use models::EndpointSpec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Blocking facade over [`RedisClient`].
///
/// Calls are driven to completion on a private current-thread runtime, so the
/// connection pool, limiter, and timeouts are exactly those of the async
/// client. It must not be called from within an async context.
#[derive(Clone)]
pub struct BlockingRedisClient {
    client: RedisClient,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl BlockingRedisClient {
    pub fn new(spec: &EndpointSpec, limiter: InflightLimiter) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        Ok(Self {
            client: RedisClient::new(spec, limiter),
            runtime: Arc::new(runtime),
        })
    }

    pub fn endpoint_id(&self) -> &str {
        self.client.endpoint_id()
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.runtime.block_on(self.client.lrange(key, start, stop))
    }

    pub fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.runtime.block_on(self.client.hgetall(key))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::FakeRedis;
    use models::EndpointPolicy;

    #[test]
    fn test_blocking_calls_share_async_transport() {
        let fake = FakeRedis::start_background().unwrap();
        fake.set_list("recommendation:5", [101, 102, 103]);
        fake.set_hash("user:5", &[("country", "FR")]);

        let limiter = InflightLimiter::default();
        let client = BlockingRedisClient::new(
            &fake.endpoint(
                "ep_0001",
                EndpointPolicy {
                    request_timeout_ms: Some(1000),
                    ..Default::default()
                },
            ),
            limiter.clone(),
        )
        .unwrap();

        assert_eq!(
            client.lrange("recommendation:5", 0, 1).unwrap(),
            vec!["101", "102"]
        );
        assert_eq!(
            client.hgetall("user:5").unwrap().get("country").map(String::as_str),
            Some("FR")
        );
        assert_eq!(limiter.inflight_count("ep_0001"), 0);

        fake.set_error(Some("ERR down"));
        assert!(matches!(
            client.lrange("recommendation:5", 0, -1),
            Err(Error::Server { op: "LRANGE", .. })
        ));
    }
}
