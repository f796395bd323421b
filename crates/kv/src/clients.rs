use crate::{BlockingRedisClient, Error, InflightLimiter, RedisClient, Result};
use models::{EndpointKind, EndpointRegistry, EndpointSpec};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

fn redis_spec<'r>(registry: &'r EndpointRegistry, endpoint_id: &str) -> Result<&'r EndpointSpec> {
    let spec = registry
        .by_id(endpoint_id)
        .ok_or_else(|| Error::UnknownEndpoint(endpoint_id.to_string()))?;

    if spec.kind != EndpointKind::Redis {
        return Err(Error::WrongKind {
            endpoint_id: endpoint_id.to_string(),
            kind: spec.kind,
        });
    }
    Ok(spec)
}

/// Blocking clients of a registry, built lazily and cached by endpoint id.
pub struct IoClients {
    registry: Arc<EndpointRegistry>,
    limiter: InflightLimiter,
    cache: Mutex<HashMap<String, BlockingRedisClient>>,
}

impl IoClients {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self::with_limiter(registry, InflightLimiter::default())
    }

    pub fn with_limiter(registry: Arc<EndpointRegistry>, limiter: InflightLimiter) -> Self {
        Self {
            registry,
            limiter,
            cache: Default::default(),
        }
    }

    pub fn limiter(&self) -> &InflightLimiter {
        &self.limiter
    }

    pub fn redis(&self, endpoint_id: &str) -> Result<BlockingRedisClient> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = cache.get(endpoint_id) {
            return Ok(client.clone());
        }
        let spec = redis_spec(&self.registry, endpoint_id)?;
        let client = BlockingRedisClient::new(spec, self.limiter.clone())?;
        cache.insert(endpoint_id.to_string(), client.clone());

        tracing::debug!(%endpoint_id, address = %spec.address(), "built blocking redis client");
        Ok(client)
    }
}

/// Async clients of a registry, built lazily and cached by endpoint id.
pub struct AsyncIoClients {
    registry: Arc<EndpointRegistry>,
    limiter: InflightLimiter,
    cache: Mutex<HashMap<String, RedisClient>>,
}

impl AsyncIoClients {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self::with_limiter(registry, InflightLimiter::default())
    }

    pub fn with_limiter(registry: Arc<EndpointRegistry>, limiter: InflightLimiter) -> Self {
        Self {
            registry,
            limiter,
            cache: Default::default(),
        }
    }

    pub fn limiter(&self) -> &InflightLimiter {
        &self.limiter
    }

    pub fn redis(&self, endpoint_id: &str) -> Result<RedisClient> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = cache.get(endpoint_id) {
            return Ok(client.clone());
        }
        let spec = redis_spec(&self.registry, endpoint_id)?;
        let client = RedisClient::new(spec, self.limiter.clone());
        cache.insert(endpoint_id.to_string(), client.clone());

        tracing::debug!(%endpoint_id, address = %spec.address(), "built async redis client");
        Ok(client)
    }
}
