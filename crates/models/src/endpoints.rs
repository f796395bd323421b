use crate::canonical::digest;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_INFLIGHT: usize = 64;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Redis,
    Http,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Redis => "redis",
            EndpointKind::Http => "http",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "redis" => Some(EndpointKind::Redis),
            "http" => Some(EndpointKind::Http),
            _ => None,
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency and timeout policy of an endpoint. Unset fields fall back to
/// the `DEFAULT_*` constants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPolicy {
    pub max_inflight: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl EndpointPolicy {
    pub fn max_inflight(&self) -> usize {
        self.max_inflight.unwrap_or(DEFAULT_MAX_INFLIGHT)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS))
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Stable id such as "ep_0001". Never reused.
    pub endpoint_id: String,
    pub name: String,
    pub kind: EndpointKind,
    pub host: String,
    pub port: u16,
    pub policy: EndpointPolicy,
}

impl EndpointSpec {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Immutable snapshot of the endpoint registry for one environment.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    env: String,
    entries: Vec<EndpointSpec>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    registry_digest: String,
    config_digest: String,
}

impl EndpointRegistry {
    /// Load `path`. If `expected_env` is given, the file's env must match it.
    pub fn load(path: impl AsRef<Path>, expected_env: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::Endpoints(format!("cannot open {}: {err}", path.display()))
        })?;
        let doc: Value = serde_json::from_str(&content)
            .map_err(|err| Error::Endpoints(format!("invalid JSON in {}: {err}", path.display())))?;
        Self::from_json(&doc, expected_env)
    }

    pub fn from_json(doc: &Value, expected_env: Option<&str>) -> Result<Self> {
        let fail = |msg: String| Error::Endpoints(msg);

        if doc.get("schema_version").and_then(Value::as_i64) != Some(1) {
            return Err(fail("schema_version must be 1".to_string()));
        }
        let env = doc
            .get("env")
            .and_then(Value::as_str)
            .ok_or_else(|| fail("missing or invalid env field".to_string()))?;
        if let Some(expected) = expected_env {
            if env != expected {
                return Err(fail(format!("env mismatch: expected '{expected}', got '{env}'")));
            }
        }
        let registry_digest = doc
            .get("registry_digest")
            .and_then(Value::as_str)
            .ok_or_else(|| fail("missing or invalid registry_digest".to_string()))?;
        let config_digest = doc
            .get("config_digest")
            .and_then(Value::as_str)
            .ok_or_else(|| fail("missing or invalid config_digest".to_string()))?;
        let endpoints = doc
            .get("endpoints")
            .and_then(Value::as_array)
            .ok_or_else(|| fail("missing or invalid endpoints array".to_string()))?;

        let mut registry = Self {
            env: env.to_string(),
            ..Default::default()
        };
        for ep in endpoints {
            registry.insert(parse_endpoint(ep)?)?;
        }

        // Digests are recomputed from the parsed entries and must agree with the file.
        registry.registry_digest = digest(&registry_canonical_json(&registry.entries));
        registry.config_digest = digest(&config_canonical_json(&registry.entries));

        if registry.registry_digest != registry_digest {
            return Err(fail(format!(
                "registry_digest mismatch for env '{env}': expected {registry_digest}, computed {}",
                registry.registry_digest
            )));
        }
        if registry.config_digest != config_digest {
            return Err(fail(format!(
                "config_digest mismatch for env '{env}': expected {config_digest}, computed {}",
                registry.config_digest
            )));
        }
        Ok(registry)
    }

    /// Build a registry directly from specs, computing its digests.
    pub fn from_specs(env: &str, specs: Vec<EndpointSpec>) -> Result<Self> {
        let mut registry = Self {
            env: env.to_string(),
            ..Default::default()
        };
        for spec in specs {
            registry.insert(spec)?;
        }
        registry.registry_digest = digest(&registry_canonical_json(&registry.entries));
        registry.config_digest = digest(&config_canonical_json(&registry.entries));
        Ok(registry)
    }

    fn insert(&mut self, spec: EndpointSpec) -> Result<()> {
        if self.by_id.contains_key(&spec.endpoint_id) {
            return Err(Error::Endpoints(format!(
                "duplicate endpoint_id: {}",
                spec.endpoint_id
            )));
        }
        if self.by_name.contains_key(&spec.name) {
            return Err(Error::Endpoints(format!("duplicate endpoint name: {}", spec.name)));
        }
        let idx = self.entries.len();
        self.by_id.insert(spec.endpoint_id.clone(), idx);
        self.by_name.insert(spec.name.clone(), idx);
        self.entries.push(spec);
        Ok(())
    }

    pub fn by_id(&self, endpoint_id: &str) -> Option<&EndpointSpec> {
        self.by_id.get(endpoint_id).map(|i| &self.entries[*i])
    }

    pub fn by_name(&self, name: &str) -> Option<&EndpointSpec> {
        self.by_name.get(name).map(|i| &self.entries[*i])
    }

    pub fn entries(&self) -> &[EndpointSpec] {
        &self.entries
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn registry_digest(&self) -> &str {
        &self.registry_digest
    }

    pub fn config_digest(&self) -> &str {
        &self.config_digest
    }

    /// Render the registry in its on-disk JSON form.
    pub fn to_json(&self) -> Value {
        let mut doc = config_canonical_json(&self.entries);
        doc["env"] = json!(self.env);
        doc["registry_digest"] = json!(self.registry_digest);
        doc["config_digest"] = json!(self.config_digest);
        doc
    }
}

fn parse_endpoint(ep: &Value) -> Result<EndpointSpec> {
    let fail = |msg: String| Error::Endpoints(msg);

    let endpoint_id = ep
        .get("endpoint_id")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("endpoint missing endpoint_id".to_string()))?;
    if !endpoint_id.starts_with("ep_") {
        return Err(fail(format!("endpoint_id must start with 'ep_': {endpoint_id}")));
    }
    if endpoint_id.len() > 64 {
        return Err(fail(format!("endpoint_id too long (max 64): {endpoint_id}")));
    }

    let name = ep
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} missing name")))?;
    let kind = ep
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} missing kind")))?;
    let kind = EndpointKind::parse(kind)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} has unknown kind: {kind}")))?;

    let resolver = ep
        .get("resolver")
        .filter(|r| r.is_object())
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} missing resolver")))?;
    match resolver.get("type").and_then(Value::as_str) {
        Some("static") => (),
        Some(other @ ("consul" | "dns_srv" | "https")) => {
            return Err(fail(format!(
                "endpoint {endpoint_id}: only 'static' resolver is supported, got: {other}"
            )))
        }
        Some(other) => {
            return Err(fail(format!(
                "endpoint {endpoint_id} has unknown resolver type: {other}"
            )))
        }
        None => return Err(fail(format!("endpoint {endpoint_id} resolver missing type"))),
    }
    let host = resolver
        .get("host")
        .and_then(Value::as_str)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} resolver missing host")))?;
    let port = resolver
        .get("port")
        .and_then(Value::as_i64)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} resolver missing port")))?;
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| fail(format!("endpoint {endpoint_id} has invalid port: {port}")))?;

    let mut policy = EndpointPolicy::default();
    if let Some(p) = ep.get("policy").filter(|p| p.is_object()) {
        policy.max_inflight = p
            .get("max_inflight")
            .and_then(Value::as_u64)
            .map(|v| v as usize);
        policy.connect_timeout_ms = p.get("connect_timeout_ms").and_then(Value::as_u64);
        policy.request_timeout_ms = p.get("request_timeout_ms").and_then(Value::as_u64);
    }

    Ok(EndpointSpec {
        endpoint_id: endpoint_id.to_string(),
        name: name.to_string(),
        kind,
        host: host.to_string(),
        port,
        policy,
    })
}

fn sorted(entries: &[EndpointSpec]) -> Vec<&EndpointSpec> {
    let mut out: Vec<&EndpointSpec> = entries.iter().collect();
    out.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
    out
}

fn registry_canonical_json(entries: &[EndpointSpec]) -> Value {
    let entries: Vec<Value> = sorted(entries)
        .into_iter()
        .map(|ep| {
            json!({
                "endpoint_id": ep.endpoint_id,
                "name": ep.name,
                "kind": ep.kind.as_str(),
            })
        })
        .collect();
    json!({"schema_version": 1, "entries": entries})
}

fn config_canonical_json(entries: &[EndpointSpec]) -> Value {
    let endpoints: Vec<Value> = sorted(entries)
        .into_iter()
        .map(|ep| {
            let mut policy = serde_json::Map::new();
            if let Some(v) = ep.policy.max_inflight {
                policy.insert("max_inflight".to_string(), json!(v));
            }
            if let Some(v) = ep.policy.connect_timeout_ms {
                policy.insert("connect_timeout_ms".to_string(), json!(v));
            }
            if let Some(v) = ep.policy.request_timeout_ms {
                policy.insert("request_timeout_ms".to_string(), json!(v));
            }
            json!({
                "endpoint_id": ep.endpoint_id,
                "name": ep.name,
                "kind": ep.kind.as_str(),
                "resolver": {"type": "static", "host": ep.host, "port": ep.port},
                "policy": policy,
            })
        })
        .collect();
    json!({"schema_version": 1, "endpoints": endpoints})
}
