use crate::resp::{encode_command, read_reply, Reply};
use crate::{Error, InflightLimiter, Result};
use models::EndpointSpec;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// A single RESP connection.
struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    async fn call(&mut self, args: &[&[u8]]) -> io::Result<Reply> {
        self.stream.get_mut().write_all(&encode_command(args)).await?;
        read_reply(&mut self.stream).await
    }
}

/// Async client of one Redis endpoint.
///
/// Every command first takes an in-flight slot of the endpoint, then reuses an
/// idle connection or dials a new one. A connection that saw a transport
/// error or timeout is dropped rather than returned to the pool.
#[derive(Clone)]
pub struct RedisClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("endpoint_id", &self.inner.endpoint_id)
            .field("address", &self.inner.address)
            .field("max_inflight", &self.inner.max_inflight)
            .finish_non_exhaustive()
    }
}

struct Inner {
    endpoint_id: String,
    address: String,
    max_inflight: usize,
    connect_timeout: Duration,
    request_timeout: Duration,
    limiter: InflightLimiter,
    idle: Mutex<Vec<Connection>>,
}

impl RedisClient {
    pub fn new(spec: &EndpointSpec, limiter: InflightLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint_id: spec.endpoint_id.clone(),
                address: spec.address(),
                max_inflight: spec.policy.max_inflight(),
                connect_timeout: spec.policy.connect_timeout(),
                request_timeout: spec.policy.request_timeout(),
                limiter,
                idle: Default::default(),
            }),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.inner.endpoint_id
    }

    /// LRANGE `key` `start` `stop`. Nil elements map to empty strings.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        const OP: &str = "LRANGE";
        let (start, stop) = (start.to_string(), stop.to_string());

        match self
            .command(OP, &[OP.as_bytes(), key.as_bytes(), start.as_bytes(), stop.as_bytes()])
            .await?
        {
            Reply::Array(None) => Ok(Vec::new()),
            Reply::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(b)) => into_string(OP, b),
                    Reply::Bulk(None) => Ok(String::new()),
                    other => Err(unexpected(OP, &other)),
                })
                .collect(),
            other => Err(unexpected(OP, &other)),
        }
    }

    /// HGETALL `key` as a field map. A missing key is an empty map.
    pub async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        const OP: &str = "HGETALL";

        let items = match self.command(OP, &[OP.as_bytes(), key.as_bytes()]).await? {
            Reply::Array(None) => return Ok(BTreeMap::new()),
            Reply::Array(Some(items)) => items,
            other => return Err(unexpected(OP, &other)),
        };
        if items.len() % 2 != 0 {
            return Err(Error::Protocol {
                op: OP,
                message: format!("odd number of elements ({})", items.len()),
            });
        }

        let mut out = BTreeMap::new();
        let mut it = items.into_iter();
        while let (Some(field), Some(value)) = (it.next(), it.next()) {
            let field = match field {
                Reply::Bulk(Some(b)) => into_string(OP, b)?,
                other => return Err(unexpected(OP, &other)),
            };
            let value = match value {
                Reply::Bulk(Some(b)) => into_string(OP, b)?,
                Reply::Bulk(None) => String::new(),
                other => return Err(unexpected(OP, &other)),
            };
            out.insert(field, value);
        }
        Ok(out)
    }

    async fn command(&self, op: &'static str, args: &[&[u8]]) -> Result<Reply> {
        let inner = &*self.inner;
        let _guard = inner
            .limiter
            .acquire(&inner.endpoint_id, inner.max_inflight)
            .await?;

        let mut conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.dial(op).await?,
        };

        match tokio::time::timeout(inner.request_timeout, conn.call(args)).await {
            Err(_elapsed) => Err(Error::RequestTimeout {
                op,
                timeout: inner.request_timeout,
            }),
            Ok(Err(err)) if err.kind() == io::ErrorKind::InvalidData => Err(Error::Protocol {
                op,
                message: err.to_string(),
            }),
            Ok(Err(source)) => Err(Error::Io { op, source }),
            Ok(Ok(Reply::Error(message))) => {
                self.put_idle(conn);
                Err(Error::Server { op, message })
            }
            Ok(Ok(reply)) => {
                self.put_idle(conn);
                Ok(reply)
            }
        }
    }

    async fn dial(&self, op: &'static str) -> Result<Connection> {
        let inner = &*self.inner;

        let stream = match tokio::time::timeout(
            inner.connect_timeout,
            TcpStream::connect(&inner.address),
        )
        .await
        {
            Err(_elapsed) => {
                return Err(Error::ConnectTimeout {
                    op,
                    address: inner.address.clone(),
                    timeout: inner.connect_timeout,
                })
            }
            Ok(Err(source)) => {
                return Err(Error::Connect {
                    op,
                    address: inner.address.clone(),
                    source,
                })
            }
            Ok(Ok(stream)) => stream,
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(endpoint_id = %inner.endpoint_id, ?err, "failed to set TCP_NODELAY");
        }

        tracing::debug!(endpoint_id = %inner.endpoint_id, address = %inner.address, "dialed redis connection");

        Ok(Connection {
            stream: BufReader::new(stream),
        })
    }

    fn take_idle(&self) -> Option<Connection> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn put_idle(&self, conn: Connection) {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of pooled idle connections.
    pub fn idle_connections(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn into_string(op: &'static str, b: Vec<u8>) -> Result<String> {
    String::from_utf8(b).map_err(|_| Error::Protocol {
        op,
        message: "reply is not UTF-8".to_string(),
    })
}

fn unexpected(op: &'static str, reply: &Reply) -> Error {
    Error::Protocol {
        op,
        message: format!("unexpected reply {reply:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::FakeRedis;
    use models::EndpointPolicy;

    fn policy(max_inflight: usize, request_timeout_ms: u64) -> EndpointPolicy {
        EndpointPolicy {
            max_inflight: Some(max_inflight),
            connect_timeout_ms: Some(1000),
            request_timeout_ms: Some(request_timeout_ms),
        }
    }

    #[tokio::test]
    async fn test_lrange_and_hgetall() {
        let fake = FakeRedis::start().await.unwrap();
        fake.set_list("follow:1", ["10", "20", "30"]);
        fake.set_hash("user:10", &[("country", "US"), ("title", "ten")]);

        let client = RedisClient::new(&fake.endpoint("ep_0001", policy(4, 1000)), Default::default());

        assert_eq!(client.lrange("follow:1", 0, 1).await.unwrap(), vec!["10", "20"]);
        assert_eq!(client.lrange("follow:1", 0, -1).await.unwrap().len(), 3);
        assert!(client.lrange("follow:404", 0, -1).await.unwrap().is_empty());

        let user = client.hgetall("user:10").await.unwrap();
        assert_eq!(user.get("country").map(String::as_str), Some("US"));
        assert_eq!(user.len(), 2);
        assert!(client.hgetall("user:404").await.unwrap().is_empty());

        // Every command reused the single pooled connection.
        assert_eq!(fake.commands(), 5);
        assert_eq!(client.idle_connections(), 1);

        let debug = format!("{client:?}");
        assert!(
            debug.starts_with(r#"RedisClient { endpoint_id: "ep_0001", address: "127.0.0.1:"#),
            "{debug}"
        );
        assert!(debug.ends_with("max_inflight: 4, .. }"), "{debug}");
    }

    #[tokio::test]
    async fn test_reply_shapes() {
        let fake = FakeRedis::start().await.unwrap();
        fake.set_canned(
            "follow:1",
            Reply::Array(Some(vec![Reply::bulk("7"), Reply::Bulk(None)])),
        );
        fake.set_canned(
            "user:1",
            Reply::Array(Some(vec![Reply::bulk("country")])),
        );
        fake.set_canned("user:2", Reply::Integer(3));

        let client = RedisClient::new(&fake.endpoint("ep_0001", policy(4, 1000)), Default::default());

        assert_eq!(client.lrange("follow:1", 0, -1).await.unwrap(), vec!["7", ""]);

        insta::assert_snapshot!(
            client.hgetall("user:1").await.unwrap_err(),
            @"redis: HGETALL error: protocol: odd number of elements (1)"
        );
        insta::assert_snapshot!(
            client.hgetall("user:2").await.unwrap_err(),
            @"redis: HGETALL error: protocol: unexpected reply Integer(3)"
        );
    }

    #[tokio::test]
    async fn test_server_errors_and_timeouts() {
        let fake = FakeRedis::start().await.unwrap();

        let client = RedisClient::new(&fake.endpoint("ep_0001", policy(4, 1000)), Default::default());
        fake.set_error(Some("ERR injected"));
        insta::assert_snapshot!(
            client.lrange("follow:1", 0, -1).await.unwrap_err(),
            @"redis: LRANGE error: ERR injected"
        );
        // An error reply leaves the connection usable.
        assert_eq!(client.idle_connections(), 1);
        fake.set_error(None);

        let client = RedisClient::new(&fake.endpoint("ep_0002", policy(4, 10)), Default::default());
        fake.set_delay(Duration::from_millis(200));
        let err = client.hgetall("user:1").await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { op: "HGETALL", .. }), "{err}");

        // The timed-out connection was discarded rather than pooled.
        assert_eq!(client.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Reserve a port, then release it so nothing is listening there.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let spec = EndpointSpec {
            endpoint_id: "ep_0001".to_string(),
            name: "closed".to_string(),
            kind: models::EndpointKind::Redis,
            host: "127.0.0.1".to_string(),
            port,
            policy: policy(1, 1000),
        };
        let client = RedisClient::new(&spec, Default::default());

        let err = client.lrange("follow:1", 0, -1).await.unwrap_err();
        assert!(matches!(err, Error::Connect { op: "LRANGE", .. }), "{err}");
    }

    #[tokio::test]
    async fn test_inflight_is_bounded_per_endpoint() {
        let fake = FakeRedis::start().await.unwrap();
        fake.set_list("media:1", ["1", "2"]);
        fake.set_delay(Duration::from_millis(10));

        let limiter = InflightLimiter::default();
        let client = RedisClient::new(&fake.endpoint("ep_0001", policy(2, 5000)), limiter.clone());

        let calls = (0..8).map(|_| client.lrange("media:1", 0, -1));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.as_ref().map(Vec::len).ok() == Some(2)));
        assert_eq!(fake.commands(), 8);
        assert!(fake.peak_inflight() <= 2);
        assert_eq!(limiter.inflight_count("ep_0001"), 0);
        assert!(client.idle_connections() <= 2);
    }
}
