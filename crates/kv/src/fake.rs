//! In-process Redis-protocol server for tests.
//!
//! It understands PING, LRANGE, and HGETALL over an in-memory store, and can
//! be told to delay replies, fail every command, or return a canned reply for
//! a key.
use crate::resp::{encode_reply, read_reply, Reply};
use models::{EndpointKind, EndpointPolicy, EndpointRegistry, EndpointSpec};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct State {
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    canned: HashMap<String, Reply>,
    error: Option<String>,
    delay: Duration,
    commands: usize,
    inflight: usize,
    peak_inflight: usize,
}

pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: tokio::task::JoinHandle<()>,
    _runtime: Option<tokio::runtime::Runtime>,
}

impl FakeRedis {
    /// Start serving on the current runtime.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State::default()));
        let task = tokio::spawn(serve(listener, state.clone()));

        Ok(Self {
            addr,
            state,
            task,
            _runtime: None,
        })
    }

    /// Start serving on a dedicated runtime, for use from blocking tests.
    pub fn start_background() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State::default()));
        let task = runtime.spawn(serve(listener, state.clone()));

        Ok(Self {
            addr,
            state,
            task,
            _runtime: Some(runtime),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// A redis endpoint pointing at this server.
    pub fn endpoint(&self, endpoint_id: &str, policy: EndpointPolicy) -> EndpointSpec {
        EndpointSpec {
            endpoint_id: endpoint_id.to_string(),
            name: format!("fake_{endpoint_id}"),
            kind: EndpointKind::Redis,
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            policy,
        }
    }

    /// A registry with a single redis endpoint `endpoint_id` at this server.
    pub fn registry(&self, endpoint_id: &str, policy: EndpointPolicy) -> EndpointRegistry {
        EndpointRegistry::from_specs("test", vec![self.endpoint(endpoint_id, policy)])
            .unwrap_or_default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_list<I, S>(&self, key: &str, items: I)
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let items = items.into_iter().map(|s| s.to_string()).collect();
        self.with_state(|s| s.lists.insert(key.to_string(), items));
    }

    pub fn set_hash(&self, key: &str, fields: &[(&str, &str)]) {
        let fields = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.with_state(|s| s.hashes.insert(key.to_string(), fields));
    }

    /// Answer every command on `key` with `reply`.
    pub fn set_canned(&self, key: &str, reply: Reply) {
        self.with_state(|s| s.canned.insert(key.to_string(), reply));
    }

    /// Answer every command with an error reply, or stop doing so.
    pub fn set_error(&self, message: Option<&str>) {
        self.with_state(|s| s.error = message.map(str::to_string));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.with_state(|s| s.delay = delay);
    }

    /// Total commands received.
    pub fn commands(&self) -> usize {
        self.with_state(|s| s.commands)
    }

    /// Most commands being processed at the same time.
    pub fn peak_inflight(&self) -> usize {
        self.with_state(|s| s.peak_inflight)
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, state: Arc<Mutex<State>>) {
    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(?err, "fake redis accept failed");
                continue;
            }
        };
        tokio::spawn(serve_connection(stream, state.clone()));
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut stream = BufReader::new(stream);
    let mut out = Vec::new();

    loop {
        let command = match read_reply(&mut stream).await {
            Ok(command) => command,
            Err(_) => return, // Client hung up, or sent garbage.
        };

        let delay = {
            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            s.commands += 1;
            s.inflight += 1;
            s.peak_inflight = s.peak_inflight.max(s.inflight);
            s.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            s.inflight -= 1;
            execute(&s, command)
        };

        out.clear();
        encode_reply(&reply, &mut out);
        if stream.get_mut().write_all(&out).await.is_err() {
            return;
        }
    }
}

fn execute(state: &State, command: Reply) -> Reply {
    if let Some(message) = &state.error {
        return Reply::Error(message.clone());
    }

    let args: Vec<String> = match command {
        Reply::Array(Some(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Reply::Bulk(Some(b)) => String::from_utf8(b).ok(),
                _ => None,
            })
            .collect(),
        _ => return Reply::Error("ERR expected command array".to_string()),
    };
    let Some(name) = args.first() else {
        return Reply::Error("ERR empty command".to_string());
    };

    if let Some(reply) = args.get(1).and_then(|key| state.canned.get(key)) {
        return reply.clone();
    }

    match (name.to_ascii_uppercase().as_str(), &args[1..]) {
        ("PING", []) => Reply::Simple("PONG".to_string()),
        ("LRANGE", [key, start, stop]) => {
            let (Ok(start), Ok(stop)) = (start.parse::<i64>(), stop.parse::<i64>()) else {
                return Reply::Error("ERR value is not an integer or out of range".to_string());
            };
            let list = state.lists.get(key).map(Vec::as_slice).unwrap_or_default();
            Reply::Array(Some(
                lrange(list, start, stop)
                    .iter()
                    .map(|s| Reply::bulk(s.as_bytes()))
                    .collect(),
            ))
        }
        ("HGETALL", [key]) => Reply::Array(Some(
            state
                .hashes
                .get(key)
                .into_iter()
                .flatten()
                .flat_map(|(f, v)| [Reply::bulk(f.as_bytes()), Reply::bulk(v.as_bytes())])
                .collect(),
        )),
        (name, _) => Reply::Error(format!("ERR unknown command or arity '{name}'")),
    }
}

fn lrange(list: &[String], start: i64, stop: i64) -> &[String] {
    let n = list.len() as i64;
    let start = if start < 0 { (n + start).max(0) } else { start };
    let stop = if stop < 0 { n + stop } else { stop.min(n - 1) };

    if start > stop || start >= n {
        return &[];
    }
    &list[start as usize..=stop as usize]
}

#[cfg(test)]
mod test {
    use super::lrange;

    #[test]
    fn test_lrange_bounds() {
        let list: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

        for (start, stop, expect) in [
            (0, -1, vec!["a", "b", "c", "d"]),
            (0, 1, vec!["a", "b"]),
            (1, 100, vec!["b", "c", "d"]),
            (-2, -1, vec!["c", "d"]),
            (-100, 0, vec!["a"]),
            (3, 1, vec![]),
            (4, 10, vec![]),
            (0, -5, vec![]),
        ] {
            assert_eq!(lrange(&list, start, stop), expect, "{start} {stop}");
        }
        assert!(lrange(&[], 0, -1).is_empty());
    }
}
