//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use traffic_mirror::pipeline::{Builder, Module, ModuleContext, Registry, connect};
use traffic_mirror::request::Request;
use traffic_mirror::source::ChannelSource;

/// One request as seen by a mock backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A mock backend recording every request it receives.
pub struct MockBackend {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Highest number of requests handled at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Start a mock backend answering `200 OK` after `delay`.
pub async fn start_mock_backend(delay: Duration) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        received: Arc::default(),
        active: Arc::default(),
        peak: Arc::default(),
    };

    let received = backend.received.clone();
    let active = backend.active.clone();
    let peak = backend.peak.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let received = received.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(socket).await else {
                    return;
                };
                let (req, mut socket) = request;

                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                received.lock().unwrap().push(req);
                active.fetch_sub(1, Ordering::SeqCst);

                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    backend
}

async fn read_request(socket: TcpStream) -> Option<(Received, TcpStream)> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed.split_once(':')?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.ok()?;

    Some((
        Received {
            method,
            target,
            headers,
            body,
        },
        reader.into_inner(),
    ))
}

/// Build `descriptor` and feed it from a channel source.
///
/// Returns the sender feeding the module and the module itself.
pub fn feed(descriptor: &serde_json::Value) -> (tokio::sync::mpsc::Sender<Request>, Arc<dyn Module>) {
    let builder = Builder::new(Arc::new(Registry::with_builtins()));
    let module = builder.build(descriptor).unwrap();
    let (source, tx) = ChannelSource::new(Arc::new(ModuleContext::new("test-source", "source.channel"))).unwrap();
    connect(source.as_ref(), module.as_ref()).unwrap();
    (tx, module)
}

/// Wait until the module output closes, discarding what it emits.
pub async fn drain(module: &dyn Module) -> usize {
    let mut output = module.take_output().unwrap();
    let mut count = 0;
    let wait = async {
        while output.recv().await.is_some() {
            count += 1;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("pipeline output did not close");
    count
}
