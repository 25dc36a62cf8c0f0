//! Hand-written fakes for the recognition boundary

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AssetProbe, BackendOptions, OcrBackend, OcrBackendFactory, Recognition};

/// Backend returning a scripted reply
pub struct FakeBackend {
    reply: Mutex<Result<Recognition, String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    terminated: AtomicBool,
}

impl FakeBackend {
    pub fn replying(text: &str, confidence: f32) -> Self {
        Self {
            reply: Mutex::new(Ok(Recognition {
                text: text.to_string(),
                confidence,
            })),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn set_reply(&self, text: &str, confidence: f32) {
        *self.reply.lock() = Ok(Recognition {
            text: text.to_string(),
            confidence,
        });
    }

    pub fn fail_with(&self, message: &str) {
        *self.reply.lock() = Err(message.to_string());
    }

    /// Make every recognition take this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrBackend for FakeBackend {
    async fn recognize(&self, _image: &[u8]) -> anyhow::Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_terminated() {
            anyhow::bail!("backend terminated");
        }
        self.reply.lock().clone().map_err(anyhow::Error::msg)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// A recorded construction request
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub language: String,
    pub worker_count: usize,
    pub options: BackendOptions,
}

/// Factory whose outcomes are queued by the test
pub struct ScriptedFactory {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    always_fail: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    reply: Recognition,
    calls: Mutex<Vec<CreateCall>>,
    created: Mutex<Vec<Arc<FakeBackend>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::replying("", 0.0)
    }

    /// Backends built by this factory start with this reply
    pub fn replying(text: &str, confidence: f32) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            always_fail: Mutex::new(None),
            delay: Mutex::new(None),
            reply: Recognition {
                text: text.to_string(),
                confidence,
            },
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, message: &str) {
        self.outcomes.lock().push_back(Err(message.to_string()));
    }

    /// Fail every construction until [`succeed`](Self::succeed)
    pub fn fail_always(&self, message: &str) {
        *self.always_fail.lock() = Some(message.to_string());
    }

    pub fn succeed(&self) {
        *self.always_fail.lock() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<CreateCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn created(&self) -> Vec<Arc<FakeBackend>> {
        self.created.lock().clone()
    }

    pub fn last_created(&self) -> Option<Arc<FakeBackend>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl OcrBackendFactory for ScriptedFactory {
    async fn create(
        &self,
        language: &str,
        worker_count: usize,
        options: BackendOptions,
    ) -> anyhow::Result<Arc<dyn OcrBackend>> {
        self.calls.lock().push(CreateCall {
            language: language.to_string(),
            worker_count,
            options,
        });

        let outcome = match self.always_fail.lock().clone() {
            Some(message) => Err(message),
            None => self.outcomes.lock().pop_front().unwrap_or(Ok(())),
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        outcome.map_err(anyhow::Error::msg)?;
        let backend = Arc::new(FakeBackend::replying(
            &self.reply.text,
            self.reply.confidence,
        ));
        self.created.lock().push(Arc::clone(&backend));
        Ok(backend)
    }
}

/// Probe with a configurable set of unreachable URIs
#[derive(Default)]
pub struct FakeProbe {
    unreachable: Mutex<HashSet<String>>,
    checks: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn reachable() -> Self {
        Self::default()
    }

    pub fn mark_unreachable(&self, uri: &str) {
        self.unreachable.lock().insert(uri.to_string());
    }

    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().clone()
    }
}

#[async_trait]
impl AssetProbe for FakeProbe {
    async fn check(&self, uri: &str) -> Result<(), String> {
        self.checks.lock().push(uri.to_string());
        if self.unreachable.lock().contains(uri) {
            Err("HTTP 404 Not Found".to_string())
        } else {
            Ok(())
        }
    }
}

/// Serve one canned HTTP response to every connection on a loopback port.
/// Returns the base URL.
pub async fn serve_http(status: &'static str, body: &'static [u8]) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                if !request.starts_with(b"HEAD") {
                    let _ = socket.write_all(body).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// A loopback URL nothing is listening on
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
