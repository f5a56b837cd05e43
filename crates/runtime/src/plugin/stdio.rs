//! Host side of the stdio transport: a provider subprocess as a [`ProviderPlugin`].

use super::frame::{Frame, FrameWriter, PROTOCOL_VERSION, PluginRequest, PluginResponse, decode, frame_id};
use super::{ProviderCallbacks, ProviderPlugin};
use crate::error::{CoordinatorError, TransportError};
use crate::sync::{lock, read, write};
use async_trait::async_trait;
use inquest_types::{
    CallbackRequest, ConnectRequest, ConnectResponse, DataRequest, DataResponse, ProviderDescriptor, Schema, StoreRequest,
    StoreResponse,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

type ResponseSender = oneshot::Sender<Result<PluginResponse, TransportError>>;

/// State shared between the plugin handle and its reader task.
struct Shared {
    provider: String,
    writer: FrameWriter,
    pending: Mutex<HashMap<u64, ResponseSender>>,
    callbacks: RwLock<HashMap<u32, Arc<dyn ProviderCallbacks>>>,
    alive: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn unavailable(&self) -> TransportError {
        let reason = lock(&self.failure)
            .clone()
            .unwrap_or_else(|| "provider process has exited".to_string());
        TransportError::unavailable(&self.provider, reason)
    }

    /// Flags the transport dead, then fails every request still waiting.
    fn mark_dead(&self, reason: impl Into<String>) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                *failure = Some(reason.into());
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        let drained: Vec<ResponseSender> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(self.unavailable()));
        }
    }

    fn complete(&self, id: u64, result: Result<PluginResponse, TransportError>) {
        match lock(&self.pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(provider = %self.provider, id, "response for unknown request"),
        }
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let result = self.writer.send(frame).await;
        if let Err(err) = &result {
            self.mark_dead(err.to_string());
        }
        result
    }

    async fn serve_callback(&self, id: u64, connection: u32, request: CallbackRequest) {
        let callbacks = read(&self.callbacks).get(&connection).cloned();
        let result = match callbacks {
            Some(callbacks) => callbacks.handle(request).await.map_err(|e| e.to_string()),
            None => Err(format!("no callbacks registered for connection {connection}")),
        };
        if let Err(err) = self.send(&Frame::CallbackResult { id, result }).await {
            warn!(provider = %self.provider, connection, error = %err, "failed to answer provider callback");
        }
    }
}

/// A provider reached through newline-delimited JSON frames.
///
/// Usually backed by a child process ([`StdioPlugin::spawn`]); any reader and
/// writer pair works ([`StdioPlugin::connect_io`]).
pub struct StdioPlugin {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    child: Option<tokio::sync::Mutex<Child>>,
}

impl StdioPlugin {
    /// Starts the provider executable and waits for its handshake.
    pub async fn spawn(descriptor: &ProviderDescriptor, handshake_timeout: Duration) -> Result<Self, CoordinatorError> {
        let path = descriptor
            .path
            .as_ref()
            .ok_or_else(|| CoordinatorError::spawn_failed(&descriptor.id, "provider has no executable path"))?;

        let mut command = Command::new(path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| CoordinatorError::spawn_failed(&descriptor.id, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoordinatorError::spawn_failed(&descriptor.id, "stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoordinatorError::spawn_failed(&descriptor.id, "stdout is not piped"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(descriptor.id.clone(), stderr);
        }

        let mut plugin = Self::connect_io(descriptor.id.clone(), BufReader::new(stdout), stdin, handshake_timeout).await?;
        plugin.child = Some(tokio::sync::Mutex::new(child));
        debug!(provider = %descriptor.id, path = %path.display(), "provider process started");
        Ok(plugin)
    }

    /// Performs the handshake over an existing stream pair.
    pub async fn connect_io<R, W>(
        provider: impl Into<String>,
        reader: R,
        writer: W,
        handshake_timeout: Duration,
    ) -> Result<Self, CoordinatorError>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let provider = provider.into();
        let mut lines = reader.lines();

        let hello = timeout(handshake_timeout, lines.next_line())
            .await
            .map_err(|_| CoordinatorError::handshake_failed(&provider, "timed out waiting for hello"))?
            .map_err(|e| CoordinatorError::handshake_failed(&provider, e))?
            .ok_or_else(|| CoordinatorError::handshake_failed(&provider, "provider exited before the handshake"))?;

        match decode(&hello) {
            Ok(Frame::Hello { protocol_version, .. }) if protocol_version == PROTOCOL_VERSION => {}
            Ok(Frame::Hello { protocol_version, .. }) => {
                return Err(CoordinatorError::handshake_failed(
                    &provider,
                    format!("protocol version {protocol_version} is not supported (expected {PROTOCOL_VERSION})"),
                ));
            }
            Ok(other) => {
                return Err(CoordinatorError::handshake_failed(&provider, format!("expected hello, got {other:?}")));
            }
            Err(err) => return Err(CoordinatorError::handshake_failed(&provider, err)),
        }

        let shared = Arc::new(Shared {
            writer: FrameWriter::new(provider.clone(), writer),
            provider,
            pending: Mutex::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            alive: AtomicBool::new(true),
            failure: Mutex::new(None),
        });
        let reader = tokio::spawn(read_loop(shared.clone(), lines));

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            reader,
            child: None,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    async fn request(&self, request: PluginRequest) -> Result<PluginResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);
        if !self.is_alive() {
            lock(&self.shared.pending).remove(&id);
            return Err(self.shared.unavailable());
        }

        self.shared.send(&Frame::Request { id, request }).await?;
        rx.await.map_err(|_| self.shared.unavailable())?
    }
}

impl Drop for StdioPlugin {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn mismatch(expected: &str, got: PluginResponse) -> TransportError {
    TransportError::protocol(format!("expected {expected} response, got {got:?}"))
}

#[async_trait]
impl ProviderPlugin for StdioPlugin {
    async fn schema(&self) -> Result<Schema, TransportError> {
        match self.request(PluginRequest::Schema).await? {
            PluginResponse::Schema(schema) => Ok(schema),
            other => Err(mismatch("schema", other)),
        }
    }

    async fn connect(&self, req: ConnectRequest, callbacks: Arc<dyn ProviderCallbacks>) -> Result<ConnectResponse, TransportError> {
        match self.request(PluginRequest::Connect(req)).await? {
            PluginResponse::Connect(resp) => {
                write(&self.shared.callbacks).insert(resp.id, callbacks);
                Ok(resp)
            }
            other => Err(mismatch("connect", other)),
        }
    }

    async fn get_data(&self, req: DataRequest) -> Result<DataResponse, TransportError> {
        match self.request(PluginRequest::GetData(req)).await? {
            PluginResponse::Data(data) => Ok(data),
            other => Err(mismatch("data", other)),
        }
    }

    async fn store_data(&self, req: StoreRequest) -> Result<StoreResponse, TransportError> {
        match self.request(PluginRequest::StoreData(req)).await? {
            PluginResponse::Stored(resp) => Ok(resp),
            other => Err(mismatch("store", other)),
        }
    }

    async fn disconnect(&self, connection: u32) -> Result<(), TransportError> {
        write(&self.shared.callbacks).remove(&connection);
        match self.request(PluginRequest::Disconnect { connection }).await {
            Ok(PluginResponse::Disconnected) => Ok(()),
            Ok(other) => Err(mismatch("disconnect", other)),
            // A dead process holds no connections.
            Err(err) if err.is_unavailable() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let result = match self.request(PluginRequest::Shutdown).await {
            Ok(PluginResponse::Shutdown) => Ok(()),
            Ok(other) => Err(mismatch("shutdown", other)),
            // The process going away is what shutdown asked for.
            Err(err) if err.is_unavailable() => Ok(()),
            Err(err) => Err(err),
        };
        write(&self.shared.callbacks).clear();

        if let Some(child) = &self.child {
            let mut child = child.lock().await;
            if timeout(Duration::from_secs(5), child.wait()).await.is_err() {
                warn!(provider = %self.shared.provider, "provider did not exit after shutdown, killing it");
                let _ = child.kill().await;
            }
        }
        result
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut lines: Lines<R>)
where
    R: AsyncBufRead + Send + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                shared.mark_dead("provider closed its output");
                break;
            }
            Err(err) => {
                shared.mark_dead(format!("failed to read from provider: {err}"));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode(&line) {
            Ok(Frame::Response { id, result }) => shared.complete(id, result.map_err(TransportError::remote)),
            Ok(Frame::Callback { id, connection, request }) => {
                let shared = shared.clone();
                tokio::spawn(async move { shared.serve_callback(id, connection, request).await });
            }
            Ok(other) => warn!(provider = %shared.provider, frame = ?other, "unexpected frame from provider"),
            Err(err) => {
                warn!(provider = %shared.provider, error = %err, "malformed frame from provider");
                // Whoever waits on the frame's id must not wait forever.
                match frame_id(&line) {
                    Some((kind, id)) if kind == "response" => shared.complete(id, Err(err)),
                    Some((kind, id)) if kind == "callback" => {
                        let result = Err(err.to_string());
                        if let Err(err) = shared.send(&Frame::CallbackResult { id, result }).await {
                            warn!(provider = %shared.provider, error = %err, "failed to reject malformed callback");
                        }
                    }
                    _ => {
                        shared.mark_dead(format!("unreadable frame from provider: {err}"));
                        break;
                    }
                }
            }
        }
    }
    debug!(provider = %shared.provider, "provider output closed");
}

/// Forwards the provider's stderr into the log, one event per line.
fn spawn_stderr_logger(provider: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(provider = %provider, "{line}");
        }
    });
}
