//! Provider side of the stdio transport.
//!
//! A provider executable hands its [`ProviderPlugin`] to [`serve`], which
//! answers requests from the host and forwards the plugin's callbacks back
//! over the same streams.

use super::frame::{Frame, FrameWriter, PROTOCOL_VERSION, PluginRequest, PluginResponse, decode};
use super::{ProviderCallbacks, ProviderPlugin};
use crate::error::{CallbackError, TransportError};
use crate::sync::lock;
use async_trait::async_trait;
use inquest_types::{CallbackRequest, CallbackResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type CallbackSender = oneshot::Sender<Result<CallbackResponse, String>>;

struct HostChannel {
    writer: FrameWriter,
    pending: Mutex<HashMap<u64, CallbackSender>>,
    next_id: AtomicU64,
}

impl HostChannel {
    async fn call(&self, connection: u32, request: CallbackRequest) -> Result<CallbackResponse, CallbackError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(err) = self.writer.send(&Frame::Callback { id, connection, request }).await {
            lock(&self.pending).remove(&id);
            return Err(CallbackError::Remote { message: err.to_string() });
        }
        match rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(CallbackError::Remote { message }),
            Err(_) => Err(CallbackError::RuntimeGone),
        }
    }
}

/// Callbacks handed to the plugin on connect; they travel back to the host.
struct ServeCallbacks {
    channel: Arc<HostChannel>,
    connection: OnceLock<u32>,
}

#[async_trait]
impl ProviderCallbacks for ServeCallbacks {
    async fn handle(&self, req: CallbackRequest) -> Result<CallbackResponse, CallbackError> {
        let Some(&connection) = self.connection.get() else {
            return Err(CallbackError::Remote {
                message: "connection is not established yet".to_string(),
            });
        };
        self.channel.call(connection, req).await
    }
}

/// Serves `plugin` over the process's stdin and stdout until shutdown or EOF.
pub async fn serve(provider: &str, plugin: Arc<dyn ProviderPlugin>) -> Result<(), TransportError> {
    serve_io(provider, plugin, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serves `plugin` over any stream pair.
pub async fn serve_io<R, W>(provider: &str, plugin: Arc<dyn ProviderPlugin>, reader: R, writer: W) -> Result<(), TransportError>
where
    R: AsyncBufRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let channel = Arc::new(HostChannel {
        writer: FrameWriter::new("host", writer),
        pending: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(1),
    });
    channel
        .writer
        .send(&Frame::Hello {
            protocol_version: PROTOCOL_VERSION,
            provider: provider.to_string(),
        })
        .await?;

    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => return Err(TransportError::unavailable("host", err.to_string())),
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode(&line) {
            Ok(Frame::Request {
                id,
                request: PluginRequest::Shutdown,
            }) => {
                let result = plugin
                    .shutdown()
                    .await
                    .map(|_| PluginResponse::Shutdown)
                    .map_err(|e| e.to_string());
                channel.writer.send(&Frame::Response { id, result }).await?;
                debug!(provider = %provider, "shutdown requested, leaving serve loop");
                break;
            }
            Ok(Frame::Request { id, request }) => {
                let plugin = plugin.clone();
                let channel = channel.clone();
                tokio::spawn(async move {
                    let result = dispatch(plugin.as_ref(), &channel, request).await.map_err(|e| e.to_string());
                    if let Err(err) = channel.writer.send(&Frame::Response { id, result }).await {
                        warn!(error = %err, "failed to send response");
                    }
                });
            }
            Ok(Frame::CallbackResult { id, result }) => match lock(&channel.pending).remove(&id) {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => warn!(id, "callback result for unknown callback"),
            },
            Ok(other) => warn!(frame = ?other, "unexpected frame from host"),
            Err(err) => warn!(error = %err, "dropping malformed frame"),
        }
    }

    // Unblock plugin tasks still waiting on callbacks.
    lock(&channel.pending).clear();
    Ok(())
}

async fn dispatch(plugin: &dyn ProviderPlugin, channel: &Arc<HostChannel>, request: PluginRequest) -> Result<PluginResponse, TransportError> {
    match request {
        PluginRequest::Schema => plugin.schema().await.map(PluginResponse::Schema),
        PluginRequest::Connect(req) => {
            let callbacks = Arc::new(ServeCallbacks {
                channel: channel.clone(),
                connection: OnceLock::new(),
            });
            let resp = plugin.connect(req, callbacks.clone()).await?;
            let _ = callbacks.connection.set(resp.id);
            Ok(PluginResponse::Connect(resp))
        }
        PluginRequest::GetData(req) => plugin.get_data(req).await.map(PluginResponse::Data),
        PluginRequest::StoreData(req) => plugin.store_data(req).await.map(PluginResponse::Stored),
        PluginRequest::Disconnect { connection } => plugin.disconnect(connection).await.map(|_| PluginResponse::Disconnected),
        PluginRequest::Shutdown => plugin.shutdown().await.map(|_| PluginResponse::Shutdown),
    }
}
