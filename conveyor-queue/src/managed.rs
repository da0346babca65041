//! Host-owned queues shared with role processes over IPC
//!
//! The host registers one [`LocalQueue`] per pipeline queue in a
//! [`QueueManager`] and serves them on a loopback port. Inside a child, a
//! [`ManagedQueue`] forwards `put`/`get`/`size` through a [`ManagerClient`],
//! so every role sees the ordinary [`WorkQueue`] contract.

use async_trait::async_trait;
use conveyor_ipc::{
    IpcError, IpcTransport, MessageEnvelope, QueueCall, QueueReply, QueueRequest, QueueResponse,
    TcpTransport,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::local::LocalQueue;
use crate::queue::{Wait, WorkQueue};

/// Registry of the host's shared queues
#[derive(Clone, Default)]
pub struct QueueManager {
    queues: Arc<RwLock<HashMap<String, Arc<LocalQueue<JsonValue>>>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the named queue if absent and return it
    pub fn register(&self, name: &str) -> Arc<LocalQueue<JsonValue>> {
        let mut queues = match self.queues.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalQueue::new(name)))
            .clone()
    }

    pub fn queue(&self, name: &str) -> Option<Arc<LocalQueue<JsonValue>>> {
        let queues = match self.queues.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queues.get(name).cloned()
    }

    /// Depth of a registered queue, `None` if it is not registered
    pub async fn depth(&self, name: &str) -> Option<usize> {
        match self.queue(name) {
            Some(queue) => queue.size().await.ok(),
            None => None,
        }
    }

    /// Accept children on an ephemeral loopback port
    ///
    /// Each connection gets its own serve task, so a `get` that waits forever
    /// parks only its own child. Dropping the returned [`ManagerServer`]
    /// stops accepting and aborts every connection task.
    pub async fn listen(&self) -> QueueResult<ManagerServer> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(IpcError::from)?;
        let addr = listener.local_addr().map_err(IpcError::from)?;
        debug!(%addr, "queue manager listening");

        let manager = self.clone();
        let accept_task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "queue manager stopped accepting");
                        break;
                    }
                };

                let manager = manager.clone();
                connections.spawn(async move {
                    let mut transport = TcpTransport::from_stream(stream);
                    if let Err(e) = manager.serve(&mut transport).await {
                        debug!(%peer, error = %e, "queue client connection ended");
                    }
                });

                // Reap finished connections
                while connections.try_join_next().is_some() {}
            }
        });

        Ok(ManagerServer { addr, accept_task })
    }

    /// Answer one child's calls until it closes its end
    pub async fn serve<X: IpcTransport>(&self, transport: &mut X) -> QueueResult<()> {
        loop {
            let envelope: MessageEnvelope<QueueCall> = match transport.receive().await {
                Ok(envelope) => envelope,
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "queue client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let call = envelope.message;
            let response = self.dispatch(&call.request).await;
            let reply = QueueReply::to(&call, response);
            transport.send(&MessageEnvelope::new(reply)).await?;
        }
    }

    async fn dispatch(&self, request: &QueueRequest) -> QueueResponse {
        let Some(queue) = self.queue(request.queue()) else {
            warn!(queue = request.queue(), "request for unregistered queue");
            return QueueResponse::Error {
                message: QueueError::UnknownQueue(request.queue().to_string()).to_string(),
            };
        };

        let outcome = match request {
            QueueRequest::Put { item, .. } => queue.put(item.clone()).await.map(|_| QueueResponse::Ack),
            QueueRequest::Get { timeout_ms, .. } => {
                let wait = match timeout_ms {
                    None => Wait::Forever,
                    Some(ms) => Wait::from(Duration::from_millis(*ms)),
                };
                queue.get(wait).await.map(|item| QueueResponse::Item { item })
            }
            QueueRequest::Size { .. } => queue.size().await.map(|size| QueueResponse::Size { size }),
        };

        outcome.unwrap_or_else(|e| QueueResponse::Error {
            message: e.to_string(),
        })
    }
}

/// A running [`QueueManager::listen`] endpoint
pub struct ManagerServer {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ManagerServer {
    /// Address children connect to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ManagerServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Child-side connection to the host's [`QueueManager`]
pub struct ManagerClient<X = TcpTransport> {
    transport: Arc<Mutex<X>>,
}

impl<X> Clone for ManagerClient<X> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl ManagerClient<TcpTransport> {
    /// Connect to a host's [`ManagerServer`]
    pub async fn connect(addr: SocketAddr) -> QueueResult<Self> {
        Ok(Self::new(TcpTransport::connect(addr).await?))
    }
}

impl<X: IpcTransport> ManagerClient<X> {
    pub fn new(transport: X) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    /// One request/reply exchange; calls are serialized on the transport
    pub async fn call(&self, request: QueueRequest) -> QueueResult<QueueResponse> {
        let call = QueueCall::new(request);
        let mut transport = self.transport.lock().await;

        transport.send(&MessageEnvelope::new(call.clone())).await?;
        let reply: MessageEnvelope<QueueReply> = transport.receive().await?;

        if reply.message.correlation_id != call.correlation_id {
            return Err(IpcError::CorrelationMismatch {
                expected: call.correlation_id.to_string(),
                actual: reply.message.correlation_id.to_string(),
            }
            .into());
        }

        match reply.message.response {
            QueueResponse::Error { message } => Err(QueueError::Ipc(IpcError::Remote(message))),
            response => Ok(response),
        }
    }

    /// Typed handle on a host queue
    pub fn queue<T>(&self, name: impl Into<String>) -> ManagedQueue<T, X> {
        ManagedQueue {
            name: name.into(),
            client: self.clone(),
            _item: PhantomData,
        }
    }
}

/// Role-process view of a host-owned queue
pub struct ManagedQueue<T, X = TcpTransport> {
    name: String,
    client: ManagerClient<X>,
    _item: PhantomData<fn() -> T>,
}

impl<T, X> ManagedQueue<T, X> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn unexpected(response: QueueResponse) -> QueueError {
    QueueError::Ipc(IpcError::InvalidMessage(format!(
        "unexpected queue response: {:?}",
        response
    )))
}

#[async_trait]
impl<T, X> WorkQueue<T> for ManagedQueue<T, X>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    X: IpcTransport + 'static,
{
    async fn put(&self, item: T) -> QueueResult<()> {
        let item = serde_json::to_value(item)?;
        match self
            .client
            .call(QueueRequest::Put {
                queue: self.name.clone(),
                item,
            })
            .await?
        {
            QueueResponse::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, wait: Wait) -> QueueResult<Option<T>> {
        match self
            .client
            .call(QueueRequest::get(self.name.clone(), wait.as_duration()))
            .await?
        {
            QueueResponse::Item { item: None } => Ok(None),
            QueueResponse::Item { item: Some(value) } => Ok(Some(serde_json::from_value(value)?)),
            other => Err(unexpected(other)),
        }
    }

    async fn size(&self) -> QueueResult<usize> {
        match self
            .client
            .call(QueueRequest::Size {
                queue: self.name.clone(),
            })
            .await?
        {
            QueueResponse::Size { size } => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    /// The host owns the queue; closing a proxy does nothing
    async fn close(&self) -> QueueResult<()> {
        Ok(())
    }

    fn honours_wait(&self) -> bool {
        true
    }
}
