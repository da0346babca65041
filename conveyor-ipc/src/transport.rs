//! IPC transport implementations
//!
//! Frames are newline-delimited JSON [`MessageEnvelope`]s. Role processes
//! reach their host's queue manager through a [`TcpTransport`] on the
//! loopback interface, which leaves the child's stdout free for its sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send + Sync {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Write one envelope as a single line and flush it
pub async fn write_frame<W, T>(writer: &mut W, message: &MessageEnvelope<T>) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Send + Sync,
{
    let json = serde_json::to_string(message)
        .map_err(|e| IpcError::SerializationError(e.to_string()))?;

    // Send with newline delimiter
    let message_with_newline = format!("{}\n", json);
    writer
        .write_all(message_with_newline.as_bytes())
        .await
        .map_err(|e| IpcError::IoError(e.to_string()))?;

    writer
        .flush()
        .await
        .map_err(|e| IpcError::IoError(e.to_string()))?;

    Ok(())
}

/// Read one line and decode it as an envelope of the current protocol version
pub async fn read_frame<R, T>(reader: &mut R) -> Result<MessageEnvelope<T>, IpcError>
where
    R: AsyncBufRead + Unpin + Send,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| IpcError::IoError(e.to_string()))?;

    if line.is_empty() {
        return Err(IpcError::ConnectionClosed);
    }

    // Remove newline
    line.truncate(line.trim_end().len());

    let envelope: MessageEnvelope<T> = serde_json::from_str(&line)
        .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

    // Check protocol version compatibility
    if !envelope.is_compatible() {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: envelope.protocol_version,
        });
    }

    Ok(envelope)
}

/// Line-delimited JSON transport over any reader/writer pair
///
/// Buffered input is kept across calls, so frames that arrive back to back
/// are never dropped.
pub struct StreamTransport<R, W> {
    reader: Option<BufReader<R>>,
    writer: Option<W>,
}

/// Loopback connection between a role process and its host
pub type TcpTransport = StreamTransport<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    /// Create a transport from a reader and a writer
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            writer: Some(writer),
        }
    }
}

impl TcpTransport {
    /// Connect to a host listening at `addr`
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, IpcError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted or connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

#[async_trait]
impl<R, W> IpcTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IpcError::IoError("writer already closed".to_string()))?;

        write_frame(writer, message).await
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| IpcError::IoError("reader already closed".to_string()))?;

        read_frame(reader).await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Take ownership and drop to close
        let _ = self.writer.take();
        let _ = self.reader.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{QueueCall, QueueRequest};

    #[tokio::test]
    async fn test_frames_survive_back_to_back_writes() {
        let (mut writer, server) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(server);

        for name in ["a", "b"] {
            let call = QueueCall::new(QueueRequest::Size {
                queue: name.to_string(),
            });
            write_frame(&mut writer, &MessageEnvelope::new(call)).await.unwrap();
        }

        let first: MessageEnvelope<QueueCall> = read_frame(&mut reader).await.unwrap();
        let second: MessageEnvelope<QueueCall> = read_frame(&mut reader).await.unwrap();
        assert_eq!(first.message.request.queue(), "a");
        assert_eq!(second.message.request.queue(), "b");
    }

    #[tokio::test]
    async fn test_stream_transport_request_reply() {
        let (host_end, child_end) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_end);
        let (child_read, child_write) = tokio::io::split(child_end);
        let mut host = StreamTransport::new(host_read, host_write);
        let mut child = StreamTransport::new(child_read, child_write);

        let call = QueueCall::new(QueueRequest::Size {
            queue: "processing".to_string(),
        });
        child.send(&MessageEnvelope::new(call.clone())).await.unwrap();

        let received: MessageEnvelope<QueueCall> = host.receive().await.unwrap();
        assert_eq!(received.message.correlation_id, call.correlation_id);

        host.close().await.unwrap();
        let after_close: Result<MessageEnvelope<QueueCall>, _> = host.receive().await;
        assert!(matches!(after_close, Err(IpcError::IoError(_))));
    }

    #[tokio::test]
    async fn test_closed_stream_reports_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = BufReader::new(server);

        let result: Result<MessageEnvelope<QueueCall>, _> = read_frame(&mut reader).await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut envelope = MessageEnvelope::new(QueueCall::new(QueueRequest::Size {
            queue: "q".to_string(),
        }));
        envelope.protocol_version = IPC_PROTOCOL_VERSION + 1;
        write_frame(&mut client, &envelope).await.unwrap();

        let mut reader = BufReader::new(server);
        let result: Result<MessageEnvelope<QueueCall>, _> = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(IpcError::ProtocolVersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_tcp_transport_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = TcpTransport::from_stream(stream);
            let call: MessageEnvelope<QueueCall> = transport.receive().await.unwrap();
            call.message.request.queue().to_string()
        });

        let mut child = TcpTransport::connect(addr).await.unwrap();
        let call = QueueCall::new(QueueRequest::Size {
            queue: "output".to_string(),
        });
        child.send(&MessageEnvelope::new(call)).await.unwrap();

        assert_eq!(host.await.unwrap(), "output");
    }
}
