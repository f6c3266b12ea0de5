//! Duplex frame channels to an app-server.
//!
//! A [`Transport`] moves whole JSON text frames. Three kinds exist:
//!
//! - a spawned `codex app-server` child, newline-delimited JSON over stdio
//! - a websocket, one JSON text message per frame (`websocket` feature)
//! - any caller-supplied `AsyncRead`/`AsyncWrite` pair, treated like stdio
//!
//! The connection splits a transport into its reader and writer halves so the
//! dispatch loop can own the reader while senders share the writer.

use crate::cli::AppServerBuilder;
use crate::error::{Error, Result};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::Child;

#[cfg(feature = "websocket")]
use futures_util::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
#[cfg(feature = "websocket")]
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};

/// Buffer size for reading stdout (10MB).
const STDOUT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(feature = "websocket")]
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Receiving half of a transport. Has a single consumer.
pub enum FrameReader {
    Lines(BufReader<BoxedReader>),
    #[cfg(feature = "websocket")]
    WebSocket(SplitStream<WsStream>),
}

/// Sending half of a transport. Each `send` writes one whole frame.
pub enum FrameWriter {
    Lines(BufWriter<BoxedWriter>),
    #[cfg(feature = "websocket")]
    WebSocket(SplitSink<WsStream, Message>),
}

impl FrameReader {
    /// The next non-empty frame, or `None` once the peer has closed.
    pub async fn receive(&mut self) -> Result<Option<String>> {
        match self {
            FrameReader::Lines(reader) => {
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    let bytes_read = reader
                        .read_until(b'\n', &mut buf)
                        .await
                        .map_err(|e| Error::Transport(format!("read failed: {}", e)))?;

                    if bytes_read == 0 {
                        debug!("[TRANSPORT] Stream closed (EOF)");
                        return Ok(None);
                    }

                    // A garbled line costs that frame only.
                    let line = match std::str::from_utf8(&buf) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("[TRANSPORT] Skipping frame that is not UTF-8: {}", e);
                            continue;
                        }
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Ok(Some(trimmed.to_string()));
                }
            }
            #[cfg(feature = "websocket")]
            FrameReader::WebSocket(stream) => loop {
                match stream.next().await {
                    None => return Ok(None),
                    Some(Ok(Message::Text(text))) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        return Ok(Some(text));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("[TRANSPORT] Websocket closed by server: {:?}", frame);
                        return Ok(None);
                    }
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(Error::Transport(format!("websocket read failed: {}", e)))
                    }
                }
            },
        }
    }
}

impl FrameWriter {
    pub async fn send(&mut self, frame: &str) -> Result<()> {
        match self {
            FrameWriter::Lines(writer) => {
                let io_err = |e: std::io::Error| Error::Transport(format!("write failed: {}", e));
                writer.write_all(frame.as_bytes()).await.map_err(io_err)?;
                writer.write_all(b"\n").await.map_err(io_err)?;
                writer.flush().await.map_err(io_err)?;
                Ok(())
            }
            #[cfg(feature = "websocket")]
            FrameWriter::WebSocket(sink) => sink
                .send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| Error::Transport(format!("websocket write failed: {}", e))),
        }
    }

    /// Close the sending direction. Closing twice is harmless.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            FrameWriter::Lines(writer) => writer
                .shutdown()
                .await
                .map_err(|e| Error::Transport(format!("close failed: {}", e))),
            #[cfg(feature = "websocket")]
            FrameWriter::WebSocket(sink) => match sink.close().await {
                Ok(()) => Ok(()),
                Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
                | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(e) => Err(Error::Transport(format!("websocket close failed: {}", e))),
            },
        }
    }
}

/// A duplex frame channel plus the child process behind it, if any.
pub struct Transport {
    reader: FrameReader,
    writer: FrameWriter,
    process: Option<Child>,
}

impl Transport {
    /// Spawn an app-server and talk to it over its stdio.
    ///
    /// Must be called from within a tokio runtime. The child's stderr is
    /// forwarded to the debug log.
    pub fn spawn(builder: &AppServerBuilder) -> Result<Self> {
        let mut child = builder.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[APP-SERVER] {}", line);
                }
            });
        }

        let mut transport = Self::from_io(stdout, stdin);
        transport.process = Some(child);
        Ok(transport)
    }

    /// Wrap any reader/writer pair as a newline-delimited JSON channel.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: FrameReader::Lines(BufReader::with_capacity(
                STDOUT_BUFFER_SIZE,
                Box::new(reader) as BoxedReader,
            )),
            writer: FrameWriter::Lines(BufWriter::new(Box::new(writer) as BoxedWriter)),
            process: None,
        }
    }

    /// Connect to a websocket app-server, sending `token` as a bearer token.
    #[cfg(feature = "websocket")]
    pub async fn websocket(url: &str, token: Option<&str>) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Transport(format!("invalid websocket url {}: {}", url, e)))?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Transport(format!("invalid bearer token: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        debug!("[TRANSPORT] Connecting to {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect to {} failed: {}", url, e)))?;
        let (sink, stream) = ws.split();

        Ok(Self {
            reader: FrameReader::WebSocket(stream),
            writer: FrameWriter::WebSocket(sink),
            process: None,
        })
    }

    pub async fn send(&mut self, frame: &str) -> Result<()> {
        self.writer.send(frame).await
    }

    pub async fn receive(&mut self) -> Result<Option<String>> {
        self.reader.receive().await
    }

    /// Close the channel and kill the child process, if any.
    pub async fn close(&mut self) -> Result<()> {
        let closed = self.writer.close().await;
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!("[TRANSPORT] Failed to kill app-server: {}", e);
            }
        }
        closed
    }

    /// Process id of the spawned app-server, if this is a stdio transport.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    pub(crate) fn into_parts(self) -> (FrameReader, FrameWriter, Option<Child>) {
        (self.reader, self.writer, self.process)
    }
}
