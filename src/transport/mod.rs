//! Line-oriented byte channel to a single DUT.
//!
//! A [`Transport`] owns the channel and, for spawned simulated DUTs, the
//! child process. It knows nothing about commands beyond the `shutdown`
//! handshake performed by [`Transport::close`].

mod datagram;
mod expect;
mod process;
mod serial;

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub use expect::{LineBuffer, Match, ReadOutcome};
pub use process::DutProcess;
pub use serial::SerialPort;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::mode::TransportMode;
use crate::node::NodeId;

/// Command asking a simulated DUT to exit.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

const RECV_CHUNK: usize = 2048;

/// Completion sentinel terminating every acknowledged response.
pub static DONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Done\r?$").expect("sentinel pattern is valid"));

/// Any in-memory or foreign byte stream usable as a DUT channel.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> ByteStream for T {}

enum Channel {
    Datagram(UdpSocket),
    Serial(SerialPort),
    Stream(Box<dyn ByteStream>),
    Closed,
}

impl Channel {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Channel::Datagram(socket) => loop {
                // Empty datagrams carry nothing; keep waiting.
                let n = socket.recv(buf).await?;
                if n > 0 {
                    return Ok(n);
                }
            },
            // A tty reads 0 once the other end hangs up.
            Channel::Serial(port) => match port.read(buf).await? {
                0 => Err(HarnessError::Closed),
                n => Ok(n),
            },
            Channel::Stream(stream) => match stream.read(buf).await? {
                0 => Err(HarnessError::Closed),
                n => Ok(n),
            },
            Channel::Closed => Err(HarnessError::Closed),
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Channel::Datagram(socket) => {
                socket.send(bytes).await?;
            }
            Channel::Serial(port) => port.write_all(bytes).await?,
            Channel::Stream(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Channel::Closed => return Err(HarnessError::Closed),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Terminated,
}

/// Byte channel to one DUT plus the process behind it, if any.
pub struct Transport {
    node: NodeId,
    channel: Channel,
    process: Option<DutProcess>,
    buffer: LineBuffer,
    state: TransportState,
    echo: bool,
    send_shutdown: bool,
    write_timeout: Duration,
    shutdown_timeout: Duration,
    shutdown_grace: Duration,
}

impl Transport {
    /// Open the channel to `node` as selected by `config.mode`.
    ///
    /// Simulated: spawn the configured DUT program (if any), then connect
    /// to `127.0.0.1:(base_port + node)`. Serial: open the device derived
    /// from the node id.
    pub async fn open(node: NodeId, config: &HarnessConfig) -> Result<Self> {
        match config.mode {
            TransportMode::Simulated => {
                let endpoint = config.endpoint_for(node)?;
                let process = match &config.dut_program {
                    Some(program) => Some(
                        DutProcess::spawn(
                            node,
                            program,
                            &config.dut_args_for(node),
                            config.spawn_delay,
                        )
                        .await?,
                    ),
                    None => None,
                };
                let socket = datagram::connect(node, endpoint, config.connect_window).await?;
                let mut transport = Self::with_channel(node, Channel::Datagram(socket), config);
                transport.process = process;
                transport.send_shutdown = true;
                Ok(transport)
            }
            TransportMode::Serial => {
                let path = config.serial_path_for(node)?;
                let port = SerialPort::open(&path).map_err(|e| HarnessError::TransportOpen {
                    node,
                    reason: format!("open {}: {e}", path.display()),
                })?;
                debug!(%node, path = %path.display(), "opened serial DUT");
                Ok(Self::with_channel(node, Channel::Serial(port), config))
            }
        }
    }

    /// Wrap an already connected stream. Closing it performs the
    /// `shutdown` handshake like a simulated DUT.
    pub fn from_stream(
        node: NodeId,
        stream: impl ByteStream + 'static,
        config: &HarnessConfig,
    ) -> Self {
        let mut transport = Self::with_channel(node, Channel::Stream(Box::new(stream)), config);
        transport.send_shutdown = true;
        transport
    }

    fn with_channel(node: NodeId, channel: Channel, config: &HarnessConfig) -> Self {
        Self {
            node,
            channel,
            process: None,
            buffer: LineBuffer::new(),
            state: TransportState::Connected,
            echo: config.echo,
            send_shutdown: false,
            write_timeout: config.response_timeout,
            shutdown_timeout: config.response_timeout,
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            TransportState::Connected => Ok(()),
            TransportState::Terminated => Err(HarnessError::Closed),
        }
    }

    /// Write `text` followed by a newline.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!(node = %self.node, "> {text}");
        let line = format!("{text}\n");
        match tokio::time::timeout(self.write_timeout, self.channel.send(line.as_bytes())).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write of '{text}' did not complete"),
            ))),
        }
    }

    /// Read until one of `patterns` matches a complete line or `timeout`
    /// elapses.
    pub async fn read_until(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ReadOutcome> {
        self.ensure_connected()?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            if let Some(m) = self.buffer.find(patterns) {
                trace!(node = %self.node, index = m.index, consumed = ?m.consumed, "matched");
                return Ok(ReadOutcome::Matched(m));
            }
            match tokio::time::timeout_at(deadline, self.channel.recv(&mut chunk)).await {
                Ok(Ok(n)) => self.ingest(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let unmatched = self.buffer.take();
                    trace!(node = %self.node, ?unmatched, "read timed out");
                    return Ok(ReadOutcome::TimedOut { unmatched });
                }
            }
        }
    }

    /// Discard anything the DUT sent since the last exchange.
    pub async fn drain(&mut self) -> Result<String> {
        self.ensure_connected()?;
        let mut chunk = [0u8; RECV_CHUNK];
        while let Ok(received) =
            tokio::time::timeout(Duration::ZERO, self.channel.recv(&mut chunk)).await
        {
            let n = received?;
            self.ingest(&chunk[..n]);
        }
        let stale = self.buffer.take();
        if !stale.is_empty() {
            debug!(node = %self.node, ?stale, "discarded stale input");
        }
        Ok(stale)
    }

    fn ingest(&mut self, bytes: &[u8]) {
        trace!(node = %self.node, len = bytes.len(), "received {:?}", String::from_utf8_lossy(bytes));
        for line in self.buffer.push(bytes) {
            if self.echo {
                info!(node = %self.node, "< {line}");
            }
        }
    }

    /// Release the channel and the DUT process.
    ///
    /// Simulated DUTs are asked to `shutdown` first; the process then gets
    /// the grace period to exit before it is killed. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == TransportState::Terminated {
            return Ok(());
        }

        let handshake = if self.send_shutdown {
            self.shutdown_handshake().await
        } else {
            Ok(())
        };
        if let Err(e) = &handshake {
            warn!(node = %self.node, "shutdown not acknowledged: {e}");
        }

        self.state = TransportState::Terminated;
        self.channel = Channel::Closed;
        if let Some(process) = self.process.take() {
            process.finish(self.shutdown_grace).await;
        }
        debug!(node = %self.node, "transport closed");
        handshake
    }

    async fn shutdown_handshake(&mut self) -> Result<()> {
        self.drain().await?;
        self.send_line(SHUTDOWN_COMMAND).await?;
        let sentinel = [DONE.clone()];
        match self.read_until(&sentinel, self.shutdown_timeout).await? {
            ReadOutcome::Matched(_) => Ok(()),
            ReadOutcome::TimedOut { .. } => Err(HarnessError::ResponseTimeout {
                command: SHUTDOWN_COMMAND.to_string(),
                timeout: self.shutdown_timeout,
            }),
        }
    }
}
