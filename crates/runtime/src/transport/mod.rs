//! Byte-level transport between the embedded runtime and its host.
//!
//! A transport moves whole JSON messages in both directions:
//!
//! - [`Transport`] writes one message toward the host
//! - [`TransportReceiver`] reads messages from the host and forwards them into
//!   an unbounded channel consumed by the [`MessageBus`](crate::MessageBus)
//!
//! [`PipeTransport`] works over any `AsyncRead`/`AsyncWrite` pair (stdio,
//! sockets, duplex pipes in tests). [`channel_transport`] pairs the runtime
//! with an in-process [`HostEndpoint`].


use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest frame accepted from the host.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// How messages are delimited on a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
	/// `u32` little-endian length followed by the JSON bytes.
	#[default]
	LengthPrefixed,
	/// One JSON document per line.
	JsonLines,
}

/// Sending half of a transport.
pub trait Transport: Send {
	/// Writes one message toward the host.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the host closes the stream, forwarding each decoded message.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Everything the bus needs from a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Writer half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
	framing: Framing,
}

/// Reader half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	framing: Framing,
	message_tx: mpsc::UnboundedSender<Value>,
}

/// Transport over an async byte stream pair.
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a length-prefixed transport and the channel its reader feeds.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		Self::with_framing(writer, reader, Framing::LengthPrefixed)
	}

	pub fn with_framing(writer: W, reader: R, framing: Framing) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender { writer, framing },
			receiver: PipeTransportReceiver {
				reader,
				framing,
				message_tx,
			},
		};
		(transport, message_rx)
	}

	/// Writes one framed message.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.sender.writer, self.sender.framing, &message).await
	}

	/// Runs the read loop until end of stream.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.receiver.reader, self.receiver.framing, &self.receiver.message_tx).await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(self.sender, self.receiver)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { write_frame(&mut self.writer, self.framing, &message).await })
	}
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		let PipeTransportReceiver {
			mut reader,
			framing,
			message_tx,
		} = *self;
		Box::pin(async move { read_frames(&mut reader, framing, &message_tx).await })
	}
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, framing: Framing, message: &Value) -> Result<()> {
	let bytes = serde_json::to_vec(message)?;
	match framing {
		Framing::LengthPrefixed => {
			let length = u32::try_from(bytes.len())
				.map_err(|_| Error::Transport(format!("message of {} bytes is too large to frame", bytes.len())))?;
			writer.write_all(&length.to_le_bytes()).await?;
			writer.write_all(&bytes).await?;
		}
		Framing::JsonLines => {
			writer.write_all(&bytes).await?;
			writer.write_all(b"\n").await?;
		}
	}
	writer.flush().await?;
	Ok(())
}

async fn read_frames<R: AsyncRead + Unpin>(
	reader: &mut R,
	framing: Framing,
	message_tx: &mpsc::UnboundedSender<Value>,
) -> Result<()> {
	let mut reader = BufReader::new(reader);
	match framing {
		Framing::LengthPrefixed => loop {
			let mut len_buf = [0u8; 4];
			match reader.read_exact(&mut len_buf).await {
				Ok(_) => {}
				Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
				Err(e) => return Err(e.into()),
			}

			let length = u32::from_le_bytes(len_buf) as usize;
			if length > MAX_FRAME_BYTES {
				return Err(Error::Transport(format!(
					"frame of {length} bytes exceeds limit of {MAX_FRAME_BYTES}"
				)));
			}

			let mut buf = vec![0u8; length];
			reader.read_exact(&mut buf).await?;
			if !forward(message_tx, &buf) {
				return Ok(());
			}
		},
		Framing::JsonLines => {
			let mut lines = reader.lines();
			while let Some(line) = lines.next_line().await? {
				if line.trim().is_empty() {
					continue;
				}
				if !forward(message_tx, line.as_bytes()) {
					break;
				}
			}
			Ok(())
		}
	}
}

/// Decodes and forwards one frame. Returns `false` once nobody is listening.
fn forward(message_tx: &mpsc::UnboundedSender<Value>, bytes: &[u8]) -> bool {
	match serde_json::from_slice::<Value>(bytes) {
		Ok(message) => message_tx.send(message).is_ok(),
		Err(e) => {
			tracing::warn!(error = %e, bytes = bytes.len(), "Dropping undecodable frame");
			true
		}
	}
}

/// Host side of an in-process [`channel_transport`].
pub struct HostEndpoint {
	inbound_tx: mpsc::UnboundedSender<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Value>,
}

impl HostEndpoint {
	/// Sends a message to the runtime as if it came from the host page.
	pub fn send(&self, message: Value) -> Result<()> {
		self.inbound_tx.send(message).map_err(|_| Error::ChannelClosed)
	}

	/// Waits for the next message the runtime sent to the host.
	pub async fn recv(&mut self) -> Option<Value> {
		self.outbound_rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<Value> {
		self.outbound_rx.try_recv().ok()
	}
}

struct ChannelSender {
	tx: mpsc::UnboundedSender<Value>,
}

impl Transport for ChannelSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let result = self.tx.send(message).map_err(|_| Error::ChannelClosed);
		Box::pin(async move { result })
	}
}

struct ChannelReceiver;

impl TransportReceiver for ChannelReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async { Ok(()) })
	}
}

/// Creates an in-process transport and the host endpoint on its other side.
pub fn channel_transport() -> (TransportParts, HostEndpoint) {
	let (inbound_tx, message_rx) = mpsc::unbounded_channel();
	let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
	let parts = TransportParts {
		sender: Box::new(ChannelSender { tx: outbound_tx }),
		receiver: Box::new(ChannelReceiver),
		message_rx,
	};
	(parts, HostEndpoint { inbound_tx, outbound_rx })
}
