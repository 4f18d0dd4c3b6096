//! Length-prefixed framing over a duplex byte stream.
//!
//! Frame layout: `[length: u32-le][body: length bytes]`.
//!
//! # Security
//! The declared length is checked against the frame limit before the body
//! buffer is allocated, so a hostile peer cannot make the helper reserve
//! memory it never intends to fill.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{Message, MessageCodec, ProtocolError, FRAME_HEADER_LEN};

/// A framed, message-oriented view of one connection.
pub struct FramedTransport<S> {
    stream: S,
    codec: MessageCodec,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: MessageCodec) -> Self {
        Self { stream, codec }
    }

    pub fn codec(&self) -> MessageCodec {
        self.codec
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Write one frame containing `body`.
    pub async fn send(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        self.codec.check_body_len(body.len())?;
        let len = u32::try_from(body.len()).map_err(|_| ProtocolError::MessageTooLarge {
            size: body.len().saturating_add(FRAME_HEADER_LEN),
            max: self.codec.max_message_size(),
        })?;

        // Single write for header + body so a frame is never interleaved
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next complete frame body.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame boundary.
    /// A close inside a frame is a transport error.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let n = self.stream.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside frame header",
                )));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        self.codec.check_body_len(len)?;

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let body = self.codec.encode(message)?;
        self.send(&body).await
    }

    pub async fn receive_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.receive().await? {
            Some(body) => self.codec.decode(&body).map(Some),
            None => Ok(None),
        }
    }
}
