//! The line-delimited JSON framing shared by every connection in the
//! protocol: one JSON object per line, newline-terminated, UTF-8.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line too long")]
    LineTooLong,
}

impl From<LinesCodecError> for CodecError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong,
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }
}

/// What reading one line off the wire produced.
///
/// A line that isn't valid JSON is **not** a connection error (§4.1): the
/// line is dropped and the caller should read again. Everything downstream
/// of `Message` (classification, missing required fields) is the caller's
/// concern, not the codec's.
pub enum ReadOutcome {
    Message(Value),
    GarbageLine,
    Closed,
}

/// A framed connection, one JSON value in or out per line.
pub struct MessageStream {
    inner: Framed<TcpStream, LinesCodec>,
}

/// Matches the original's unbounded `readline()`; a 1 MiB ceiling keeps a
/// hostile peer from parking a connection on an unterminated line forever.
const MAX_LINE_BYTES: usize = 1024 * 1024;

impl MessageStream {
    pub fn new(socket: TcpStream) -> Self {
        MessageStream {
            inner: Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        }
    }

    pub async fn read_message(&mut self) -> Result<ReadOutcome, CodecError> {
        match self.inner.next().await {
            None => Ok(ReadOutcome::Closed),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(line)) => match serde_json::from_str::<Value>(&line) {
                Ok(value) => Ok(ReadOutcome::Message(value)),
                Err(_) => Ok(ReadOutcome::GarbageLine),
            },
        }
    }

    pub async fn write_message(&mut self, value: &Value) -> Result<(), CodecError> {
        let line = serde_json::to_string(value).expect("serde_json::Value always serializes");
        self.inner.send(line).await?;
        Ok(())
    }
}
