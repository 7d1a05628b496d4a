//! Length-prefixed JSON framing for running the script in a separate process.
//!
//! Each frame is a little-endian `u32` byte count followed by a JSON payload. The isolated
//! worker speaks it over stdin/stdout; anything implementing `Read`/`Write` works.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{RenderLink, RenderMessage, ScriptMessage, ScriptTransport};
use crate::error::{EngineError, EngineResult};

const FRAME_LEN_BYTES: usize = 4;
/// Upper bound on a single payload. A readback of the largest allowed region, base64 encoded,
/// fits with room to spare.
pub const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

pub fn send_frame<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: Write,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(to_io_error)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

pub fn recv_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; FRAME_LEN_BYTES];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("frame of {len} bytes exceeds limit")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    serde_json::from_slice(&payload).map_err(to_io_error)
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

fn stream_error(err: io::Error) -> EngineError {
    if is_hangup(&err) {
        EngineError::ChannelClosed
    } else if err.kind() == io::ErrorKind::InvalidData {
        EngineError::Protocol(err.to_string())
    } else {
        EngineError::io(PathBuf::from("<frame stream>"), err)
    }
}

/// Script side of a byte stream pair.
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read, W: Write> ScriptTransport for StreamTransport<R, W> {
    fn send(&mut self, message: ScriptMessage) -> EngineResult<()> {
        send_frame(&mut self.writer, &message).map_err(stream_error)
    }

    fn recv(&mut self) -> EngineResult<RenderMessage> {
        recv_frame(&mut self.reader).map_err(stream_error)
    }
}

/// Render side of a byte stream pair.
pub struct StreamLink<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> StreamLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read, W: Write> RenderLink for StreamLink<R, W> {
    fn recv(&mut self) -> EngineResult<Option<ScriptMessage>> {
        match recv_frame(&mut self.reader) {
            Ok(message) => Ok(Some(message)),
            Err(err) if is_hangup(&err) => Ok(None),
            Err(err) => Err(stream_error(err)),
        }
    }

    fn send(&mut self, message: RenderMessage) -> EngineResult<()> {
        send_frame(&mut self.writer, &message).map_err(stream_error)
    }
}
