// src/core/monitor/protocol.rs

//! The frame structure of the monitor protocol and the corresponding
//! `Encoder`/`Decoder` pair for network communication.
//!
//! A remote procedure call is an array of bulk strings `[proc, arg, ...]`.
//! The monitor answers with result rows (arrays), a simple string for
//! procedures without a result, or an error frame whose text starts with a
//! five-character class code. Notifications are pushed asynchronously as
//! `["notify", channel, payload]` arrays on a connection that issued `listen`.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::errors::KeeperError;

/// The CRLF sequence terminating every protocol line.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits. The monitor never sends rows anywhere near these
// sizes; anything larger is a malformed or hostile peer.
const MAX_FRAME_ELEMENTS: usize = 1024;
const MAX_BULK_STRING_SIZE: usize = 1024 * 1024;

/// A single frame exchanged with the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Builds a procedure-call frame from a name and its arguments.
    pub fn call<I>(proc: &str, args: I) -> Frame
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut parts = vec![Frame::BulkString(Bytes::copy_from_slice(proc.as_bytes()))];
        parts.extend(args);
        Frame::Array(parts)
    }

    /// A bulk string from anything string-like.
    pub fn bulk(s: impl AsRef<str>) -> Frame {
        Frame::BulkString(Bytes::copy_from_slice(s.as_ref().as_bytes()))
    }

    /// Reads this frame as UTF-8 text, accepting both string flavors.
    pub fn as_text(&self) -> Result<String, KeeperError> {
        match self {
            Frame::SimpleString(s) => Ok(s.clone()),
            Frame::BulkString(b) => Ok(std::str::from_utf8(b)?.to_string()),
            other => Err(KeeperError::Protocol(format!(
                "expected a string frame, got {other:?}"
            ))),
        }
    }

    /// Reads this frame as a signed integer, accepting textual digits too.
    pub fn as_integer(&self) -> Result<i64, KeeperError> {
        match self {
            Frame::Integer(i) => Ok(*i),
            Frame::BulkString(b) => std::str::from_utf8(b)?
                .trim()
                .parse()
                .map_err(|e| KeeperError::Protocol(format!("bad integer frame: {e}"))),
            other => Err(KeeperError::Protocol(format!(
                "expected an integer frame, got {other:?}"
            ))),
        }
    }

    /// Reads this frame as a boolean (`t`/`f` or 0/1).
    pub fn as_bool(&self) -> Result<bool, KeeperError> {
        match self {
            Frame::Integer(i) => Ok(*i != 0),
            Frame::SimpleString(_) | Frame::BulkString(_) => match self.as_text()?.as_str() {
                "t" | "true" | "1" => Ok(true),
                "f" | "false" | "0" => Ok(false),
                other => Err(KeeperError::Protocol(format!("bad boolean frame: {other}"))),
            },
            other => Err(KeeperError::Protocol(format!(
                "expected a boolean frame, got {other:?}"
            ))),
        }
    }
}

/// Splits a monitor error frame into its class code and message. The code is
/// the leading five characters when they look like a class code; otherwise
/// the whole text is the message and the code is `XX000` (internal).
pub fn split_error_frame(text: &str) -> (String, String) {
    let mut parts = text.splitn(2, ' ');
    let first = parts.next().unwrap_or_default();
    if first.len() == 5 && first.chars().all(|c| c.is_ascii_alphanumeric()) {
        (
            first.to_string(),
            parts.next().unwrap_or_default().to_string(),
        )
    } else {
        ("XX000".to_string(), text.to_string())
    }
}

/// A `tokio_util::codec` implementation for `Frame`s.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = KeeperError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            Frame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            Frame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = KeeperError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match parse_frame(src)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

/// Parses one frame from the start of `buf`, returning it together with the
/// number of bytes consumed, or `None` when the buffer is incomplete.
fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, KeeperError> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let line = &buf[1..1 + line_end];
    let header_len = 1 + line_end + CRLF_LEN;

    match tag {
        b'+' => {
            let s = std::str::from_utf8(line)?.to_string();
            Ok(Some((Frame::SimpleString(s), header_len)))
        }
        b'-' => {
            let s = std::str::from_utf8(line)?.to_string();
            Ok(Some((Frame::Error(s), header_len)))
        }
        b':' => {
            let i = parse_decimal(line)?;
            Ok(Some((Frame::Integer(i), header_len)))
        }
        b'$' => {
            let len = parse_decimal(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, header_len)));
            }
            let len = usize::try_from(len)
                .map_err(|_| KeeperError::Protocol("negative bulk length".into()))?;
            if len > MAX_BULK_STRING_SIZE {
                return Err(KeeperError::Protocol(format!(
                    "bulk string of {len} bytes exceeds the protocol limit"
                )));
            }
            let total = header_len + len + CRLF_LEN;
            if buf.len() < total {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
            if &buf[header_len + len..total] != CRLF {
                return Err(KeeperError::Protocol(
                    "bulk string is not CRLF-terminated".into(),
                ));
            }
            Ok(Some((Frame::BulkString(data), total)))
        }
        b'*' => {
            let count = parse_decimal(line)?;
            if count == -1 {
                return Ok(Some((Frame::Null, header_len)));
            }
            let count = usize::try_from(count)
                .map_err(|_| KeeperError::Protocol("negative array length".into()))?;
            if count > MAX_FRAME_ELEMENTS {
                return Err(KeeperError::Protocol(format!(
                    "array of {count} elements exceeds the protocol limit"
                )));
            }
            let mut elements = Vec::with_capacity(count);
            let mut offset = header_len;
            for _ in 0..count {
                match parse_frame(&buf[offset..])? {
                    Some((frame, consumed)) => {
                        elements.push(frame);
                        offset += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Frame::Array(elements), offset)))
        }
        other => Err(KeeperError::Protocol(format!(
            "unknown frame tag byte 0x{other:02x}"
        ))),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF_LEN).position(|w| w == CRLF)
}

fn parse_decimal(line: &[u8]) -> Result<i64, KeeperError> {
    std::str::from_utf8(line)?
        .parse()
        .map_err(|e| KeeperError::Protocol(format!("bad length header: {e}")))
}
