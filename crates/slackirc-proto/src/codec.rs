//! `tokio-util` codecs for IRC lines and messages.
//!
//! [`LineCodec`] never fails on content: an over-long line is dropped whole
//! and invalid UTF-8 is replaced, so a misbehaving client cannot tear its own
//! connection down by sending junk. Only I/O surfaces as an error.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{self, ProtocolError};
use crate::message::Message;

/// Default ceiling on an incoming line, terminator included.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Newline-delimited text lines.
#[derive(Debug)]
pub struct LineCodec {
    /// Index of the next byte to scan for `\n`.
    next_index: usize,
    max_len: usize,
    /// Inside an over-long line; drop bytes up to the next `\n`.
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE)
    }
}

impl LineCodec {
    /// Codec with the default line ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with a custom line ceiling.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
            discarding: false,
        }
    }

    /// Cut `data` at its first line ending and refuse NUL, so one logical
    /// message can never become two on the wire.
    pub fn sanitize(mut data: String) -> error::Result<String> {
        if let Some(pos) = data.find(&['\r', '\n'][..]) {
            data.truncate(pos);
        }
        if data.contains('\0') {
            return Err(ProtocolError::IllegalControlChar('\0'));
        }
        data.push_str("\r\n");
        Ok(data)
    }

    fn to_text(raw: &[u8]) -> String {
        let end = raw
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |p| p + 1);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if self.discarding {
                    src.clear();
                    self.next_index = 0;
                } else if src.len() > self.max_len {
                    self.discarding = true;
                    src.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            if std::mem::take(&mut self.discarding) || line.len() > self.max_len {
                continue;
            }
            let text = Self::to_text(&line);
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        let rest = src.split();
        self.next_index = 0;
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return Ok(None);
        }
        let text = Self::to_text(&rest);
        Ok((!text.is_empty()).then_some(text))
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> error::Result<()> {
        let line = Self::sanitize(line)?;
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

/// [`Message`] codec. Lines that do not parse are skipped.
#[derive(Debug, Default)]
pub struct IrcCodec {
    inner: LineCodec,
}

impl IrcCodec {
    /// Codec with the default line ceiling.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Message>> {
        while let Some(line) = self.inner.decode(src)? {
            if let Ok(msg) = line.parse::<Message>() {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> error::Result<()> {
        self.inner.encode(msg.to_string(), dst)
    }
}
