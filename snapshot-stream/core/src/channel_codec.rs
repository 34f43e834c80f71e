use crate::channel_message::{ChannelMessage, MARKER_KEY, MARKER_VALUE};
use crate::error::FrameError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Width of the ASCII length prefix in front of every payload
pub const LENGTH_PREFIX_WIDTH: usize = 10;

pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Frames a [`ChannelMessage`] as `<length:10 ascii, left-justified><key>,<value>,<senderId>`
///
/// The decoder keeps bytes buffered until a whole frame is available, so a
/// channel can be read as a plain byte stream through `FramedRead`.
#[derive(Debug, Clone)]
pub struct ChannelCodec {
    max_frame_length: usize,
}

impl ChannelCodec {
    pub fn new() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for ChannelCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the fixed-width prefix into the number of payload bytes that follow
///
/// Only the encoder's layout is accepted: decimal digits, then space padding.
pub fn parse_length_prefix(prefix: &[u8]) -> Result<usize, FrameError> {
    let text = std::str::from_utf8(prefix)
        .map_err(|_| FrameError::Malformed("length prefix is not ASCII".to_string()))?;
    let digits = text.trim_end_matches(' ');
    if digits.is_empty() {
        return Err(FrameError::Malformed("empty length prefix".to_string()));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::Malformed(format!(
            "invalid length prefix '{}'",
            text
        )));
    }
    digits
        .parse::<usize>()
        .map_err(|_| FrameError::Malformed(format!("invalid length prefix '{}'", digits)))
}

/// Renders the comma-separated payload of a frame, rejecting messages that
/// would not survive a round trip
pub fn encode_payload(message: &ChannelMessage) -> Result<String, FrameError> {
    match message {
        ChannelMessage::Update {
            key,
            value,
            sender_id,
        } => {
            if *value == MARKER_VALUE {
                return Err(FrameError::Malformed(format!(
                    "update for '{}' uses the reserved marker value",
                    key
                )));
            }
            check_field("key", key)?;
            check_sender(sender_id)?;
            Ok(format!("{},{},{}", key, value, sender_id))
        }
        ChannelMessage::Marker { sender_id } => {
            check_sender(sender_id)?;
            Ok(format!("{},{},{}", MARKER_KEY, MARKER_VALUE, sender_id))
        }
    }
}

/// Parses a payload; a value of `-1` always yields a marker whatever the key says
pub fn decode_payload(payload: &[u8]) -> Result<ChannelMessage, FrameError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| FrameError::Malformed("payload is not valid UTF-8".to_string()))?;
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() != 3 {
        return Err(FrameError::Malformed(format!(
            "expected 3 comma-separated fields, found {}",
            fields.len()
        )));
    }

    let value: i64 = fields[1]
        .parse()
        .ok()
        .filter(|v: &i64| v.to_string() == fields[1])
        .ok_or_else(|| FrameError::Malformed(format!("invalid value '{}'", fields[1])))?;
    let sender_id = fields[2];
    if sender_id.is_empty() {
        return Err(FrameError::Malformed("empty sender id".to_string()));
    }

    if value == MARKER_VALUE {
        Ok(ChannelMessage::marker(sender_id))
    } else {
        Ok(ChannelMessage::update(fields[0], value, sender_id))
    }
}

fn check_field(name: &str, field: &str) -> Result<(), FrameError> {
    if field.contains(',') {
        return Err(FrameError::Malformed(format!(
            "{} '{}' contains the field separator",
            name, field
        )));
    }
    Ok(())
}

fn check_sender(sender_id: &str) -> Result<(), FrameError> {
    if sender_id.is_empty() {
        return Err(FrameError::Malformed("empty sender id".to_string()));
    }
    check_field("sender id", sender_id)
}

impl Encoder<ChannelMessage> for ChannelCodec {
    type Error = FrameError;

    fn encode(&mut self, message: ChannelMessage, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = encode_payload(&message)?;
        if payload.len() > self.max_frame_length {
            return Err(FrameError::Malformed(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.max_frame_length
            )));
        }

        dst.reserve(LENGTH_PREFIX_WIDTH + payload.len());
        let prefix = format!("{:<width$}", payload.len(), width = LENGTH_PREFIX_WIDTH);
        dst.put_slice(prefix.as_bytes());
        dst.put_slice(payload.as_bytes());
        Ok(())
    }
}

impl Decoder for ChannelCodec {
    type Item = ChannelMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChannelMessage>, FrameError> {
        if src.len() < LENGTH_PREFIX_WIDTH {
            src.reserve(LENGTH_PREFIX_WIDTH - src.len());
            return Ok(None);
        }

        let length = parse_length_prefix(&src[..LENGTH_PREFIX_WIDTH])?;
        if length > self.max_frame_length {
            return Err(FrameError::Malformed(format!(
                "declared length {} exceeds the {} byte limit",
                length, self.max_frame_length
            )));
        }

        let frame_length = LENGTH_PREFIX_WIDTH + length;
        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_WIDTH);
        let payload = src.split_to(length);
        decode_payload(&payload).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ChannelMessage>, FrameError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Malformed(format!(
                "channel closed in the middle of a frame ({} bytes pending)",
                src.len()
            ))),
        }
    }
}
