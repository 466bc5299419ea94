//! Length-prefixed framing for both connection phases.
//!
//! Startup packets carry no type byte; every later message is one type
//! byte followed by an Int32 length that counts itself but not the type.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::backend::BackendMessage;
use crate::protocol::error::ProtocolError;
use crate::protocol::frontend::{FrontendMessage, StartupMessage};

/// Upper bound for a single frontend message (16 MB) unless configured.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix of a startup packet: the length itself plus the request code.
const MIN_STARTUP_LEN: usize = 8;
/// Length prefix of a typed message with an empty body.
const MIN_MESSAGE_LEN: usize = 4;

/// Splits the next frame off `src`, or returns `None` until it is complete.
///
/// `header` is the number of bytes in front of the length word.
fn split_frame(
    src: &mut BytesMut,
    header: usize,
    min_len: usize,
    max_len: usize,
) -> Result<Option<BytesMut>, ProtocolError> {
    let Some(word) = src.get(header..header + 4) else {
        return Ok(None);
    };
    let declared = i32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| *len >= min_len)
        .ok_or(ProtocolError::InvalidMessage)?;
    if len > max_len {
        return Err(ProtocolError::MessageTooLarge(len));
    }

    let total = header + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    Ok(Some(src.split_to(total)))
}

/// Decodes startup packets until authentication begins.
#[derive(Debug)]
pub struct StartupCodec {
    max_message_size: usize,
}

impl StartupCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Switches to typed framing once the startup packet was accepted.
    /// The size limit carries over.
    pub fn ready(self) -> PostgresCodec {
        PostgresCodec {
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for StartupCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StartupCodec {
    type Item = StartupMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        split_frame(src, 0, MIN_STARTUP_LEN, self.max_message_size)?
            .map(|mut frame| StartupMessage::decode(&mut frame))
            .transpose()
    }
}

/// Decodes [`FrontendMessage`]s and encodes [`BackendMessage`]s after
/// startup, authentication included.
#[derive(Debug)]
pub struct PostgresCodec {
    pub(crate) max_message_size: usize,
}

impl PostgresCodec {
    pub fn new() -> Self {
        StartupCodec::new().ready()
    }
}

impl Default for PostgresCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PostgresCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        split_frame(src, 1, MIN_MESSAGE_LEN, self.max_message_size)?
            .map(|mut frame| FrontendMessage::decode(&mut frame))
            .transpose()
    }
}

impl Encoder<BackendMessage> for PostgresCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn typed(tag: u8, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        buf.put_i32(4 + body.len() as i32);
        buf.put_slice(body);
        buf
    }

    #[test]
    fn test_split_frame_waits_for_whole_message() {
        let full = typed(b'Q', b"SELECT 1\0");
        for cut in [0, 3, 5, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(split_frame(&mut partial, 1, 4, 64).unwrap().is_none(), "cut {cut}");
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn test_split_frame_rejects_bad_lengths() {
        let mut short = BytesMut::from(&[b'S', 0, 0, 0, 3][..]);
        assert!(matches!(
            split_frame(&mut short, 1, 4, 64),
            Err(ProtocolError::InvalidMessage)
        ));

        let mut negative = BytesMut::from(&[b'S', 0xFF, 0xFF, 0xFF, 0xFF][..]);
        assert!(matches!(
            split_frame(&mut negative, 1, 4, 64),
            Err(ProtocolError::InvalidMessage)
        ));

        // A startup packet needs room for its request code.
        let mut startup = BytesMut::from(&[0, 0, 0, 4, 0, 0, 0, 0][..]);
        assert!(matches!(
            StartupCodec::new().decode(&mut startup),
            Err(ProtocolError::InvalidMessage)
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let mut codec = StartupCodec::with_max_message_size(16).ready();
        let mut buf = typed(b'Q', &[b'x'; 32]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MessageTooLarge(36))
        ));
    }

    #[test]
    fn test_decodes_back_to_back_messages() {
        let mut buf = typed(b'S', &[]);
        buf.extend_from_slice(&typed(b'X', &[]));
        let mut codec = PostgresCodec::new();
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Sync)
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Terminate)
        ));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoder_frames_backend_message() {
        let mut buf = BytesMut::new();
        PostgresCodec::new()
            .encode(BackendMessage::ParseComplete, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[b'1', 0, 0, 0, 4]);
    }
}
