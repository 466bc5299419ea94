use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;

use crate::protocol::error::ProtocolError;
use crate::protocol::types::FormatCode;

/// Ensures that the buffer has at least `n` bytes remaining.
/// Returns `ProtocolError::InvalidMessage` if not enough bytes are available.
macro_rules! ensure_remaining {
    ($buf:expr, $n:expr) => {
        if $buf.len() < $n {
            return Err(ProtocolError::InvalidMessage);
        }
    };
}

/// Splits off a NUL-terminated string and consumes the terminator.
pub(crate) fn read_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    let end = src
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::InvalidMessage)?;
    let raw = src.split_to(end);
    src.advance(1);
    Ok(String::from_utf8(raw.to_vec())?)
}

/// Reads an Int32-length-prefixed value. Length -1 is NULL.
pub(crate) fn read_value(src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    ensure_remaining!(src, 4);
    let len = src.get_i32();
    if len == -1 {
        return Ok(None);
    }
    let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidMessage)?;
    ensure_remaining!(src, len);
    Ok(Some(src.split_to(len).freeze()))
}

/// SSLRequest magic number
pub(crate) const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
pub(crate) const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// CancelRequest magic number
pub(crate) const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Messages sent by the frontend (client) during startup phase.
#[derive(Debug)]
pub enum StartupMessage {
    /// SSLRequest - client wants to negotiate SSL
    SslRequest,
    /// GSSENCRequest - client wants GSSAPI encryption
    GssEncRequest,
    /// CancelRequest - client wants to cancel a query
    CancelRequest { process_id: i32, secret_key: i32 },
    /// StartupMessage - normal connection startup
    Startup {
        protocol_version: i32,
        parameters: StartupParameters,
    },
}

impl StartupMessage {
    /// Decodes one complete startup packet, length word included.
    pub(crate) fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let _len = src.get_i32();
        let code = src.get_i32();

        match code {
            SSL_REQUEST_CODE => Ok(StartupMessage::SslRequest),
            GSSENC_REQUEST_CODE => Ok(StartupMessage::GssEncRequest),
            CANCEL_REQUEST_CODE => {
                ensure_remaining!(src, 8);
                let process_id = src.get_i32();
                let secret_key = src.get_i32();
                Ok(StartupMessage::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            version if (version >> 16) == 3 => {
                let parameters = StartupParameters::decode(src)?;
                Ok(StartupMessage::Startup {
                    protocol_version: version,
                    parameters,
                })
            }
            _ => Err(ProtocolError::UnsupportedProtocolVersion(code)),
        }
    }
}

/// Startup parameters from the client
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: Option<String>,
    pub application_name: Option<String>,
    pub client_encoding: Option<String>,
    pub other: HashMap<String, String>,
}

impl StartupParameters {
    /// Decodes startup parameters from the message buffer.
    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let mut params = StartupParameters::default();

        while !src.is_empty() {
            let name = read_cstring(src)?;

            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }

            let value = read_cstring(src)?;

            match name.as_str() {
                "user" => params.user = value,
                "database" if !value.is_empty() => params.database = Some(value),
                "application_name" => params.application_name = Some(value),
                "client_encoding" => params.client_encoding = Some(value),
                _ => {
                    params.other.insert(name, value);
                }
            }
        }

        if params.user.is_empty() {
            return Err(ProtocolError::MissingParameter("user"));
        }

        Ok(params)
    }
}

/// Which kind of object a Describe or Close message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// 'S' - a prepared statement
    Statement,
    /// 'P' - a portal
    Portal,
}

impl TryFrom<u8> for Target {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            _ => Err(ProtocolError::InvalidTarget(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub statement_name: String,
    pub query: String,
    /// Parameter type OIDs specified by the client; 0 means unspecified.
    pub param_types: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal_name: String,
    pub statement_name: String,
    pub param_formats: Vec<FormatCode>,
    /// Raw parameter values (None = NULL)
    pub params: Vec<Option<Bytes>>,
    pub result_formats: Vec<FormatCode>,
}

#[derive(Debug, Clone)]
pub struct DescribeMessage {
    pub target: Target,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal_name: String,
    /// Maximum number of rows to return; 0 means no limit.
    pub max_rows: i32,
}

#[derive(Debug, Clone)]
pub struct CloseMessage {
    pub target: Target,
    pub name: String,
}

/// Messages sent by the frontend (client) during query phase.
#[derive(Debug)]
pub enum FrontendMessage {
    /// 'Q' - Simple query
    Query(String),
    /// 'P' - Parse a prepared statement
    Parse(ParseMessage),
    /// 'B' - Bind parameters to a portal
    Bind(BindMessage),
    /// 'D' - Describe a statement or portal
    Describe(DescribeMessage),
    /// 'E' - Execute a portal
    Execute(ExecuteMessage),
    /// 'C' - Close a statement or portal
    Close(CloseMessage),
    /// 'S' - End of an extended query batch
    Sync,
    /// 'H' - Flush pending output
    Flush,
    /// 'X' - Termination
    Terminate,
    /// 'd' - COPY data chunk
    CopyData(Bytes),
    /// 'c' - COPY completed
    CopyDone,
    /// 'f' - COPY aborted by the client
    CopyFail(String),
    /// 'p' - PasswordMessage, SASLInitialResponse or SASLResponse.
    /// Only the authentication exchange knows which one to expect.
    Password(Bytes),
}

impl FrontendMessage {
    /// Decodes one complete message, type byte and length included.
    pub(crate) fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let msg_type = src.get_u8();
        let _length = src.get_i32();
        match msg_type {
            b'Q' => Ok(FrontendMessage::Query(read_cstring(src)?)),
            b'P' => {
                let statement_name = read_cstring(src)?;
                let query = read_cstring(src)?;
                ensure_remaining!(src, 2);
                let count = src.get_i16().max(0) as usize;
                ensure_remaining!(src, count * 4);
                let param_types = (0..count).map(|_| src.get_u32()).collect();
                Ok(FrontendMessage::Parse(ParseMessage {
                    statement_name,
                    query,
                    param_types,
                }))
            }
            b'B' => {
                let portal_name = read_cstring(src)?;
                let statement_name = read_cstring(src)?;
                let param_formats = get_format_codes(src)?;
                ensure_remaining!(src, 2);
                let count = src.get_i16().max(0) as usize;
                let params = (0..count)
                    .map(|_| read_value(src))
                    .collect::<Result<_, _>>()?;
                let result_formats = get_format_codes(src)?;
                Ok(FrontendMessage::Bind(BindMessage {
                    portal_name,
                    statement_name,
                    param_formats,
                    params,
                    result_formats,
                }))
            }
            b'D' => {
                ensure_remaining!(src, 1);
                let target = Target::try_from(src.get_u8())?;
                let name = read_cstring(src)?;
                Ok(FrontendMessage::Describe(DescribeMessage { target, name }))
            }
            b'E' => {
                let portal_name = read_cstring(src)?;
                ensure_remaining!(src, 4);
                let max_rows = src.get_i32();
                Ok(FrontendMessage::Execute(ExecuteMessage {
                    portal_name,
                    max_rows,
                }))
            }
            b'C' => {
                ensure_remaining!(src, 1);
                let target = Target::try_from(src.get_u8())?;
                let name = read_cstring(src)?;
                Ok(FrontendMessage::Close(CloseMessage { target, name }))
            }
            b'S' => Ok(FrontendMessage::Sync),
            b'H' => Ok(FrontendMessage::Flush),
            b'X' => Ok(FrontendMessage::Terminate),
            b'd' => Ok(FrontendMessage::CopyData(src.split().freeze())),
            b'c' => Ok(FrontendMessage::CopyDone),
            b'f' => Ok(FrontendMessage::CopyFail(read_cstring(src)?)),
            b'p' => Ok(FrontendMessage::Password(src.split().freeze())),
            _ => Err(ProtocolError::UnknownMessageType(msg_type)),
        }
    }
}

fn get_format_codes(src: &mut BytesMut) -> Result<Vec<FormatCode>, ProtocolError> {
    ensure_remaining!(src, 2);
    let count = src.get_i16().max(0) as usize;
    ensure_remaining!(src, count * 2);
    (0..count)
        .map(|_| FormatCode::try_from(src.get_i16()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{PostgresCodec, StartupCodec};
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::Decoder;

    /// Helper to create a startup message with given code and body
    fn make_startup_message(code: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = 4 + 4 + body.len(); // length + code + body
        buf.put_i32(len as i32);
        buf.put_i32(code);
        buf.extend_from_slice(body);
        buf
    }

    /// Helper to create a frontend message with given type and body
    fn make_frontend_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(msg_type);
        let len = 4 + body.len(); // length includes self (4 bytes) + body
        buf.put_i32(len as i32);
        buf.extend_from_slice(body);
        buf
    }

    fn decode_startup_message(buf: &[u8]) -> Result<Option<StartupMessage>, ProtocolError> {
        let mut codec = StartupCodec::new();
        let mut bytes = BytesMut::from(buf);
        codec.decode(&mut bytes)
    }

    fn decode_frontend_message(buf: &[u8]) -> Result<Option<FrontendMessage>, ProtocolError> {
        let mut codec = PostgresCodec::new();
        let mut bytes = BytesMut::from(buf);
        codec.decode(&mut bytes)
    }

    #[test]
    fn test_read_cstring() {
        let mut buf = BytesMut::from(&b"portal\0rest"[..]);
        assert_eq!(read_cstring(&mut buf).unwrap(), "portal");
        assert_eq!(&buf[..], b"rest");

        let mut unterminated = BytesMut::from(&b"portal"[..]);
        assert!(matches!(
            read_cstring(&mut unterminated),
            Err(ProtocolError::InvalidMessage)
        ));

        let mut not_utf8 = BytesMut::from(&[0xC3, 0x28, 0][..]);
        assert!(matches!(
            read_cstring(&mut not_utf8),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_read_value() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        buf.put_i32(2);
        buf.put_slice(b"hi");
        buf.put_i32(-2);
        assert_eq!(read_value(&mut buf).unwrap(), None);
        assert_eq!(read_value(&mut buf).unwrap(), Some(Bytes::from_static(b"hi")));
        assert!(matches!(
            read_value(&mut buf),
            Err(ProtocolError::InvalidMessage)
        ));
        assert!(matches!(
            read_value(&mut buf),
            Err(ProtocolError::InvalidMessage)
        ));
    }

    #[test]
    fn test_read_ssl_request() {
        let buf = make_startup_message(SSL_REQUEST_CODE, &[]);
        let msg = decode_startup_message(&buf).unwrap();
        assert!(matches!(msg, Some(StartupMessage::SslRequest)));
    }

    #[test]
    fn test_read_startup_message() {
        let mut body = Vec::new();
        body.extend_from_slice(b"user\0postgres\0");
        body.extend_from_slice(b"database\0testdb\0");
        body.extend_from_slice(b"options\0-c x=1\0");
        body.push(0); // terminator

        let buf = make_startup_message(3 << 16, &body);
        let msg = decode_startup_message(&buf).unwrap();

        let Some(StartupMessage::Startup {
            protocol_version,
            parameters,
        }) = msg
        else {
            panic!("expected Startup message, got {msg:?}")
        };

        assert_eq!(protocol_version, 3 << 16);
        assert_eq!(parameters.user, "postgres");
        assert_eq!(parameters.database, Some("testdb".to_string()));
        assert_eq!(parameters.other.get("options").unwrap(), "-c x=1");
    }

    #[test]
    fn test_read_startup_message_missing_user() {
        let mut body = Vec::new();
        body.extend_from_slice(b"database\0testdb\0");
        body.push(0);

        let buf = make_startup_message(3 << 16, &body);
        let result = decode_startup_message(&buf);

        assert!(matches!(
            result,
            Err(ProtocolError::MissingParameter("user"))
        ));
    }

    #[test]
    fn test_read_gssenc_request() {
        let buf = make_startup_message(GSSENC_REQUEST_CODE, &[]);
        let msg = decode_startup_message(&buf).unwrap();
        assert!(matches!(msg, Some(StartupMessage::GssEncRequest)));
    }

    #[test]
    fn test_read_cancel_request() {
        let mut body = Vec::new();
        body.put_i32(12345);
        body.put_i32(67890);

        let buf = make_startup_message(CANCEL_REQUEST_CODE, &body);
        let msg = decode_startup_message(&buf).unwrap();

        assert!(matches!(
            msg,
            Some(StartupMessage::CancelRequest {
                process_id: 12345,
                secret_key: 67890
            })
        ));
    }

    #[test]
    fn test_read_unsupported_version() {
        let buf = make_startup_message(2 << 16, &[0]);
        assert!(matches!(
            decode_startup_message(&buf),
            Err(ProtocolError::UnsupportedProtocolVersion(v)) if v == 2 << 16
        ));
    }

    #[test]
    fn test_read_unknown_message_type() {
        let mut buf = Vec::new();
        buf.push(b'Z'); // Unknown type
        buf.put_i32(4);

        let result = decode_frontend_message(&buf);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(b'Z'))
        ));
    }

    #[test]
    fn test_read_query_message() {
        let buf = make_frontend_message(b'Q', b"SELECT 1\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();

        let FrontendMessage::Query(q) = msg else {
            panic!("expected Query message, got {msg:?}")
        };

        assert_eq!(q, "SELECT 1");
    }

    #[test]
    fn test_read_parse_message() {
        let mut body = Vec::new();
        body.extend_from_slice(b"stmt\0SELECT $1\0");
        body.put_i16(1);
        body.put_u32(23);
        let buf = make_frontend_message(b'P', &body);

        let FrontendMessage::Parse(msg) = decode_frontend_message(&buf).unwrap().unwrap() else {
            panic!("expected Parse message")
        };
        assert_eq!(msg.statement_name, "stmt");
        assert_eq!(msg.query, "SELECT $1");
        assert_eq!(msg.param_types, vec![23]);
    }

    #[test]
    fn test_read_bind_message() {
        let mut body = Vec::new();
        body.extend_from_slice(b"portal\0stmt\0");
        body.put_i16(1); // one format code for all params
        body.put_i16(1); // binary
        body.put_i16(2); // two params
        body.put_i32(4);
        body.put_i32(42);
        body.put_i32(-1); // NULL
        body.put_i16(0); // results all text
        let buf = make_frontend_message(b'B', &body);

        let FrontendMessage::Bind(msg) = decode_frontend_message(&buf).unwrap().unwrap() else {
            panic!("expected Bind message")
        };
        assert_eq!(msg.portal_name, "portal");
        assert_eq!(msg.statement_name, "stmt");
        assert_eq!(msg.param_formats, vec![FormatCode::Binary]);
        assert_eq!(
            msg.params,
            vec![Some(Bytes::from_static(&[0, 0, 0, 42])), None]
        );
        assert!(msg.result_formats.is_empty());
    }

    #[test]
    fn test_read_bind_truncated() {
        let mut body = Vec::new();
        body.extend_from_slice(b"\0\0");
        body.put_i16(0);
        body.put_i16(1);
        body.put_i32(8); // claims 8 bytes, none follow
        let buf = make_frontend_message(b'B', &body);
        assert!(matches!(
            decode_frontend_message(&buf),
            Err(ProtocolError::InvalidMessage)
        ));
    }

    #[test]
    fn test_read_describe_and_close() {
        let buf = make_frontend_message(b'D', b"Sstmt\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(
            msg,
            FrontendMessage::Describe(DescribeMessage { target: Target::Statement, ref name }) if name == "stmt"
        ));

        let buf = make_frontend_message(b'C', b"P\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(
            msg,
            FrontendMessage::Close(CloseMessage { target: Target::Portal, ref name }) if name.is_empty()
        ));

        let buf = make_frontend_message(b'D', b"Xstmt\0");
        assert!(matches!(
            decode_frontend_message(&buf),
            Err(ProtocolError::InvalidTarget(b'X'))
        ));
    }

    #[test]
    fn test_read_execute_message() {
        let mut body = b"\0".to_vec();
        body.put_i32(10);
        let buf = make_frontend_message(b'E', &body);
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(
            msg,
            FrontendMessage::Execute(ExecuteMessage { max_rows: 10, .. })
        ));
    }

    #[test]
    fn test_read_copy_messages() {
        let buf = make_frontend_message(b'd', b"1\tfoo\n");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::CopyData(ref data) if &data[..] == b"1\tfoo\n"));

        let buf = make_frontend_message(b'c', &[]);
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::CopyDone));

        let buf = make_frontend_message(b'f', b"oops\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::CopyFail(ref m) if m == "oops"));
    }

    #[test]
    fn test_read_terminate_message() {
        let buf = make_frontend_message(b'X', &[]);
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::Terminate));
    }
}
