use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::types::{ErrorFieldCode, FormatCode, sql_state};

/// Messages sent by the backend (server) to the client.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// 'R' - Authentication response (AuthenticationOk)
    AuthenticationOk,
    /// 'R' - SASL mechanisms offered by the server
    AuthenticationSasl { mechanisms: Vec<String> },
    /// 'R' - SASL challenge (server-first-message)
    AuthenticationSaslContinue { data: Bytes },
    /// 'R' - SASL outcome (server-final-message)
    AuthenticationSaslFinal { data: Bytes },
    /// 'K' - Backend key data for cancel requests
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// 'S' - Parameter status notification
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'E' - Error response
    ErrorResponse { fields: Vec<ErrorField> },
    /// '1' - Parse complete
    ParseComplete,
    /// '2' - Bind complete
    BindComplete,
    /// '3' - Close complete
    CloseComplete,
    /// 't' - Parameter type OIDs of a prepared statement
    ParameterDescription { param_types: Vec<u32> },
    /// 'T' - Row description
    RowDescription { fields: Vec<FieldDescription> },
    /// 'n' - The statement returns no rows
    NoData,
    /// 'D' - A single result row (None = NULL)
    DataRow { values: Vec<Option<Bytes>> },
    /// 'C' - Command completion tag
    CommandComplete { tag: String },
    /// 'I' - Response to an empty query string
    EmptyQueryResponse,
    /// 'G' - Server is ready to receive COPY data
    CopyInResponse {
        format: FormatCode,
        column_formats: Vec<FormatCode>,
    },
}

impl BackendMessage {
    /// Builds an ERROR response with the given SQLSTATE and message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ErrorInfo::new(code, message).into()
    }

    fn type_byte(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk
            | BackendMessage::AuthenticationSasl { .. }
            | BackendMessage::AuthenticationSaslContinue { .. }
            | BackendMessage::AuthenticationSaslFinal { .. } => b'R',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::ErrorResponse { .. } => b'E',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::ParameterDescription { .. } => b't',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::NoData => b'n',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::CopyInResponse { .. } => b'G',
        }
    }

    /// Writes this message to `dst`: type byte, then Int32 length, then body.
    pub fn encode(&self, dst: &mut BytesMut) {
        let start = dst.len();
        dst.put_u8(self.type_byte());
        dst.put_i32(0); // length, patched below
        self.encode_body(dst);
        let len = (dst.len() - start - 1) as i32;
        dst[start + 1..start + 5].copy_from_slice(&len.to_be_bytes());
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            BackendMessage::AuthenticationOk => dst.put_i32(0),
            BackendMessage::AuthenticationSasl { mechanisms } => {
                dst.put_i32(10);
                for mechanism in mechanisms {
                    put_cstring(dst, mechanism);
                }
                dst.put_u8(0);
            }
            BackendMessage::AuthenticationSaslContinue { data } => {
                dst.put_i32(11);
                dst.put_slice(data);
            }
            BackendMessage::AuthenticationSaslFinal { data } => {
                dst.put_i32(12);
                dst.put_slice(data);
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                dst.put_i32(*process_id);
                dst.put_i32(*secret_key);
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(dst, name);
                put_cstring(dst, value);
            }
            BackendMessage::ReadyForQuery { status } => dst.put_u8(status.as_byte()),
            BackendMessage::ErrorResponse { fields } => {
                for field in fields {
                    dst.put_u8(field.code.as_u8());
                    put_cstring(dst, &field.value);
                }
                dst.put_u8(0); // terminator
            }
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::EmptyQueryResponse => {}
            BackendMessage::ParameterDescription { param_types } => {
                dst.put_i16(param_types.len() as i16);
                for oid in param_types {
                    dst.put_u32(*oid);
                }
            }
            BackendMessage::RowDescription { fields } => {
                dst.put_i16(fields.len() as i16);
                for field in fields {
                    put_cstring(dst, &field.name);
                    dst.put_u32(field.table_oid);
                    dst.put_i16(field.column_attr);
                    dst.put_u32(field.type_oid);
                    dst.put_i16(field.type_size);
                    dst.put_i32(field.type_modifier);
                    dst.put_i16(field.format.as_i16());
                }
            }
            BackendMessage::DataRow { values } => {
                dst.put_i16(values.len() as i16);
                for value in values {
                    match value {
                        Some(bytes) => {
                            dst.put_i32(bytes.len() as i32);
                            dst.put_slice(bytes);
                        }
                        None => dst.put_i32(-1),
                    }
                }
            }
            BackendMessage::CommandComplete { tag } => put_cstring(dst, tag),
            BackendMessage::CopyInResponse {
                format,
                column_formats,
            } => {
                dst.put_i8(format.as_i16() as i8);
                dst.put_i16(column_formats.len() as i16);
                for code in column_formats {
                    dst.put_i16(code.as_i16());
                }
            }
        }
    }
}

fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

/// Transaction status indicator for ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    #[default]
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
    /// 'E' - In a failed transaction block
    Failed,
}

impl TransactionStatus {
    fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// A single field of an ErrorResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorField {
    pub code: ErrorFieldCode,
    pub value: String,
}

impl ErrorField {
    pub fn new(code: ErrorFieldCode, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

/// Column metadata sent in a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    /// OID of the source table, or 0.
    pub table_oid: u32,
    /// Attribute number of the source column, or 0.
    pub column_attr: i16,
    pub type_oid: u32,
    /// Negative values denote variable-width types.
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Error,
    /// Terminates the session.
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Everything needed to build an ErrorResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            detail: None,
        }
    }

    /// An error without a more specific SQLSTATE.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(sql_state::INTERNAL_ERROR, message)
    }

    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            ..Self::new(code, message)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<ErrorInfo> for BackendMessage {
    fn from(info: ErrorInfo) -> Self {
        let severity = info.severity.as_str();
        let mut fields = vec![
            ErrorField::new(ErrorFieldCode::Severity, severity),
            ErrorField::new(ErrorFieldCode::SeverityNonLocalized, severity),
            ErrorField::new(ErrorFieldCode::SqlState, info.code),
            ErrorField::new(ErrorFieldCode::Message, info.message),
        ];
        if let Some(detail) = info.detail {
            fields.push(ErrorField::new(ErrorFieldCode::Detail, detail));
        }
        BackendMessage::ErrorResponse { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: BackendMessage) -> Vec<u8> {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_write_authentication_ok() {
        let buf = encode(BackendMessage::AuthenticationOk);
        assert_eq!(buf, vec![b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn test_write_authentication_sasl() {
        let buf = encode(BackendMessage::AuthenticationSasl {
            mechanisms: vec!["SCRAM-SHA-256".to_string()],
        });
        // 4 (len) + 4 (code) + 14 ("SCRAM-SHA-256\0") + 1 (list terminator)
        assert_eq!(&buf[..9], &[b'R', 0, 0, 0, 23, 0, 0, 0, 10]);
        assert_eq!(&buf[9..], b"SCRAM-SHA-256\0\0");
    }

    #[test]
    fn test_write_sasl_continue_is_not_terminated() {
        let buf = encode(BackendMessage::AuthenticationSaslContinue {
            data: Bytes::from_static(b"r=abc"),
        });
        assert_eq!(buf, b"R\0\0\0\x0d\0\0\0\x0br=abc".to_vec());
    }

    #[test]
    fn test_write_ready_for_query() {
        let buf = encode(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        });
        assert_eq!(buf, vec![b'Z', 0, 0, 0, 5, b'I']);

        let buf = encode(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Failed,
        });
        assert_eq!(buf, vec![b'Z', 0, 0, 0, 5, b'E']);
    }

    #[test]
    fn test_write_parameter_status() {
        let buf = encode(BackendMessage::ParameterStatus {
            name: "server_version".to_string(),
            value: "15.0".to_string(),
        });
        // length = 4 + 15 ("server_version\0") + 5 ("15.0\0") = 24
        assert_eq!(buf[0], b'S');
        assert_eq!(&buf[1..5], &[0, 0, 0, 24]);
        assert_eq!(&buf[5..], b"server_version\x0015.0\0");
    }

    #[test]
    fn test_write_empty_body_messages() {
        assert_eq!(encode(BackendMessage::ParseComplete), vec![b'1', 0, 0, 0, 4]);
        assert_eq!(encode(BackendMessage::BindComplete), vec![b'2', 0, 0, 0, 4]);
        assert_eq!(encode(BackendMessage::CloseComplete), vec![b'3', 0, 0, 0, 4]);
        assert_eq!(encode(BackendMessage::NoData), vec![b'n', 0, 0, 0, 4]);
        assert_eq!(
            encode(BackendMessage::EmptyQueryResponse),
            vec![b'I', 0, 0, 0, 4]
        );
    }

    #[test]
    fn test_write_parameter_description() {
        let buf = encode(BackendMessage::ParameterDescription {
            param_types: vec![23, 25],
        });
        assert_eq!(
            buf,
            vec![b't', 0, 0, 0, 14, 0, 2, 0, 0, 0, 23, 0, 0, 0, 25]
        );
    }

    #[test]
    fn test_write_row_description() {
        let buf = encode(BackendMessage::RowDescription {
            fields: vec![FieldDescription {
                name: "a".to_string(),
                table_oid: 0,
                column_attr: 0,
                type_oid: 23,
                type_size: 4,
                type_modifier: -1,
                format: FormatCode::Binary,
            }],
        });
        let mut expected = vec![b'T', 0, 0, 0, 26, 0, 1, b'a', 0];
        expected.extend_from_slice(&[0, 0, 0, 0]); // table oid
        expected.extend_from_slice(&[0, 0]); // column attr
        expected.extend_from_slice(&[0, 0, 0, 23]); // type oid
        expected.extend_from_slice(&[0, 4]); // type size
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]); // typmod
        expected.extend_from_slice(&[0, 1]); // format
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_write_data_row_with_null() {
        let buf = encode(BackendMessage::DataRow {
            values: vec![Some(Bytes::from_static(b"42")), None],
        });
        assert_eq!(
            buf,
            vec![
                b'D', 0, 0, 0, 16, 0, 2, 0, 0, 0, 2, b'4', b'2', 0xFF, 0xFF, 0xFF, 0xFF
            ]
        );
    }

    #[test]
    fn test_write_command_complete() {
        let buf = encode(BackendMessage::CommandComplete {
            tag: "SELECT 1".to_string(),
        });
        assert_eq!(buf, b"C\0\0\0\x0dSELECT 1\0".to_vec());
    }

    #[test]
    fn test_write_copy_in_response() {
        let buf = encode(BackendMessage::CopyInResponse {
            format: FormatCode::Text,
            column_formats: vec![],
        });
        assert_eq!(buf, vec![b'G', 0, 0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn test_write_error_response() {
        let buf = encode(BackendMessage::error(sql_state::INTERNAL_ERROR, "boom"));
        assert_eq!(
            buf,
            b"E\0\0\0\x20SERROR\0VERROR\0CXX000\0Mboom\0\0".to_vec()
        );
    }

    #[test]
    fn test_fatal_error_info() {
        let msg: BackendMessage = ErrorInfo::fatal(sql_state::INVALID_PASSWORD, "nope")
            .with_detail("more")
            .into();
        let BackendMessage::ErrorResponse { fields } = msg else {
            panic!("expected ErrorResponse");
        };
        assert_eq!(fields[0], ErrorField::new(ErrorFieldCode::Severity, "FATAL"));
        assert_eq!(fields[2], ErrorField::new(ErrorFieldCode::SqlState, "28P01"));
        assert_eq!(fields[4], ErrorField::new(ErrorFieldCode::Detail, "more"));
    }

    #[test]
    fn test_write_two_messages_back_to_back() {
        let mut buf = BytesMut::new();
        BackendMessage::BindComplete.encode(&mut buf);
        BackendMessage::NoData.encode(&mut buf);
        assert_eq!(&buf[..], &[b'2', 0, 0, 0, 4, b'n', 0, 0, 0, 4]);
    }
}
