//! Protocol message types (PostgreSQL frontend/backend protocol v3.0).
//!
//! Type bytes are overloaded by direction (`'D'` is Describe from a client but
//! DataRow from the server), so they live in two separate tables.

use crate::error::ProtocolError;
use pgmock_core::{ColumnDescriptor, Row, SessionKey};
use std::collections::BTreeMap;

/// Message type bytes sent by the server.
pub mod backend_tag {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const DATA_ROW: u8 = b'D';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NO_DATA: u8 = b'n';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Message type bytes sent by the client once the handshake is over.
pub mod frontend_tag {
    pub const BIND: u8 = b'B';
    pub const CLOSE: u8 = b'C';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const FLUSH: u8 = b'H';
    pub const PARSE: u8 = b'P';
    pub const QUERY: u8 = b'Q';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Request codes carried in the AuthenticationXXX family.
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Field type bytes of ErrorResponse / NoticeResponse.
pub mod error_field {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const SQLSTATE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

pub mod sql_state {
    pub const QUERY_CANCELED: &str = "57014";
}

pub const PROTOCOL_VERSION_3: i32 = 0x0003_0000;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Interpretation of the first word after the length of an untagged packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationCode {
    SslRequest,
    GssEncRequest,
    CancelRequest,
    Startup,
    Unknown(i32),
}

impl NegotiationCode {
    pub fn from_raw(code: i32) -> Self {
        let msb = (code >> 16) & 0xFFFF;
        let lsb = code & 0xFFFF;
        match (msb, lsb) {
            (1234, 5679) => NegotiationCode::SslRequest,
            (1234, 5680) => NegotiationCode::GssEncRequest,
            (1234, 5678) => NegotiationCode::CancelRequest,
            (3, 0) => NegotiationCode::Startup,
            _ => NegotiationCode::Unknown(code),
        }
    }
}

/// Transaction state for ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn indicator(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }

    pub fn from_indicator(indicator: u8) -> Option<Self> {
        match indicator {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// ReadyForQuery carries a raw indicator byte; a zero (unset) or unknown
/// indicator is rejected when the message is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyForQuery {
    pub indicator: u8,
}

impl ReadyForQuery {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            indicator: status.indicator(),
        }
    }

    pub fn idle() -> Self {
        Self::new(TransactionStatus::Idle)
    }

    pub fn status(&self) -> Result<TransactionStatus, ProtocolError> {
        if self.indicator == 0 {
            return Err(ProtocolError::Validation(
                "ReadyForQuery indicator is unset, expected 'I', 'T' or 'E'".into(),
            ));
        }
        TransactionStatus::from_indicator(self.indicator).ok_or_else(|| {
            ProtocolError::Validation(format!(
                "ReadyForQuery indicator {:?} is invalid, expected 'I', 'T' or 'E'",
                self.indicator as char
            ))
        })
    }
}

/// CommandComplete needs one of the tag setters to be called before it can be
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandComplete {
    tag: Option<String>,
}

impl CommandComplete {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already formatted tag, as read off the wire.
    pub fn from_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
        }
    }

    pub fn insert(&mut self, oid: u32, rows: u64) -> &mut Self {
        self.set(format!("INSERT {oid} {rows}"))
    }

    pub fn delete(&mut self, rows: u64) -> &mut Self {
        self.set(format!("DELETE {rows}"))
    }

    pub fn update(&mut self, rows: u64) -> &mut Self {
        self.set(format!("UPDATE {rows}"))
    }

    pub fn select_or_create(&mut self, rows: u64) -> &mut Self {
        self.set(format!("SELECT {rows}"))
    }

    pub fn move_cursor(&mut self, rows: u64) -> &mut Self {
        self.set(format!("MOVE {rows}"))
    }

    pub fn fetch(&mut self, rows: u64) -> &mut Self {
        self.set(format!("FETCH {rows}"))
    }

    pub fn copy(&mut self, rows: u64) -> &mut Self {
        self.set(format!("COPY {rows}"))
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set(&mut self, tag: String) -> &mut Self {
        self.tag = Some(tag);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorField {
    pub code: u8,
    pub value: String,
}

/// Ordered list of error fields. Also used for NoticeResponse, which shares the
/// layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorResponse {
    pub fields: Vec<ErrorField>,
}

impl ErrorResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, code: u8, value: impl Into<String>) -> Self {
        self.fields.push(ErrorField {
            code,
            value: value.into(),
        });
        self
    }

    /// What a session sends when its pending work is cancelled.
    pub fn query_canceled() -> Self {
        Self::new()
            .field(error_field::SEVERITY, "ERROR")
            .field(error_field::SQLSTATE, sql_state::QUERY_CANCELED)
            .field(error_field::MESSAGE, "Request was cancelled")
    }

    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.code == code)
            .map(|field| field.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDescription {
    pub fields: Vec<ColumnDescriptor>,
}

impl RowDescription {
    /// name + terminator + three Int32 + three Int16.
    pub fn field_size(field: &ColumnDescriptor) -> usize {
        field.name.len() + 1 + 4 * 3 + 2 * 3
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRow {
    pub values: Row,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterDescription {
    pub type_oids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

/// The AuthenticationXXX family, all sharing type byte `'R'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    KerberosV5,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    ScmCredential,
    Gss,
    GssContinue { data: Vec<u8> },
    Sspi,
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Vec<u8> },
    SaslFinal { data: Vec<u8> },
}

impl Authentication {
    pub fn code(&self) -> i32 {
        match self {
            Authentication::Ok => auth_code::OK,
            Authentication::KerberosV5 => auth_code::KERBEROS_V5,
            Authentication::CleartextPassword => auth_code::CLEARTEXT_PASSWORD,
            Authentication::Md5Password { .. } => auth_code::MD5_PASSWORD,
            Authentication::ScmCredential => auth_code::SCM_CREDENTIAL,
            Authentication::Gss => auth_code::GSS,
            Authentication::GssContinue { .. } => auth_code::GSS_CONTINUE,
            Authentication::Sspi => auth_code::SSPI,
            Authentication::Sasl { .. } => auth_code::SASL,
            Authentication::SaslContinue { .. } => auth_code::SASL_CONTINUE,
            Authentication::SaslFinal { .. } => auth_code::SASL_FINAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(SessionKey),
    BindComplete,
    CloseComplete,
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse,
    ErrorResponse(ErrorResponse),
    NoData,
    NoticeResponse(ErrorResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete,
    PortalSuspended,
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

/// Statement or portal, as named by Describe and Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    pub fn as_byte(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            other => Err(ProtocolError::Malformed(format!(
                "unknown describe/close target {:?}",
                other as char
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Parse {
    pub statement: String,
    pub sql: String,
    pub param_types: Vec<i32>,
}

/// Bind with its format-code lists kept as sent; use [`Bind::param_format`]
/// and [`Bind::result_format`] for the per-index value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<i16>,
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

impl Bind {
    /// None when no codes were sent; a single code applies to every index.
    pub fn param_format(&self, idx: usize) -> Option<i16> {
        broadcast_format(&self.param_formats, idx)
    }

    pub fn result_format(&self, idx: usize) -> Option<i16> {
        broadcast_format(&self.result_formats, idx)
    }
}

fn broadcast_format(codes: &[i16], idx: usize) -> Option<i16> {
    match codes {
        [] => None,
        [only] => Some(*only),
        many => many.get(idx).copied(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Describe {
    pub target: Target,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub target: Target,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub portal: String,
    pub max_rows: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    Bind(Bind),
    Close(Close),
    Describe(Describe),
    Execute(Execute),
    Flush,
    Parse(Parse),
    Query(Query),
    Sync,
    Terminate,
    Unsupported { tag: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub protocol_version: i32,
    pub parameters: BTreeMap<String, String>,
}

impl StartupMessage {
    pub fn new(parameters: BTreeMap<String, String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_3,
            parameters,
        }
    }
}

/// Untagged packets a client may send before the session is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupPacket {
    SslRequest,
    GssEncRequest,
    CancelRequest(SessionKey),
    Startup(StartupMessage),
    Unsupported { code: i32 },
}
