use crate::backend::value_len;
use crate::codec::{count_i16, count_usize, cstring_len, declared_length, WireCodec};
use crate::error::ProtocolError;
use crate::messages::{
    frontend_tag, Bind, Close, Describe, Execute, FrontendMessage, NegotiationCode, Parse, Query,
    StartupMessage, StartupPacket, Target, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE,
    SSL_REQUEST_CODE,
};
use pgmock_core::SessionKey;
use std::collections::BTreeMap;
use tokio::io::AsyncRead;

/// Startup packets are small; PostgreSQL itself caps them at 10000 bytes.
pub const MAX_STARTUP_PACKET_LENGTH: usize = 10_000;

impl FrontendMessage {
    pub fn tag(&self) -> u8 {
        match self {
            FrontendMessage::Bind(_) => frontend_tag::BIND,
            FrontendMessage::Close(_) => frontend_tag::CLOSE,
            FrontendMessage::Describe(_) => frontend_tag::DESCRIBE,
            FrontendMessage::Execute(_) => frontend_tag::EXECUTE,
            FrontendMessage::Flush => frontend_tag::FLUSH,
            FrontendMessage::Parse(_) => frontend_tag::PARSE,
            FrontendMessage::Query(_) => frontend_tag::QUERY,
            FrontendMessage::Sync => frontend_tag::SYNC,
            FrontendMessage::Terminate => frontend_tag::TERMINATE,
            FrontendMessage::Unsupported { tag } => *tag,
        }
    }

    /// Decodes the body of a message whose type byte and length were already
    /// consumed. Unknown type bytes yield [`FrontendMessage::Unsupported`].
    pub async fn decode(tag: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut wire = WireCodec::new(body);
        let message = match tag {
            frontend_tag::BIND => FrontendMessage::Bind(decode_bind(&mut wire).await?),
            frontend_tag::CLOSE => {
                let target = Target::from_byte(wire.read_u8().await?)?;
                let name = wire.read_cstring().await?;
                FrontendMessage::Close(Close { target, name })
            }
            frontend_tag::DESCRIBE => {
                let target = Target::from_byte(wire.read_u8().await?)?;
                let name = wire.read_cstring().await?;
                FrontendMessage::Describe(Describe { target, name })
            }
            frontend_tag::EXECUTE => {
                let portal = wire.read_cstring().await?;
                let max_rows = wire.read_i32().await?;
                FrontendMessage::Execute(Execute { portal, max_rows })
            }
            frontend_tag::FLUSH => FrontendMessage::Flush,
            frontend_tag::PARSE => {
                let statement = wire.read_cstring().await?;
                let sql = wire.read_cstring().await?;
                let count = count_usize(wire.read_i16().await?, "parameter type")?;
                let mut param_types = Vec::with_capacity(count);
                for _ in 0..count {
                    param_types.push(wire.read_i32().await?);
                }
                FrontendMessage::Parse(Parse {
                    statement,
                    sql,
                    param_types,
                })
            }
            frontend_tag::QUERY => FrontendMessage::Query(Query {
                sql: wire.read_cstring().await?,
            }),
            frontend_tag::SYNC => FrontendMessage::Sync,
            frontend_tag::TERMINATE => FrontendMessage::Terminate,
            other => FrontendMessage::Unsupported { tag: other },
        };
        Ok(message)
    }

    pub fn encode<S>(&self, wire: &mut WireCodec<S>) -> Result<(), ProtocolError> {
        let tag = self.tag();
        wire.write_message(|wire| match self {
            FrontendMessage::Bind(bind) => encode_bind(wire, bind),
            FrontendMessage::Close(Close { target, name })
            | FrontendMessage::Describe(Describe { target, name }) => {
                wire.write_u8(tag)
                    .write_i32(declared_length(1 + cstring_len(name))?)
                    .write_u8(target.as_byte())
                    .write_cstring(name)?;
                Ok(())
            }
            FrontendMessage::Execute(execute) => {
                wire.write_u8(tag)
                    .write_i32(declared_length(cstring_len(&execute.portal) + 4)?)
                    .write_cstring(&execute.portal)?
                    .write_i32(execute.max_rows);
                Ok(())
            }
            FrontendMessage::Flush | FrontendMessage::Sync | FrontendMessage::Terminate => {
                wire.write_u8(tag).write_i32(4);
                Ok(())
            }
            FrontendMessage::Parse(parse) => {
                let count = count_i16(parse.param_types.len(), "parameter types")?;
                let len = cstring_len(&parse.statement)
                    + cstring_len(&parse.sql)
                    + 2
                    + 4 * parse.param_types.len();
                wire.write_u8(tag)
                    .write_i32(declared_length(len)?)
                    .write_cstring(&parse.statement)?
                    .write_cstring(&parse.sql)?
                    .write_i16(count);
                for oid in &parse.param_types {
                    wire.write_i32(*oid);
                }
                Ok(())
            }
            FrontendMessage::Query(query) => {
                wire.write_u8(tag)
                    .write_i32(declared_length(cstring_len(&query.sql))?)
                    .write_cstring(&query.sql)?;
                Ok(())
            }
            FrontendMessage::Unsupported { tag } => Err(ProtocolError::Validation(format!(
                "cannot encode unsupported message type {:?}",
                *tag as char
            ))),
        })
    }
}

async fn decode_bind(wire: &mut WireCodec<&[u8]>) -> Result<Bind, ProtocolError> {
    let portal = wire.read_cstring().await?;
    let statement = wire.read_cstring().await?;
    let param_formats = read_format_codes(wire).await?;

    let count = count_usize(wire.read_i16().await?, "parameter")?;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let len = wire.read_i32().await?;
        params.push(match len {
            -1 => None,
            n => Some(wire.read_bytes(value_len(n)?).await?),
        });
    }
    if param_formats.len() > 1 && param_formats.len() != params.len() {
        return Err(ProtocolError::Malformed(format!(
            "bind has {} parameter format codes for {} parameters",
            param_formats.len(),
            params.len()
        )));
    }

    let result_formats = read_format_codes(wire).await?;
    Ok(Bind {
        portal,
        statement,
        param_formats,
        params,
        result_formats,
    })
}

async fn read_format_codes(wire: &mut WireCodec<&[u8]>) -> Result<Vec<i16>, ProtocolError> {
    let count = count_usize(wire.read_i16().await?, "format code")?;
    let mut codes = Vec::with_capacity(count);
    for _ in 0..count {
        codes.push(wire.read_i16().await?);
    }
    Ok(codes)
}

fn encode_bind<S>(wire: &mut WireCodec<S>, bind: &Bind) -> Result<(), ProtocolError> {
    let values_len: usize = bind
        .params
        .iter()
        .map(|value| 4 + value.as_ref().map_or(0, Vec::len))
        .sum();
    let len = cstring_len(&bind.portal)
        + cstring_len(&bind.statement)
        + 2
        + 2 * bind.param_formats.len()
        + 2
        + values_len
        + 2
        + 2 * bind.result_formats.len();
    wire.write_u8(frontend_tag::BIND)
        .write_i32(declared_length(len)?)
        .write_cstring(&bind.portal)?
        .write_cstring(&bind.statement)?;
    write_format_codes(wire, &bind.param_formats)?;
    wire.write_i16(count_i16(bind.params.len(), "parameters")?);
    for value in &bind.params {
        match value {
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    ProtocolError::Malformed(format!("parameter of {} bytes", bytes.len()))
                })?;
                wire.write_i32(len).write_bytes(bytes);
            }
            None => {
                wire.write_i32(-1);
            }
        }
    }
    write_format_codes(wire, &bind.result_formats)
}

fn write_format_codes<S>(wire: &mut WireCodec<S>, codes: &[i16]) -> Result<(), ProtocolError> {
    wire.write_i16(count_i16(codes.len(), "format codes")?);
    for code in codes {
        wire.write_i16(*code);
    }
    Ok(())
}

impl StartupMessage {
    /// Reads `key\0value\0` pairs until an empty key or an empty value (or
    /// the end of the body). A pair with an empty value is not kept.
    pub async fn decode_parameters(body: &[u8]) -> Result<BTreeMap<String, String>, ProtocolError> {
        let mut wire = WireCodec::new(body);
        let mut parameters = BTreeMap::new();
        loop {
            let key = wire.read_cstring().await?;
            if key.is_empty() {
                break;
            }
            let value = wire.read_cstring().await?;
            if value.is_empty() {
                break;
            }
            parameters.insert(key, value);
        }
        Ok(parameters)
    }
}

impl StartupPacket {
    /// Reads one untagged packet: length, negotiation code, then a payload
    /// whose meaning depends on the code. The payload is always consumed in
    /// full, even for codes this server does not understand.
    pub async fn read<S: AsyncRead + Unpin>(
        wire: &mut WireCodec<S>,
    ) -> Result<Self, ProtocolError> {
        let remaining = wire.read_length(8).await?;
        if remaining + 8 > MAX_STARTUP_PACKET_LENGTH {
            return Err(ProtocolError::Malformed(format!(
                "startup packet of {} bytes exceeds {MAX_STARTUP_PACKET_LENGTH}",
                remaining + 8
            )));
        }
        let code = wire.read_i32().await?;
        let body = wire.read_bytes(remaining).await?;
        Self::decode(code, &body).await
    }

    pub async fn decode(code: i32, body: &[u8]) -> Result<Self, ProtocolError> {
        let packet = match NegotiationCode::from_raw(code) {
            NegotiationCode::SslRequest => StartupPacket::SslRequest,
            NegotiationCode::GssEncRequest => StartupPacket::GssEncRequest,
            NegotiationCode::CancelRequest => {
                // No type byte: the two keys follow the code directly.
                let mut wire = WireCodec::new(body);
                let process_id = wire.read_i32().await?;
                let secret_key = wire.read_i32().await?;
                StartupPacket::CancelRequest(SessionKey::new(process_id, secret_key))
            }
            NegotiationCode::Startup => StartupPacket::Startup(StartupMessage {
                protocol_version: code,
                parameters: StartupMessage::decode_parameters(body).await?,
            }),
            NegotiationCode::Unknown(code) => StartupPacket::Unsupported { code },
        };
        Ok(packet)
    }

    pub fn encode<S>(&self, wire: &mut WireCodec<S>) -> Result<(), ProtocolError> {
        wire.write_message(|wire| match self {
            StartupPacket::SslRequest => {
                wire.write_i32(8).write_i32(SSL_REQUEST_CODE);
                Ok(())
            }
            StartupPacket::GssEncRequest => {
                wire.write_i32(8).write_i32(GSSENC_REQUEST_CODE);
                Ok(())
            }
            StartupPacket::CancelRequest(key) => {
                wire.write_i32(16)
                    .write_i32(CANCEL_REQUEST_CODE)
                    .write_i32(key.process_id)
                    .write_i32(key.secret_key);
                Ok(())
            }
            StartupPacket::Startup(startup) => {
                let pairs_len: usize = startup
                    .parameters
                    .iter()
                    .map(|(key, value)| cstring_len(key) + cstring_len(value))
                    .sum();
                wire.write_i32(declared_length(4 + pairs_len + 1)?)
                    .write_i32(startup.protocol_version);
                for (key, value) in &startup.parameters {
                    wire.write_cstring(key)?.write_cstring(value)?;
                }
                wire.write_u8(0);
                Ok(())
            }
            StartupPacket::Unsupported { code } => {
                wire.write_i32(8).write_i32(*code);
                Ok(())
            }
        })
    }
}
