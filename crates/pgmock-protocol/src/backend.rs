use crate::codec::{count_i16, count_usize, cstring_len, declared_length, WireCodec};
use crate::error::ProtocolError;
use crate::messages::{
    auth_code, backend_tag, Authentication, BackendMessage, CommandComplete, DataRow,
    ErrorField, ErrorResponse, ParameterDescription, ParameterStatus, ReadyForQuery,
    RowDescription,
};
use pgmock_core::{ColumnDescriptor, SessionKey};
use tokio::io::{AsyncRead, AsyncWrite};

impl BackendMessage {
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::Authentication(_) => backend_tag::AUTHENTICATION,
            BackendMessage::BackendKeyData(_) => backend_tag::BACKEND_KEY_DATA,
            BackendMessage::BindComplete => backend_tag::BIND_COMPLETE,
            BackendMessage::CloseComplete => backend_tag::CLOSE_COMPLETE,
            BackendMessage::CommandComplete(_) => backend_tag::COMMAND_COMPLETE,
            BackendMessage::DataRow(_) => backend_tag::DATA_ROW,
            BackendMessage::EmptyQueryResponse => backend_tag::EMPTY_QUERY_RESPONSE,
            BackendMessage::ErrorResponse(_) => backend_tag::ERROR_RESPONSE,
            BackendMessage::NoData => backend_tag::NO_DATA,
            BackendMessage::NoticeResponse(_) => backend_tag::NOTICE_RESPONSE,
            BackendMessage::ParameterDescription(_) => backend_tag::PARAMETER_DESCRIPTION,
            BackendMessage::ParameterStatus(_) => backend_tag::PARAMETER_STATUS,
            BackendMessage::ParseComplete => backend_tag::PARSE_COMPLETE,
            BackendMessage::PortalSuspended => backend_tag::PORTAL_SUSPENDED,
            BackendMessage::ReadyForQuery(_) => backend_tag::READY_FOR_QUERY,
            BackendMessage::RowDescription(_) => backend_tag::ROW_DESCRIPTION,
        }
    }

    /// Appends the encoded message to the codec's output buffer. On error
    /// nothing is appended.
    pub fn encode<S>(&self, wire: &mut WireCodec<S>) -> Result<(), ProtocolError> {
        let tag = self.tag();
        wire.write_message(|wire| match self {
            BackendMessage::Authentication(auth) => encode_authentication(wire, auth),
            BackendMessage::BackendKeyData(key) => {
                wire.write_u8(tag)
                    .write_i32(12)
                    .write_i32(key.process_id)
                    .write_i32(key.secret_key);
                Ok(())
            }
            BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::EmptyQueryResponse
            | BackendMessage::NoData
            | BackendMessage::ParseComplete
            | BackendMessage::PortalSuspended => {
                wire.write_u8(tag).write_i32(4);
                Ok(())
            }
            BackendMessage::CommandComplete(complete) => {
                encode_command_complete(wire, complete)
            }
            BackendMessage::DataRow(row) => encode_data_row(wire, row),
            BackendMessage::ErrorResponse(fields) | BackendMessage::NoticeResponse(fields) => {
                encode_error_fields(wire, tag, fields)
            }
            BackendMessage::ParameterDescription(description) => {
                let count = count_i16(description.type_oids.len(), "parameters")?;
                wire.write_u8(tag)
                    .write_i32(declared_length(2 + 4 * description.type_oids.len())?)
                    .write_i16(count);
                for oid in &description.type_oids {
                    wire.write_i32(*oid);
                }
                Ok(())
            }
            BackendMessage::ParameterStatus(status) => {
                let len = cstring_len(&status.name) + cstring_len(&status.value);
                wire.write_u8(tag)
                    .write_i32(declared_length(len)?)
                    .write_cstring(&status.name)?
                    .write_cstring(&status.value)?;
                Ok(())
            }
            BackendMessage::ReadyForQuery(ready) => {
                let status = ready.status()?;
                wire.write_u8(tag).write_i32(5).write_u8(status.indicator());
                Ok(())
            }
            BackendMessage::RowDescription(description) => {
                encode_row_description(wire, description)
            }
        })
    }

    /// Decodes a message body read by [`WireCodec::read_frame`].
    pub async fn decode(tag: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut wire = WireCodec::new(body);
        let message = match tag {
            backend_tag::AUTHENTICATION => {
                BackendMessage::Authentication(decode_authentication(body).await?)
            }
            backend_tag::BACKEND_KEY_DATA => {
                let process_id = wire.read_i32().await?;
                let secret_key = wire.read_i32().await?;
                BackendMessage::BackendKeyData(SessionKey::new(process_id, secret_key))
            }
            backend_tag::BIND_COMPLETE => BackendMessage::BindComplete,
            backend_tag::CLOSE_COMPLETE => BackendMessage::CloseComplete,
            backend_tag::COMMAND_COMPLETE => {
                BackendMessage::CommandComplete(CommandComplete::from_tag(wire.read_cstring().await?))
            }
            backend_tag::DATA_ROW => {
                let count = count_usize(wire.read_i16().await?, "column")?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = wire.read_i32().await?;
                    values.push(match len {
                        -1 => None,
                        n => Some(wire.read_bytes(value_len(n)?).await?),
                    });
                }
                BackendMessage::DataRow(DataRow { values })
            }
            backend_tag::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
            backend_tag::ERROR_RESPONSE => {
                BackendMessage::ErrorResponse(decode_error_fields(&mut wire).await?)
            }
            backend_tag::NO_DATA => BackendMessage::NoData,
            backend_tag::NOTICE_RESPONSE => {
                BackendMessage::NoticeResponse(decode_error_fields(&mut wire).await?)
            }
            backend_tag::PARAMETER_DESCRIPTION => {
                let count = count_usize(wire.read_i16().await?, "parameter")?;
                let mut type_oids = Vec::with_capacity(count);
                for _ in 0..count {
                    type_oids.push(wire.read_i32().await?);
                }
                BackendMessage::ParameterDescription(ParameterDescription { type_oids })
            }
            backend_tag::PARAMETER_STATUS => {
                let name = wire.read_cstring().await?;
                let value = wire.read_cstring().await?;
                BackendMessage::ParameterStatus(ParameterStatus { name, value })
            }
            backend_tag::PARSE_COMPLETE => BackendMessage::ParseComplete,
            backend_tag::PORTAL_SUSPENDED => BackendMessage::PortalSuspended,
            backend_tag::READY_FOR_QUERY => {
                let ready = ReadyForQuery {
                    indicator: wire.read_u8().await?,
                };
                ready
                    .status()
                    .map_err(|err| ProtocolError::Malformed(err.to_string()))?;
                BackendMessage::ReadyForQuery(ready)
            }
            backend_tag::ROW_DESCRIPTION => {
                let count = count_usize(wire.read_i16().await?, "field")?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(ColumnDescriptor {
                        name: wire.read_cstring().await?,
                        table_oid: wire.read_i32().await?,
                        column_attr: wire.read_i16().await?,
                        type_oid: wire.read_i32().await?,
                        type_size: wire.read_i16().await?,
                        type_modifier: wire.read_i32().await?,
                        format_code: wire.read_i16().await?,
                    });
                }
                BackendMessage::RowDescription(RowDescription { fields })
            }
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "unknown backend message type {:?}",
                    other as char
                )))
            }
        };
        Ok(message)
    }
}

/// Encodes `message` and flushes it to the stream.
pub async fn write_message<S: AsyncWrite + Unpin>(
    wire: &mut WireCodec<S>,
    message: &BackendMessage,
) -> Result<(), ProtocolError> {
    message.encode(wire)?;
    wire.flush().await
}

/// Reads one server message; used by clients and tests.
pub async fn read_message<S: AsyncRead + Unpin>(
    wire: &mut WireCodec<S>,
) -> Result<BackendMessage, ProtocolError> {
    let (tag, body) = wire.read_frame().await?;
    BackendMessage::decode(tag, &body).await
}

fn encode_authentication<S>(
    wire: &mut WireCodec<S>,
    auth: &Authentication,
) -> Result<(), ProtocolError> {
    // Every variant carries its Int32 request code ahead of the payload.
    let payload: Vec<u8> = match auth {
        Authentication::Md5Password { salt } => salt.to_vec(),
        Authentication::GssContinue { data }
        | Authentication::SaslContinue { data }
        | Authentication::SaslFinal { data } => data.clone(),
        Authentication::Sasl { mechanisms } => {
            let mut list = Vec::new();
            for mechanism in mechanisms {
                if mechanism.is_empty() || mechanism.as_bytes().contains(&0) {
                    return Err(ProtocolError::Malformed(format!(
                        "invalid SASL mechanism name {mechanism:?}"
                    )));
                }
                list.extend_from_slice(mechanism.as_bytes());
                list.push(0);
            }
            list.push(0);
            list
        }
        _ => Vec::new(),
    };
    wire.write_u8(backend_tag::AUTHENTICATION)
        .write_i32(declared_length(4 + payload.len())?)
        .write_i32(auth.code())
        .write_bytes(&payload);
    Ok(())
}

async fn decode_authentication(body: &[u8]) -> Result<Authentication, ProtocolError> {
    let mut wire = WireCodec::new(body);
    let code = wire.read_i32().await?;
    let rest = body.get(4..).unwrap_or_default().to_vec();
    let auth = match code {
        auth_code::OK => Authentication::Ok,
        auth_code::KERBEROS_V5 => Authentication::KerberosV5,
        auth_code::CLEARTEXT_PASSWORD => Authentication::CleartextPassword,
        auth_code::MD5_PASSWORD => {
            let salt: [u8; 4] = rest.as_slice().try_into().map_err(|_| {
                ProtocolError::Malformed(format!("MD5 salt must be 4 bytes, got {}", rest.len()))
            })?;
            Authentication::Md5Password { salt }
        }
        auth_code::SCM_CREDENTIAL => Authentication::ScmCredential,
        auth_code::GSS => Authentication::Gss,
        auth_code::GSS_CONTINUE => Authentication::GssContinue { data: rest },
        auth_code::SSPI => Authentication::Sspi,
        auth_code::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let mechanism = wire.read_cstring().await?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            Authentication::Sasl { mechanisms }
        }
        auth_code::SASL_CONTINUE => Authentication::SaslContinue { data: rest },
        auth_code::SASL_FINAL => Authentication::SaslFinal { data: rest },
        other => {
            return Err(ProtocolError::Malformed(format!(
                "unknown authentication request {other}"
            )))
        }
    };
    Ok(auth)
}

fn encode_command_complete<S>(
    wire: &mut WireCodec<S>,
    complete: &CommandComplete,
) -> Result<(), ProtocolError> {
    let tag = complete.tag().ok_or_else(|| {
        ProtocolError::Validation(
            "CommandComplete has no tag, call one of insert/delete/update/select_or_create/move_cursor/fetch/copy first".into(),
        )
    })?;
    wire.write_u8(backend_tag::COMMAND_COMPLETE)
        .write_i32(declared_length(cstring_len(tag))?)
        .write_cstring(tag)?;
    Ok(())
}

fn encode_data_row<S>(wire: &mut WireCodec<S>, row: &DataRow) -> Result<(), ProtocolError> {
    let count = count_i16(row.values.len(), "columns")?;
    let body_len: usize = 2 + row
        .values
        .iter()
        .map(|value| 4 + value.as_ref().map_or(0, Vec::len))
        .sum::<usize>();
    wire.write_u8(backend_tag::DATA_ROW)
        .write_i32(declared_length(body_len)?)
        .write_i16(count);
    for value in &row.values {
        match value {
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    ProtocolError::Malformed(format!("column value of {} bytes", bytes.len()))
                })?;
                wire.write_i32(len).write_bytes(bytes);
            }
            None => {
                wire.write_i32(-1);
            }
        }
    }
    Ok(())
}

fn encode_error_fields<S>(
    wire: &mut WireCodec<S>,
    tag: u8,
    response: &ErrorResponse,
) -> Result<(), ProtocolError> {
    // Fields are code byte + string, the list ends with one zero byte.
    let body_len: usize = 1 + response
        .fields
        .iter()
        .map(|field| 1 + cstring_len(&field.value))
        .sum::<usize>();
    wire.write_u8(tag).write_i32(declared_length(body_len)?);
    for field in &response.fields {
        if field.code == 0 {
            return Err(ProtocolError::Malformed("error field code must not be zero".into()));
        }
        wire.write_u8(field.code).write_cstring(&field.value)?;
    }
    wire.write_u8(0);
    Ok(())
}

async fn decode_error_fields(wire: &mut WireCodec<&[u8]>) -> Result<ErrorResponse, ProtocolError> {
    let mut fields = Vec::new();
    loop {
        let code = wire.read_u8().await?;
        if code == 0 {
            break;
        }
        let value = wire.read_cstring().await?;
        fields.push(ErrorField { code, value });
    }
    Ok(ErrorResponse { fields })
}

fn encode_row_description<S>(
    wire: &mut WireCodec<S>,
    description: &RowDescription,
) -> Result<(), ProtocolError> {
    let count = count_i16(description.fields.len(), "fields")?;
    let body_len: usize = 2 + description
        .fields
        .iter()
        .map(RowDescription::field_size)
        .sum::<usize>();
    wire.write_u8(backend_tag::ROW_DESCRIPTION)
        .write_i32(declared_length(body_len)?)
        .write_i16(count);
    for field in &description.fields {
        wire.write_cstring(&field.name)?
            .write_i32(field.table_oid)
            .write_i16(field.column_attr)
            .write_i32(field.type_oid)
            .write_i16(field.type_size)
            .write_i32(field.type_modifier)
            .write_i16(field.format_code);
    }
    Ok(())
}

pub(crate) fn value_len(len: i32) -> Result<usize, ProtocolError> {
    usize::try_from(len)
        .map_err(|_| ProtocolError::Malformed(format!("invalid value length {len}")))
}
