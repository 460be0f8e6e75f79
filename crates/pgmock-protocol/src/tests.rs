#[cfg(test)]
mod tests {
    use crate::backend::{read_message, write_message};
    use crate::codec::WireCodec;
    use crate::messages::{
        backend_tag, error_field, frontend_tag, Authentication, BackendMessage, Bind, Close,
        CommandComplete, DataRow, Describe, ErrorResponse, Execute, FrontendMessage,
        NegotiationCode, ParameterDescription, ParameterStatus, Parse, Query, ReadyForQuery,
        RowDescription, StartupMessage, StartupPacket, Target, TransactionStatus,
        CANCEL_REQUEST_CODE, PROTOCOL_VERSION_3, SSL_REQUEST_CODE,
    };
    use crate::ProtocolError;
    use pgmock_core::{type_oid, ColumnDescriptor, SessionKey};
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn encode_backend(message: &BackendMessage) -> Vec<u8> {
        let mut wire = WireCodec::new(());
        message.encode(&mut wire).expect("encode");
        wire.take_pending().to_vec()
    }

    fn encode_frontend(message: &FrontendMessage) -> Vec<u8> {
        let mut wire = WireCodec::new(());
        message.encode(&mut wire).expect("encode");
        wire.take_pending().to_vec()
    }

    fn assert_framed(bytes: &[u8]) {
        let declared = i32::from_be_bytes(bytes[1..5].try_into().expect("length"));
        assert_eq!(declared as usize, bytes.len() - 1, "frame {bytes:?}");
    }

    fn text_field(name: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid: type_oid::TEXT,
            type_size: -1,
            type_modifier: 0,
            format_code: 0,
        }
    }

    fn backend_catalog() -> Vec<BackendMessage> {
        let mut complete = CommandComplete::new();
        complete.insert(0, 3);
        vec![
            BackendMessage::Authentication(Authentication::Ok),
            BackendMessage::Authentication(Authentication::KerberosV5),
            BackendMessage::Authentication(Authentication::CleartextPassword),
            BackendMessage::Authentication(Authentication::Md5Password { salt: [1, 2, 3, 4] }),
            BackendMessage::Authentication(Authentication::ScmCredential),
            BackendMessage::Authentication(Authentication::Gss),
            BackendMessage::Authentication(Authentication::GssContinue {
                data: b"gss-token".to_vec(),
            }),
            BackendMessage::Authentication(Authentication::Sspi),
            BackendMessage::Authentication(Authentication::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into(), "SCRAM-SHA-256-PLUS".into()],
            }),
            BackendMessage::Authentication(Authentication::SaslContinue {
                data: b"r=nonce,s=salt,i=4096".to_vec(),
            }),
            BackendMessage::Authentication(Authentication::SaslFinal {
                data: b"v=signature".to_vec(),
            }),
            BackendMessage::BackendKeyData(SessionKey::new(42, 7)),
            BackendMessage::BindComplete,
            BackendMessage::CloseComplete,
            BackendMessage::CommandComplete(complete),
            BackendMessage::DataRow(DataRow {
                values: vec![Some(b"1".to_vec()), None, Some(Vec::new())],
            }),
            BackendMessage::EmptyQueryResponse,
            BackendMessage::ErrorResponse(ErrorResponse::query_canceled()),
            BackendMessage::NoData,
            BackendMessage::NoticeResponse(
                ErrorResponse::new()
                    .field(error_field::SEVERITY, "NOTICE")
                    .field(error_field::MESSAGE, "relation exists, skipping"),
            ),
            BackendMessage::ParameterDescription(ParameterDescription {
                type_oids: vec![type_oid::INT4, type_oid::TEXT],
            }),
            BackendMessage::ParameterStatus(ParameterStatus {
                name: "server_version".into(),
                value: "14.0".into(),
            }),
            BackendMessage::ParseComplete,
            BackendMessage::PortalSuspended,
            BackendMessage::ReadyForQuery(ReadyForQuery::new(TransactionStatus::InTransaction)),
            BackendMessage::RowDescription(RowDescription {
                fields: vec![
                    ColumnDescriptor::new("id", type_oid::INT4, 4),
                    text_field("name"),
                ],
            }),
        ]
    }

    fn frontend_catalog() -> Vec<FrontendMessage> {
        vec![
            FrontendMessage::Bind(Bind {
                portal: "p1".into(),
                statement: "s1".into(),
                param_formats: vec![0, 1],
                params: vec![Some(b"42".to_vec()), None],
                result_formats: vec![1],
            }),
            FrontendMessage::Close(Close {
                target: Target::Portal,
                name: "p1".into(),
            }),
            FrontendMessage::Describe(Describe {
                target: Target::Statement,
                name: "s1".into(),
            }),
            FrontendMessage::Execute(Execute {
                portal: "p1".into(),
                max_rows: 0,
            }),
            FrontendMessage::Flush,
            FrontendMessage::Parse(Parse {
                statement: "s1".into(),
                sql: "SELECT $1".into(),
                param_types: vec![type_oid::INT4],
            }),
            FrontendMessage::Query(Query {
                sql: "SELECT 1".into(),
            }),
            FrontendMessage::Sync,
            FrontendMessage::Terminate,
        ]
    }

    #[tokio::test]
    async fn cstring_has_single_terminator_and_reads_back_exactly() {
        let mut wire = WireCodec::new(());
        wire.write_cstring("hello").expect("write").write_u8(9);
        let bytes = wire.take_pending().to_vec();
        assert_eq!(bytes, b"hello\0\x09".to_vec());

        let mut reader = WireCodec::new(bytes.as_slice());
        assert_eq!(reader.read_cstring().await.expect("string"), "hello");
        assert_eq!(reader.read_u8().await.expect("byte"), 9);
    }

    #[test]
    fn cstring_rejects_embedded_nul() {
        let mut wire = WireCodec::new(());
        assert!(matches!(
            wire.write_cstring("a\0b"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(wire.pending().is_empty());
    }

    #[tokio::test]
    async fn cstring_ends_at_end_of_stream() {
        let mut wire = WireCodec::new(&b"unterminated"[..]);
        assert_eq!(wire.read_cstring().await.expect("string"), "unterminated");
        assert_eq!(wire.read_cstring().await.expect("empty"), "");
    }

    #[tokio::test]
    async fn read_bytes_zero_does_not_touch_stream() {
        let mut wire = WireCodec::new(tokio::io::empty());
        assert!(wire.read_bytes(0).await.expect("empty").is_empty());
        let err = wire.read_bytes(1).await.expect_err("eof");
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn integers_are_big_endian() {
        let mut wire = WireCodec::new(());
        wire.write_i16(-2).write_i32(0x0102_0304).write_i64(-1);
        let bytes = wire.take_pending().to_vec();
        assert_eq!(
            bytes,
            vec![0xFF, 0xFE, 1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let mut reader = WireCodec::new(bytes.as_slice());
        assert_eq!(reader.read_i16().await.expect("i16"), -2);
        assert_eq!(reader.read_i32().await.expect("i32"), 0x0102_0304);
        assert_eq!(reader.read_i64().await.expect("i64"), -1);
    }

    #[test]
    fn failed_message_leaves_no_partial_output() {
        let mut wire = WireCodec::new(());
        BackendMessage::ParseComplete.encode(&mut wire).expect("encode");
        let err = BackendMessage::CommandComplete(CommandComplete::from_tag("bad\0tag"))
            .encode(&mut wire)
            .expect_err("embedded nul");
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(wire.pending(), &[backend_tag::PARSE_COMPLETE, 0, 0, 0, 4][..]);
    }

    #[tokio::test]
    async fn read_length_rejects_short_and_oversized_frames() {
        let short = [b'Q', 0, 0, 0, 3];
        let mut wire = WireCodec::new(&short[..]);
        assert!(matches!(
            wire.read_frame().await,
            Err(ProtocolError::Malformed(_))
        ));

        let large = [b'Q', 0, 0, 1, 0];
        let mut wire = WireCodec::new(&large[..]).with_max_message_length(64);
        assert!(matches!(
            wire.read_frame().await,
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn flush_writes_buffered_messages_to_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut wire = WireCodec::new(server);
        write_message(&mut wire, &BackendMessage::Authentication(Authentication::Ok))
            .await
            .expect("write");
        assert!(wire.pending().is_empty());
        let mut bytes = [0u8; 9];
        client.read_exact(&mut bytes).await.expect("read");
        assert_eq!(bytes, [b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn authentication_requests_carry_their_codes() {
        assert_eq!(
            encode_backend(&BackendMessage::Authentication(Authentication::CleartextPassword)),
            vec![b'R', 0, 0, 0, 8, 0, 0, 0, 3]
        );
        assert_eq!(
            encode_backend(&BackendMessage::Authentication(Authentication::Md5Password {
                salt: [1, 2, 3, 4]
            })),
            vec![b'R', 0, 0, 0, 12, 0, 0, 0, 5, 1, 2, 3, 4]
        );
        assert_eq!(
            encode_backend(&BackendMessage::Authentication(Authentication::Sspi)),
            vec![b'R', 0, 0, 0, 8, 0, 0, 0, 9]
        );
        assert_eq!(
            encode_backend(&BackendMessage::Authentication(Authentication::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into()],
            })),
            [
                &[b'R', 0, 0, 0, 23, 0, 0, 0, 10][..],
                &b"SCRAM-SHA-256\0\0"[..],
            ]
            .concat()
        );
    }

    #[test]
    fn backend_key_data_layout() {
        assert_eq!(
            encode_backend(&BackendMessage::BackendKeyData(SessionKey::new(1, -1))),
            vec![b'K', 0, 0, 0, 12, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn empty_messages_are_type_and_length_only() {
        assert_eq!(encode_backend(&BackendMessage::BindComplete), vec![b'2', 0, 0, 0, 4]);
        assert_eq!(encode_backend(&BackendMessage::CloseComplete), vec![b'3', 0, 0, 0, 4]);
        assert_eq!(encode_backend(&BackendMessage::ParseComplete), vec![b'1', 0, 0, 0, 4]);
        assert_eq!(encode_backend(&BackendMessage::NoData), vec![b'n', 0, 0, 0, 4]);
    }

    #[test]
    fn command_complete_requires_tag() {
        let mut complete = CommandComplete::new();
        let mut wire = WireCodec::new(());
        let err = BackendMessage::CommandComplete(complete.clone())
            .encode(&mut wire)
            .expect_err("no tag");
        assert!(matches!(err, ProtocolError::Validation(_)));
        assert!(wire.pending().is_empty());

        complete.insert(1, 2);
        assert_eq!(complete.tag(), Some("INSERT 1 2"));
        complete.delete(1);
        assert_eq!(complete.tag(), Some("DELETE 1"));
        complete.update(1);
        assert_eq!(complete.tag(), Some("UPDATE 1"));
        complete.move_cursor(1);
        assert_eq!(complete.tag(), Some("MOVE 1"));
        complete.fetch(1);
        assert_eq!(complete.tag(), Some("FETCH 1"));
        complete.copy(1);
        assert_eq!(complete.tag(), Some("COPY 1"));
        complete.select_or_create(1);
        assert_eq!(complete.tag(), Some("SELECT 1"));

        let bytes = encode_backend(&BackendMessage::CommandComplete(complete));
        assert_eq!(bytes, [&[b'C', 0, 0, 0, 13][..], &b"SELECT 1\0"[..]].concat());
    }

    #[test]
    fn ready_for_query_validates_indicator() {
        for indicator in [0u8, b'X', b'i'] {
            let mut wire = WireCodec::new(());
            let err = BackendMessage::ReadyForQuery(ReadyForQuery { indicator })
                .encode(&mut wire)
                .expect_err("invalid indicator");
            assert!(matches!(err, ProtocolError::Validation(_)));
            assert!(wire.pending().is_empty());
        }
        for indicator in [b'I', b'T', b'E'] {
            assert_eq!(
                encode_backend(&BackendMessage::ReadyForQuery(ReadyForQuery { indicator })),
                vec![b'Z', 0, 0, 0, 5, indicator]
            );
        }
    }

    #[test]
    fn error_response_layout() {
        let response = ErrorResponse::new()
            .field(b'S', "ERROR")
            .field(b'V', "ERROR")
            .field(b'C', "57014")
            .field(b'M', "--error-string--");
        let bytes = encode_backend(&BackendMessage::ErrorResponse(response));
        let expected = [
            &[b'E', 0, 0, 0, 44][..],
            &b"SERROR\0"[..],
            &b"VERROR\0"[..],
            &b"C57014\0"[..],
            &b"M--error-string--\0"[..],
            &[0][..],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn data_row_layout() {
        let row = DataRow {
            values: vec![Some(b"test".to_vec())],
        };
        assert_eq!(
            encode_backend(&BackendMessage::DataRow(row)),
            vec![b'D', 0, 0, 0, 14, 0, 1, 0, 0, 0, 4, b't', b'e', b's', b't']
        );
        let row = DataRow { values: vec![None] };
        assert_eq!(
            encode_backend(&BackendMessage::DataRow(row)),
            vec![b'D', 0, 0, 0, 10, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn row_description_layout() {
        let description = RowDescription {
            fields: vec![text_field("test")],
        };
        assert_eq!(RowDescription::field_size(&description.fields[0]), 23);
        assert_eq!(
            encode_backend(&BackendMessage::RowDescription(description)),
            vec![
                b'T', 0, 0, 0, 29, // length
                0, 1, // field count
                b't', b'e', b's', b't', 0, // name
                0, 0, 0, 0, // table oid
                0, 0, // column attribute
                0, 0, 0, 25, // type oid
                0xFF, 0xFF, // type size
                0, 0, 0, 0, // type modifier
                0, 0, // format code
            ]
        );
    }

    #[test]
    fn parameter_description_layout() {
        let description = ParameterDescription {
            type_oids: vec![type_oid::INT4],
        };
        assert_eq!(
            encode_backend(&BackendMessage::ParameterDescription(description)),
            vec![b't', 0, 0, 0, 10, 0, 1, 0, 0, 0, 23]
        );
    }

    #[test]
    fn every_message_declares_its_own_length() {
        for message in backend_catalog() {
            assert_framed(&encode_backend(&message));
        }
        for message in frontend_catalog() {
            assert_framed(&encode_frontend(&message));
        }
    }

    #[tokio::test]
    async fn backend_messages_round_trip() {
        for message in backend_catalog() {
            let bytes = encode_backend(&message);
            let decoded = BackendMessage::decode(bytes[0], &bytes[5..])
                .await
                .expect("decode");
            assert_eq!(decoded, message);
        }
    }

    #[tokio::test]
    async fn frontend_messages_round_trip() {
        for message in frontend_catalog() {
            let bytes = encode_frontend(&message);
            let decoded = FrontendMessage::decode(bytes[0], &bytes[5..])
                .await
                .expect("decode");
            assert_eq!(decoded, message);
        }
    }

    #[tokio::test]
    async fn read_message_decodes_from_stream() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut bytes = encode_backend(&BackendMessage::ParseComplete);
        bytes.extend(encode_backend(&BackendMessage::ReadyForQuery(ReadyForQuery::idle())));
        server.write_all(&bytes).await.expect("write");

        let mut wire = WireCodec::new(client);
        assert_eq!(
            read_message(&mut wire).await.expect("first"),
            BackendMessage::ParseComplete
        );
        assert_eq!(
            read_message(&mut wire).await.expect("second"),
            BackendMessage::ReadyForQuery(ReadyForQuery::idle())
        );
    }

    #[tokio::test]
    async fn bind_decodes_parameters_and_format_codes() {
        let mut wire = WireCodec::new(());
        wire.write_cstring("--portal--")
            .expect("portal")
            .write_cstring("--statement--")
            .expect("statement")
            .write_i16(2)
            .write_i16(123)
            .write_i16(234)
            .write_i16(2)
            .write_i32(9)
            .write_bytes(b"--valu1--")
            .write_i32(9)
            .write_bytes(b"--valu2--")
            .write_i16(2)
            .write_i16(123)
            .write_i16(234);
        let body = wire.take_pending().to_vec();

        let message = FrontendMessage::decode(frontend_tag::BIND, &body)
            .await
            .expect("decode");
        let FrontendMessage::Bind(bind) = message else {
            panic!("expected bind");
        };
        assert_eq!(bind.portal, "--portal--");
        assert_eq!(bind.statement, "--statement--");
        assert_eq!(bind.params.len(), 2);
        assert_eq!(bind.params[0].as_deref(), Some(&b"--valu1--"[..]));
        assert_eq!(bind.params[1].as_deref(), Some(&b"--valu2--"[..]));
        assert_eq!(bind.param_format(0), Some(123));
        assert_eq!(bind.param_format(1), Some(234));
        assert_eq!(bind.result_format(0), Some(123));
        assert_eq!(bind.result_format(1), Some(234));
    }

    #[test]
    fn bind_format_codes_broadcast() {
        let mut bind = Bind {
            params: vec![None, None, None],
            ..Bind::default()
        };
        assert_eq!(bind.param_format(0), None);
        assert_eq!(bind.result_format(2), None);

        bind.param_formats = vec![1];
        bind.result_formats = vec![0];
        assert_eq!(bind.param_format(0), Some(1));
        assert_eq!(bind.param_format(2), Some(1));
        assert_eq!(bind.result_format(5), Some(0));
    }

    #[tokio::test]
    async fn bind_null_parameter_has_no_bytes() {
        let mut wire = WireCodec::new(());
        wire.write_cstring("").expect("portal");
        wire.write_cstring("").expect("statement");
        wire.write_i16(0).write_i16(1).write_i32(-1).write_i16(0);
        let body = wire.take_pending().to_vec();
        let message = FrontendMessage::decode(frontend_tag::BIND, &body)
            .await
            .expect("decode");
        let FrontendMessage::Bind(bind) = message else {
            panic!("expected bind");
        };
        assert_eq!(bind.params, vec![None]);
    }

    #[tokio::test]
    async fn bind_rejects_mismatched_format_count() {
        let bind = Bind {
            param_formats: vec![0, 0],
            params: vec![None, None, None],
            ..Bind::default()
        };
        let bytes = encode_frontend(&FrontendMessage::Bind(bind));
        assert!(matches!(
            FrontendMessage::decode(frontend_tag::BIND, &bytes[5..]).await,
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn describe_and_close_read_target() {
        let body = b"S--statement--\0";
        let message = FrontendMessage::decode(frontend_tag::DESCRIBE, body)
            .await
            .expect("describe");
        assert_eq!(
            message,
            FrontendMessage::Describe(Describe {
                target: Target::Statement,
                name: "--statement--".into(),
            })
        );
        let message = FrontendMessage::decode(frontend_tag::CLOSE, b"Pportal\0")
            .await
            .expect("close");
        assert_eq!(
            message,
            FrontendMessage::Close(Close {
                target: Target::Portal,
                name: "portal".into(),
            })
        );
        assert!(FrontendMessage::decode(frontend_tag::DESCRIBE, b"Xname\0")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_frontend_tag_is_unsupported() {
        let message = FrontendMessage::decode(b'F', b"ignored")
            .await
            .expect("decode");
        assert_eq!(message, FrontendMessage::Unsupported { tag: b'F' });
    }

    #[tokio::test]
    async fn startup_parameters_stop_at_empty_key_or_value() {
        let params = StartupMessage::decode_parameters(b"key1\0val1\0key2\0val2")
            .await
            .expect("decode");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("key1").map(String::as_str), Some("val1"));
        assert_eq!(params.get("key2").map(String::as_str), Some("val2"));

        let params = StartupMessage::decode_parameters(b"user\0alice\0options\0\0database\0db\0\0")
            .await
            .expect("decode");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("user").map(String::as_str), Some("alice"));
        assert!(!params.contains_key("options"));
        assert!(!params.contains_key("database"));
    }

    #[test]
    fn negotiation_codes_split_into_halves() {
        assert_eq!(
            NegotiationCode::from_raw(SSL_REQUEST_CODE),
            NegotiationCode::SslRequest
        );
        assert_eq!(
            NegotiationCode::from_raw(CANCEL_REQUEST_CODE),
            NegotiationCode::CancelRequest
        );
        assert_eq!(
            NegotiationCode::from_raw(PROTOCOL_VERSION_3),
            NegotiationCode::Startup
        );
        assert_eq!(NegotiationCode::from_raw(196608), NegotiationCode::Startup);
        assert_eq!(
            NegotiationCode::from_raw(0x0002_0000),
            NegotiationCode::Unknown(0x0002_0000)
        );
    }

    #[tokio::test]
    async fn startup_packets_read_from_stream() {
        let mut parameters = BTreeMap::new();
        parameters.insert("user".to_string(), "alice".to_string());
        parameters.insert("database".to_string(), "mock".to_string());
        let packets = vec![
            StartupPacket::SslRequest,
            StartupPacket::GssEncRequest,
            StartupPacket::CancelRequest(SessionKey::new(12345, 54321)),
            StartupPacket::Startup(StartupMessage::new(parameters)),
            StartupPacket::Unsupported { code: 0x0002_0000 },
        ];
        let mut wire = WireCodec::new(());
        for packet in &packets {
            packet.encode(&mut wire).expect("encode");
        }
        let bytes = wire.take_pending().to_vec();

        let mut reader = WireCodec::new(bytes.as_slice());
        for packet in packets {
            assert_eq!(StartupPacket::read(&mut reader).await.expect("read"), packet);
        }
    }

    #[tokio::test]
    async fn cancel_request_layout() {
        let mut wire = WireCodec::new(());
        StartupPacket::CancelRequest(SessionKey::new(12345, 54321))
            .encode(&mut wire)
            .expect("encode");
        let bytes = wire.take_pending().to_vec();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &16i32.to_be_bytes());
        assert_eq!(&bytes[4..8], &CANCEL_REQUEST_CODE.to_be_bytes());

        let packet = StartupPacket::decode(CANCEL_REQUEST_CODE, &bytes[8..])
            .await
            .expect("decode");
        assert_eq!(packet, StartupPacket::CancelRequest(SessionKey::new(12345, 54321)));
    }

    #[tokio::test]
    async fn startup_packet_rejects_bad_length() {
        let bytes = [0, 0, 0, 4, 0, 3, 0, 0];
        let mut wire = WireCodec::new(&bytes[..]);
        assert!(matches!(
            StartupPacket::read(&mut wire).await,
            Err(ProtocolError::Malformed(_))
        ));
    }
}
