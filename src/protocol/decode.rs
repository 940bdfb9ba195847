//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage};
use crate::error::ServerError;
use bytes::{Bytes, BytesMut};
use std::io;

/// Maximum message length (1 GB), matching PostgreSQL's `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Length headers above this are rejected before any allocation.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Decode one backend message from the front of `data`.
///
/// Returns the message and the number of bytes it occupied; the caller
/// advances the buffer. An `UnexpectedEof` error means more bytes are needed.
pub fn decode_message(data: &BytesMut) -> io::Result<(BackendMessage, usize)> {
    if data.len() < 5 {
        return Err(eof("message header"));
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(invalid(format!("message length {} is too small", len)));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }
    if data.len() < len + 1 {
        return Err(eof("message body"));
    }

    let mut body = Reader::new(&data[5..len + 1]);
    let msg = match tag {
        tags::AUTHENTICATION => BackendMessage::Authentication(decode_authentication(&mut body)?),
        tags::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: body.i32()?,
            secret_key: body.i32()?,
        },
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(body.cstr()?),
        tags::DATA_ROW => decode_data_row(&mut body)?,
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(&mut body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(&mut body)?),
        tags::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: body.cstr()?,
            value: body.cstr()?,
        },
        tags::READY_FOR_QUERY => BackendMessage::ReadyForQuery { status: body.u8()? },
        tags::ROW_DESCRIPTION => decode_row_description(&mut body)?,
        other => return Err(invalid(format!("unknown message tag: 0x{:02X}", other))),
    };

    Ok((msg, len + 1))
}

fn decode_authentication(body: &mut Reader<'_>) -> io::Result<AuthenticationMessage> {
    let msg = match body.i32()? {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => AuthenticationMessage::Md5Password,
        auth::SASL => {
            let mut mechanisms = Vec::new();
            while !body.is_empty() {
                let mechanism = body.cstr()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl(mechanisms)
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue(body.rest().to_vec()),
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal(body.rest().to_vec()),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported auth type: {}", other),
            ))
        }
    };
    Ok(msg)
}

fn decode_data_row(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let len = body.i32()?;
        if len < 0 {
            fields.push(None);
        } else {
            fields.push(Some(Bytes::copy_from_slice(body.take(len as usize)?)));
        }
    }
    Ok(BackendMessage::DataRow(fields))
}

fn decode_row_description(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16()?.max(0) as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(body.cstr()?);
        // table oid, attr number, type oid, type size, type modifier, format
        body.take(18)?;
    }
    Ok(BackendMessage::RowDescription(names))
}

fn decode_error_fields(body: &mut Reader<'_>) -> io::Result<ServerError> {
    let mut fields = ServerError::default();
    loop {
        let field_type = body.u8()?;
        if field_type == 0 {
            break;
        }
        let value = body.cstr()?;
        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

/// Bounds-checked cursor over a message body
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(eof("field data"));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> io::Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> io::Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> io::Result<String> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("missing null terminator in string".into()))?;
        let s = String::from_utf8_lossy(&self.data[..end]).into_owned();
        self.data = &self.data[end + 1..];
        Ok(s)
    }
}

fn eof(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("incomplete {}", what))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[tag]);
        buf.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_decode_authentication_ok() {
        let data = frame(b'R', &[0, 0, 0, 0]);
        let (msg, consumed) = decode_message(&data).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::Ok)
        ));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_decode_sasl_mechanisms() {
        let data = frame(b'R', b"\0\0\0\x0aSCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");
        let (msg, _) = decode_message(&data).unwrap();
        match msg {
            BackendMessage::Authentication(AuthenticationMessage::Sasl(mechs)) => {
                assert_eq!(mechs, vec!["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"]);
            }
            other => panic!("expected SASL, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response_fields() {
        let data = frame(
            b'E',
            b"SFATAL\0C3D000\0Mdatabase \"nope\" does not exist\0\0",
        );
        let (msg, _) = decode_message(&data).unwrap();
        match msg {
            BackendMessage::ErrorResponse(err) => {
                assert_eq!(err.severity.as_deref(), Some("FATAL"));
                assert_eq!(err.code.as_deref(), Some("3D000"));
                assert_eq!(err.message, "database \"nope\" does not exist");
            }
            other => panic!("expected ErrorResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_data_row_with_null() {
        let data = frame(b'D', &[0, 2, 0, 0, 0, 2, b'4', b'2', 0xFF, 0xFF, 0xFF, 0xFF]);
        let (msg, _) = decode_message(&data).unwrap();
        match msg {
            BackendMessage::DataRow(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].as_deref(), Some(&b"42"[..]));
                assert!(fields[1].is_none());
            }
            other => panic!("expected DataRow, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_row_description_names() {
        let mut body = vec![0, 1];
        body.extend_from_slice(b"id\0");
        body.extend_from_slice(&[0u8; 18]);
        let data = frame(b'T', &body);
        let (msg, _) = decode_message(&data).unwrap();
        match msg {
            BackendMessage::RowDescription(names) => assert_eq!(names, vec!["id"]),
            other => panic!("expected RowDescription, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete_body_is_eof() {
        let mut data = frame(b'C', b"UPDATE 3\0");
        data.truncate(data.len() - 2);
        let err = decode_message(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_rejects_oversized_message() {
        let oversized = ((MAX_MESSAGE_LENGTH as i32) + 1).to_be_bytes();
        let data = BytesMut::from(&[b'D', oversized[0], oversized[1], oversized[2], oversized[3]][..]);
        let err = decode_message(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
