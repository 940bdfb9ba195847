//! Protocol message encoding

use super::constants::frontend;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup has no tag byte
            framed(&mut buf, None, |body| {
                body.put_i32(*version);
                for (key, value) in params {
                    put_cstr(body, key);
                    put_cstr(body, value);
                }
                body.put_u8(0);
            });
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| put_cstr(body, password));
        }
        FrontendMessage::Query(query) => {
            framed(&mut buf, Some(frontend::QUERY), |body| put_cstr(body, query));
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| {
                put_cstr(body, mechanism);
                body.put_i32(data.len() as i32);
                body.put_slice(data);
            });
        }
        FrontendMessage::SaslResponse(data) => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| body.put_slice(data));
        }
        FrontendMessage::Terminate => {
            framed(&mut buf, Some(frontend::TERMINATE), |_| {});
        }
    }

    buf
}

/// Write `tag`, a length placeholder, the body, then patch the length.
///
/// The length counts itself but not the tag.
fn framed(buf: &mut BytesMut, tag: Option<u8>, body: impl FnOnce(&mut BytesMut)) {
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}
