#![no_main]

use bytes::BytesMut;
use fraiseql_cluster::protocol::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // several backend messages may arrive in one read
    while !buf.is_empty() {
        match decode_message(&buf) {
            Ok((_, consumed)) if consumed > 0 => {
                let _ = buf.split_to(consumed);
            }
            _ => break,
        }
    }
});
