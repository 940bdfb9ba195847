//! Postgres wire protocol (simple query subset)
//!
//! Only the messages needed to start a session, authenticate, run simple
//! queries and terminate are modelled here.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, FrontendMessage};
