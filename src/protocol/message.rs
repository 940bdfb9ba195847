//! Protocol message types

use crate::error::ServerError;
use bytes::Bytes;

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters
        params: Vec<(String, String)>,
    },

    /// Cleartext password
    Password(String),

    /// Simple query
    Query(String),

    /// SASL initial response
    SaslInitialResponse {
        /// SASL mechanism name (e.g., "SCRAM-SHA-256")
        mechanism: String,
        /// Client first message
        data: Vec<u8>,
    },

    /// SASL response
    SaslResponse(Vec<u8>),

    /// Terminate
    Terminate,
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Command complete, carrying the command tag (e.g. `UPDATE 3`)
    CommandComplete(String),

    /// Data row (text format)
    DataRow(Vec<Option<Bytes>>),

    /// Response to an empty query string
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ServerError),

    /// Notice response
    NoticeResponse(ServerError),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },

    /// Row description (column names)
    RowDescription(Vec<String>),
}

/// Authentication message types
#[derive(Debug, Clone)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required
    Md5Password,
    /// SASL mechanisms offered by the server
    Sasl(Vec<String>),
    /// SASL server challenge
    SaslContinue(Vec<u8>),
    /// SASL server verification
    SaslFinal(Vec<u8>),
}
