//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// Backend message tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';
    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// Command complete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// Data row
    pub const DATA_ROW: u8 = b'D';
    /// Empty query response
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';
    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';
    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// Row description
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Frontend message tags
pub mod frontend {
    /// Password / SASL response
    pub const PASSWORD: u8 = b'p';
    /// Simple query
    pub const QUERY: u8 = b'Q';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Authentication request codes
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;
    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;
    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;
    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;
    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;
}

/// SQLSTATE codes the pool reacts to
pub mod sqlstate {
    /// invalid_catalog_name: the database does not exist
    pub const INVALID_CATALOG_NAME: &str = "3D000";
    /// Class 28: invalid authorization specification
    pub const INVALID_AUTHORIZATION_CLASS: &str = "28";
}
