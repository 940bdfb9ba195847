//! Postgres connections
//!
//! This module handles:
//! * Transport abstraction (TCP vs Unix socket)
//! * Connection lifecycle (startup, auth, query execution)
//! * State machine enforcement
//! * The [`PgDriver`] the pool opens connections through

mod conn;
mod pg;
mod state;
mod transport;

pub use conn::Connection;
pub use pg::PgDriver;
pub use state::ConnectionState;
pub use transport::Transport;
