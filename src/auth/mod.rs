//! Authentication mechanisms

mod scram;

pub use scram::{ScramClient, ScramError};
