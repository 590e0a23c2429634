//! A minimal MySQL client core: packet framing, the text and binary
//! value codecs, and a serial connection with streaming result sets.

pub mod constant;
pub mod error;
mod opts;
mod prepared;
pub mod protocol;
mod value;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use error::{Error, Result};
pub use opts::Opts;
pub use prepared::PreparedStatement;
pub use value::{Date, DateTime, Time, Value};
