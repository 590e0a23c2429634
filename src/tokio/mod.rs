mod conn;
mod stream;

pub use conn::{BinaryQueryResult, Conn, TextQueryResult};
pub use stream::Stream;
