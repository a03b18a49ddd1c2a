// Stream dispatch layer: per-connection stream table, named-stream registry, and
// the application hooks external code can plug in through

mod application;
mod connection;
mod named_stream;
mod stream;

pub use application::*;
pub use connection::*;
pub use named_stream::*;
pub use stream::*;
