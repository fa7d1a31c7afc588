//! Infrastructure layer

pub mod backend;
pub mod stream;

pub use backend::{HttpBackend, ProcessBackend};
pub use stream::{EventStream, SseTransport, StreamTransport};
