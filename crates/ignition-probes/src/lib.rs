//! Concrete [`ignition_core::Signal`] leaves: each probe is a leaf
//! implementation of the signal contract, not part of the core. Each does
//! exactly one fallible async operation and leaves retries, timeouts, and
//! cancellation to `ignition-core`.

mod http;
mod postgres;
mod tcp;

pub use http::HttpGetSignal;
pub use postgres::PostgresPingSignal;
pub use tcp::TcpConnectSignal;
