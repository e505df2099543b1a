pub mod http;
pub mod types;

pub use http::HttpTransport;
pub use types::{Outcome, ProbeRequest};

/// Sends one request and reports what came back. Implementations never
/// return an error: every failure is an [`Outcome`] variant.
pub trait Transport {
    fn send(&self, req: &ProbeRequest) -> Outcome;
}
