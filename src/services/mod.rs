pub mod identity;
pub mod relay;
pub mod sse;

pub use identity::IdentityResolver;
pub use relay::{ProxyRelayConfig, ProxyRelayService, RelayResponse, StreamRelay};
pub use sse::SseAccumulator;
