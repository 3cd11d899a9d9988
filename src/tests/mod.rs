
pub use connection_tests::{EndpointProber, ProbeResult};
