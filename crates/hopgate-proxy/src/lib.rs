pub mod bridge;
pub mod connector;
pub mod dialer;
pub mod engine;
pub mod error;
pub mod route_cache;
pub mod rules;
pub mod selector;
pub mod traffic;
pub mod tunnel;

pub use engine::Engine;
pub use error::{ProxyError, Result};
pub use rules::Rules;
pub use tunnel::Tunnel;
