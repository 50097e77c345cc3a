pub mod addr;
pub mod cidr;
pub mod config;
pub mod error;
pub mod geoip;
pub mod glob;

pub use config::{Config, GroupConfig, LatencyConfig, ProxyConfig, RouteConfig, RulesConfig};
pub use error::{HopgateError, Result};
pub use geoip::GeoIpDb;
