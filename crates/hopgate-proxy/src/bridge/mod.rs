pub mod chunked;
mod http_bridge;
mod socket_bridge;

pub use http_bridge::HttpBridge;
pub use socket_bridge::SocketBridge;

use std::sync::atomic::{AtomicI32, Ordering};

/// Mirrors `pkg/core/bridge.go`'s status constants. Every transition is a
/// single atomic store, never a read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Failed = -1,
    Ready = 0,
    Connecting = 1,
    Transporting = 2,
    Disconnected = 3,
}

impl Status {
    fn from_raw(raw: i32) -> Self {
        match raw {
            -1 => Status::Failed,
            0 => Status::Ready,
            1 => Status::Connecting,
            2 => Status::Transporting,
            _ => Status::Disconnected,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Failed => "failed",
            Status::Ready => "ready",
            Status::Connecting => "connecting",
            Status::Transporting => "transporting",
            Status::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

pub struct AtomicStatus(AtomicI32);

impl Default for AtomicStatus {
    fn default() -> Self {
        Self(AtomicI32::new(Status::Ready as i32))
    }
}

impl AtomicStatus {
    pub fn get(&self) -> Status {
        Status::from_raw(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as i32, Ordering::Relaxed);
    }
}
