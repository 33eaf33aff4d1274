//! Backend abstraction: real-time and offline session hosts.

use std::sync::Arc;

use crate::clock::{SystemClock, TestClock};
use crate::session::SessionReport;

pub mod headless;

pub use headless::{HeadlessConfig, Pacing};

/// Backend type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Wall clock; each tick sleeps for the tick period.
    Realtime,
    /// Simulated clock advanced by one tick period per tick; runs as fast
    /// as the machine allows.
    Offline,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "realtime" => Some(Self::Realtime),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Run one session with the selected backend.
pub fn run(backend: BackendType, config: HeadlessConfig) -> anyhow::Result<SessionReport> {
    match backend {
        BackendType::Realtime => headless::run(Arc::new(SystemClock), Pacing::Sleep, config),
        BackendType::Offline => {
            let clock = Arc::new(TestClock::new());
            headless::run(clock.clone(), Pacing::Advance(clock), config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_roundtrip() {
        for backend in [BackendType::Realtime, BackendType::Offline] {
            assert_eq!(BackendType::from_str(backend.as_str()), Some(backend));
        }
        assert_eq!(BackendType::from_str("drm"), None);
    }
}
