//! Chat layer configuration.

use std::time::Duration;

use showroom_core::ConnectionConfig;

use crate::rooms::SyncConfig;

/// Upper bound on the runtime's sleep between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the chat session and its runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Base URL of the chat REST service.
    pub api_base_url: String,
    /// Fixed real-time URL; discovered via `GET /chat/realtime` when unset.
    pub realtime_url: Option<String>,
    /// Connection lifecycle tuning.
    pub connection: ConnectionConfig,
    /// Room synchronizer tuning.
    pub sync: SyncConfig,
    /// Longest the runtime sleeps without ticking the session.
    pub tick_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_owned(),
            realtime_url: None,
            connection: ConnectionConfig::default(),
            sync: SyncConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}
