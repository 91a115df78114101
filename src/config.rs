//! Client configuration with tunable reconnect, heartbeat and retention settings.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::PulseError;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint of the realtime gateway (ws:// or wss://)
    pub url: String,
    /// Session token appended as the `token` query parameter (optional)
    pub auth_token: Option<String>,
    /// Delay before the first reconnect attempt (default: 3s)
    pub reconnect_interval: Duration,
    /// Growth factor applied per failed attempt (default: 1.5)
    pub backoff_multiplier: f64,
    /// Upper bound for a single reconnect delay (default: 30s)
    pub max_reconnect_delay: Duration,
    /// Attempts before giving up until the next explicit connect (default: 10)
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping period while open (default: 30s)
    pub heartbeat_interval: Duration,
    /// Handshake budget per attempt (default: 10s)
    pub connect_timeout: Duration,
    /// Envelopes held while offline before new sends are rejected (default: 1000)
    pub outbound_queue_capacity: usize,
    /// Capacity of the transport -> pipeline event channel (default: 256)
    pub event_channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            auth_token: None,
            reconnect_interval: Duration::from_secs(3),
            backoff_multiplier: 1.5,
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 1000,
            event_channel_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Create a new config builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Short delays for a gateway on the same host or LAN.
    pub fn fast_retry(url: &str) -> Self {
        Self {
            url: url.to_string(),
            reconnect_interval: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Parse the endpoint and attach the auth token if one is configured.
    pub fn endpoint(&self) -> Result<Url, PulseError> {
        let mut url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(PulseError::ConnectionError(format!(
                    "unsupported scheme '{}', expected ws or wss",
                    other
                )))
            }
        }
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

/// Builder pattern for TransportConfig.
#[derive(Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the gateway endpoint.
    pub fn url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    /// Set the session token.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.config.auth_token = Some(token.to_string());
        self
    }

    /// Set the base reconnect delay.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set the per-attempt growth factor.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Set the reconnect delay cap.
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    /// Set how many automatic attempts are made before giving up.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the heartbeat period.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the offline queue capacity.
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

/// Retention settings for the notification sink.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Records kept in memory before the oldest is evicted (default: 100)
    pub max_history: usize,
    /// Records older than this are evicted (default: 7 days)
    pub retention: Duration,
    /// JSON cache file; `None` disables persistence
    pub cache_path: Option<PathBuf>,
    /// Records written to the cache, most recent first (default: 50)
    pub cache_limit: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            cache_path: None,
            cache_limit: 50,
        }
    }
}

/// Top-level configuration for a [`crate::RealtimeClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub notifications: NotificationConfig,
    /// Accepted updates remembered per domain for activity feeds (default: 100)
    pub update_history: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            notifications: NotificationConfig::default(),
            update_history: 100,
        }
    }
}

impl ClientConfig {
    /// Default client settings against the given endpoint.
    pub fn new(url: &str) -> Self {
        Self {
            transport: TransportConfig::builder().url(url).build(),
            ..Default::default()
        }
    }

    /// Replace the transport settings.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the notification settings.
    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }
}
