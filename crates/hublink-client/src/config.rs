// Client-side defaults and environment override helpers.
use std::time::Duration;

/// Default per-request deadline when neither the caller nor the message
/// specifies one.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default cap before an outbound packet is flagged as oversized.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Hard floor for `max_packet_size` overrides.
///
/// Rationale: a misconfigured override below this would make routine control
/// traffic (handler registration lists, resubscription bursts) trip the
/// oversize path constantly. The transport still decides what it accepts.
pub const MIN_MAX_PACKET_SIZE: usize = 1_000_000;

/// Default expiry for `once` subscriptions whose event never arrives.
pub const DEFAULT_ONCE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Broker limits, read once at construction.
///
/// The environment adapter is a convenience; embedders that need different
/// sourcing construct the record themselves and pass it in.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Default per-request deadline.
    pub message_timeout: Duration,
    /// Outbound packets larger than this are logged at trace but still sent.
    pub max_packet_size: usize,
    /// When set, replaces every request's effective deadline.
    pub timeout_override: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            timeout_override: None,
        }
    }
}

impl BrokerConfig {
    /// Read overrides from the process environment.
    ///
    /// `BROKER_TIMEOUT` (ms, non-zero) pins every request deadline;
    /// `MAX_WS_PACKET_SIZE` (bytes) overrides the packet cap, floored at
    /// [`MIN_MAX_PACKET_SIZE`]. Absent or unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(millis) = read_u64_env("BROKER_TIMEOUT") {
            config.timeout_override = Some(Duration::from_millis(millis));
        }
        if let Some(bytes) = read_usize_env("MAX_WS_PACKET_SIZE") {
            config.max_packet_size = bytes.max(MIN_MAX_PACKET_SIZE);
        }
        config
    }

    /// Deadline for one request: the global override wins, then the
    /// call-site override, then the message's own timeout, then the default.
    pub(crate) fn effective_timeout(
        &self,
        call_override: Option<Duration>,
        message_timeout_ms: Option<u64>,
    ) -> Duration {
        if let Some(pinned) = self.timeout_override {
            return pinned;
        }
        call_override
            .or(message_timeout_ms.map(Duration::from_millis))
            .unwrap_or(self.message_timeout)
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
