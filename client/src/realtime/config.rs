use std::time::Duration;

/// Tuning for the push connection.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Keepalive period in each direction.
    pub heartbeat_interval: Duration,
    /// Consecutive silent heartbeat periods tolerated before reconnecting.
    pub max_missed_heartbeats: u32,
    /// First reconnect delay; doubles on every further attempt.
    pub backoff_base: Duration,
    /// Optional cap on the reconnect delay.
    pub backoff_ceiling: Option<Duration>,
    /// Attempts before the manager parks in `Disconnected`.
    pub max_reconnect_attempts: u32,
    /// Bound on waiting for the auth ack and for channel join acks.
    pub handshake_timeout: Duration,
    /// Queued typing intents older than this are dropped instead of sent.
    pub typing_intent_ttl: Duration,
    /// Period of presence heartbeat intents while live; `None` disables them.
    pub presence_interval: Option<Duration>,
    /// Capacity of the command channel into the connection runtime.
    pub command_buffer: usize,
}

impl RealtimeConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_ceiling(mut self, ceiling: Duration) -> Self {
        self.backoff_ceiling = Some(ceiling);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_presence_interval(mut self, interval: Option<Duration>) -> Self {
        self.presence_interval = interval;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        match self.backoff_ceiling {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(4),
            max_missed_heartbeats: 2,
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: None,
            max_reconnect_attempts: 5,
            handshake_timeout: Duration::from_secs(10),
            typing_intent_ttl: Duration::from_secs(2),
            presence_interval: Some(Duration::from_secs(30)),
            command_buffer: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let config = RealtimeConfig::default();
        let delays: Vec<u64> = (1..=5).map(|a| config.backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn backoff_respects_ceiling() {
        let config = RealtimeConfig::default().with_backoff_ceiling(Duration::from_secs(5));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(5));
    }
}
