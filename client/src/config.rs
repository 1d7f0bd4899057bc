use crate::realtime::RealtimeConfig;
use anyhow::{bail, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Runtime configuration for the sync client service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub build_id: String,
    /// WebSocket endpoint of the push server.
    pub push_url: String,
    pub user_id: String,
    pub token: Option<String>,
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let build_id = lookup("CHATSYNC_BUILD_ID").unwrap_or_else(|| Uuid::new_v4().to_string());
        let push_url = lookup("CHATSYNC_PUSH_URL").context("CHATSYNC_PUSH_URL must be set")?;
        check_push_scheme(&push_url)?;
        let user_id = lookup("CHATSYNC_USER_ID").context("CHATSYNC_USER_ID must be set")?;
        let token = lookup("CHATSYNC_TOKEN").filter(|token| !token.is_empty());

        let mut realtime = RealtimeConfig::default();
        if let Some(ms) = parsed::<u64>(&lookup, "CHATSYNC_HEARTBEAT_MS")? {
            realtime = realtime.with_heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parsed::<u64>(&lookup, "CHATSYNC_BACKOFF_BASE_MS")? {
            realtime = realtime.with_backoff_base(Duration::from_millis(ms));
        }
        if let Some(attempts) = parsed::<u32>(&lookup, "CHATSYNC_MAX_RECONNECT_ATTEMPTS")? {
            realtime = realtime.with_max_reconnect_attempts(attempts);
        }

        Ok(Self {
            host,
            port,
            build_id,
            push_url,
            user_id,
            token,
            realtime,
        })
    }
}

fn check_push_scheme(url: &str) -> anyhow::Result<()> {
    match url.split_once("://") {
        Some((scheme, rest)) if !rest.is_empty() => {
            if !scheme.eq_ignore_ascii_case("ws") && !scheme.eq_ignore_ascii_case("wss") {
                bail!("CHATSYNC_PUSH_URL must use ws:// or wss://, got {scheme}://");
            }
            Ok(())
        }
        _ => bail!("CHATSYNC_PUSH_URL is not a URL: {url}"),
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {name}: {raw}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CHATSYNC_PUSH_URL", "ws://push.local/ws"),
            ("CHATSYNC_USER_ID", "u1"),
        ]))
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(config.token.is_none());
        assert_eq!(config.realtime.heartbeat_interval, Duration::from_secs(4));
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
    }

    #[test]
    fn tuning_vars_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CHATSYNC_PUSH_URL", "ws://push.local/ws"),
            ("CHATSYNC_USER_ID", "u1"),
            ("CHATSYNC_TOKEN", "secret"),
            ("CHATSYNC_HEARTBEAT_MS", "1500"),
            ("CHATSYNC_MAX_RECONNECT_ATTEMPTS", "9"),
        ]))
        .unwrap();

        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.realtime.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(config.realtime.max_reconnect_attempts, 9);
    }

    #[test]
    fn missing_push_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("CHATSYNC_USER_ID", "u1")])).unwrap_err();
        assert!(err.to_string().contains("CHATSYNC_PUSH_URL"));
    }

    #[test]
    fn secure_push_urls_are_accepted() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CHATSYNC_PUSH_URL", "wss://push.example.com/ws"),
            ("CHATSYNC_USER_ID", "u1"),
        ]))
        .unwrap();
        assert_eq!(config.push_url, "wss://push.example.com/ws");
    }

    #[test]
    fn non_websocket_push_urls_are_rejected() {
        for url in ["https://push.example.com/ws", "push.example.com", "ws://"] {
            let err = AppConfig::from_lookup(lookup(&[
                ("CHATSYNC_PUSH_URL", url),
                ("CHATSYNC_USER_ID", "u1"),
            ]))
            .unwrap_err();
            assert!(err.to_string().contains("CHATSYNC_PUSH_URL"), "{url}: {err}");
        }
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("CHATSYNC_PUSH_URL", "ws://push.local/ws"),
            ("CHATSYNC_USER_ID", "u1"),
            ("CHATSYNC_BACKOFF_BASE_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHATSYNC_BACKOFF_BASE_MS"));
    }
}
