//! Runtime configuration loaded from environment variables (and `.env`).

use chrono::TimeDelta;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Tunables for lobby and round timing
#[derive(Debug, Clone)]
pub struct GameRules {
    pub min_players: usize,
    pub max_players: usize,
    /// Deadline handed out when a level starts
    pub level_deadline_seconds: u32,
    pub voting_seconds: u32,
    /// Display pause after a resolution before the controller moves on
    pub reveal_seconds: u32,
    pub max_hint_chars: usize,
    /// How often a writer re-reads and retries after losing a race
    pub cas_retries: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 10,
            level_deadline_seconds: 600,
            voting_seconds: 120,
            reveal_seconds: 5,
            max_hint_chars: 200,
            cas_retries: 4,
        }
    }
}

impl GameRules {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let rules = Self {
            min_players: env_parse("ITO_MIN_PLAYERS", defaults.min_players).max(1),
            max_players: env_parse("ITO_MAX_PLAYERS", defaults.max_players),
            level_deadline_seconds: env_parse(
                "ITO_LEVEL_DEADLINE_SECONDS",
                defaults.level_deadline_seconds,
            ),
            voting_seconds: env_parse("ITO_VOTING_SECONDS", defaults.voting_seconds),
            reveal_seconds: env_parse("ITO_REVEAL_SECONDS", defaults.reveal_seconds),
            max_hint_chars: env_parse("ITO_MAX_HINT_CHARS", defaults.max_hint_chars),
            cas_retries: defaults.cas_retries,
        };

        tracing::info!(
            min_players = rules.min_players,
            max_players = rules.max_players,
            voting_seconds = rules.voting_seconds,
            reveal_seconds = rules.reveal_seconds,
            "Game rules loaded"
        );
        rules
    }

    pub fn level_deadline(&self) -> TimeDelta {
        TimeDelta::seconds(self.level_deadline_seconds.into())
    }

    pub fn voting_deadline(&self) -> TimeDelta {
        TimeDelta::seconds(self.voting_seconds.into())
    }

    pub fn reveal_pause(&self) -> TimeDelta {
        TimeDelta::seconds(self.reveal_seconds.into())
    }
}

/// Server process settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub static_dir: PathBuf,
    /// Snapshot file for the in-memory store (None = no persistence)
    pub state_file: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env_parse("PORT", 4860u16);
        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));
        let state_file = std::env::var("ITO_STATE_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let snapshot_interval = Duration::from_secs(env_parse("ITO_SNAPSHOT_SECONDS", 30u64).max(1));

        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            static_dir,
            state_file,
            snapshot_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_rules_default() {
        let rules = GameRules::default();
        assert_eq!(rules.reveal_pause(), TimeDelta::seconds(5));
        assert_eq!(rules.level_deadline(), TimeDelta::minutes(10));
        assert!(rules.max_players * usize::from(crate::types::TOTAL_LEVELS) <= 100);
    }

    #[test]
    #[serial]
    fn test_rules_from_env() {
        std::env::set_var("ITO_VOTING_SECONDS", "45");
        std::env::set_var("ITO_MIN_PLAYERS", "0");
        std::env::set_var("ITO_MAX_HINT_CHARS", "not-a-number");

        let rules = GameRules::from_env();
        assert_eq!(rules.voting_seconds, 45);
        assert_eq!(rules.min_players, 1);
        assert_eq!(rules.max_hint_chars, GameRules::default().max_hint_chars);

        std::env::remove_var("ITO_VOTING_SECONDS");
        std::env::remove_var("ITO_MIN_PLAYERS");
        std::env::remove_var("ITO_MAX_HINT_CHARS");
    }

    #[test]
    #[serial]
    fn test_server_config_from_env() {
        std::env::set_var("PORT", "9000");
        std::env::set_var("ITO_STATE_FILE", "  ");

        let config = ServerConfig::from_env();
        assert_eq!(config.addr.port(), 9000);
        assert!(config.state_file.is_none());

        std::env::remove_var("PORT");
        std::env::remove_var("ITO_STATE_FILE");
    }
}
