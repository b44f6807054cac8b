//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Lockstep engine tuning
    pub sync: SyncConfig,
    /// Matchmaking tuning
    pub matchmaking: MatchmakingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let mut sync = SyncConfig::default();
        if let Ok(hz) = env::var("TICK_RATE_HZ") {
            sync.tick_rate_hz = hz.parse().map_err(|_| ConfigError::Invalid("TICK_RATE_HZ"))?;
            if sync.tick_rate_hz == 0 || sync.tick_rate_hz > 1000 {
                return Err(ConfigError::Invalid("TICK_RATE_HZ"));
            }
        }
        if let Ok(cap) = env::var("MAX_CATCHUP_FRAMES") {
            sync.max_catchup_frames = cap
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_CATCHUP_FRAMES"))?;
        }
        if let Ok(frames) = env::var("INPUT_CACHE_FRAMES") {
            sync.input_cache_frames = frames
                .parse()
                .map_err(|_| ConfigError::Invalid("INPUT_CACHE_FRAMES"))?;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            sync,
            matchmaking: MatchmakingConfig::default(),
        })
    }
}

/// Lockstep frame-sync constants.
///
/// The cache window and sweep interval are expressed in frames so memory
/// stays bounded independent of match duration.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Authoritative tick rate in Hz
    pub tick_rate_hz: u32,
    /// Max frames advanced per scheduler invocation (bounds catch-up bursts)
    pub max_catchup_frames: u32,
    /// Sliding input cache window in frames
    pub input_cache_frames: i32,
    /// Sweep the input cache every this many frames
    pub cache_sweep_interval: i32,
    /// How far back to search for a player's previous input when gap-filling
    pub backfill_search_frames: i32,
}

impl SyncConfig {
    /// Frame interval in milliseconds
    pub fn frame_interval_ms(&self) -> i64 {
        1000 / self.tick_rate_hz as i64
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            max_catchup_frames: 5,
            input_cache_frames: 300, // 15 seconds at 20 Hz
            cache_sweep_interval: 60,
            backfill_search_frames: 10,
        }
    }
}

/// Matchmaking constants
#[derive(Clone, Copy, Debug)]
pub struct MatchmakingConfig {
    /// Players popped per quick match
    pub min_players: usize,
    /// Room capacity for quick-match rooms
    pub max_quick_match_players: u32,
    /// Queue entry expires after this many milliseconds
    pub queue_timeout_ms: i64,
    /// How often to scan for expired entries
    pub timeout_check_interval_ms: i64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_quick_match_players: 4,
            queue_timeout_ms: 60_000,
            timeout_check_interval_ms: 5_000,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
