//! Query cache configuration.
//!
//! Controlled by the `[cache]` table of `notes-query-cache.toml`.

use super::keys::DateMode;

const DEFAULT_MAX_PASSES: usize = 64;

/// Behaviour shared by every table created within a domain.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How date parameters are rendered into keys.
    pub date_mode: DateMode,
    /// Spawn each triggered executor on the current tokio runtime, if any.
    pub spawn_executors: bool,
    /// Upper bound on attempts when resolving a suspending pass.
    pub max_passes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            date_mode: DateMode::Utc,
            spawn_executors: true,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            date_mode: settings.date_mode,
            spawn_executors: settings.spawn_executors,
            max_passes: settings.max_passes.get(),
        }
    }
}

impl CacheConfig {
    pub fn with_date_mode(date_mode: DateMode) -> Self {
        Self {
            date_mode,
            ..Self::default()
        }
    }
}
