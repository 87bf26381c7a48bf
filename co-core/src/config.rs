//! Rules configuration.
//!
//! Everything the table might house-rule lives here rather than in code:
//! the round length used to convert second-based durations, the evolving
//! die table, rank level gates and the capacity point economy.

use crate::formula::EvolvingDice;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from loading or saving a rules file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rank level table must list 8 ranks, found {0}")]
    RankTable(usize),
}

/// Maxima raised when a leftover capacity point is traded away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanGains {
    pub fortune: i32,
    pub recovery: i32,
    pub hp: i32,
    pub mana: i32,
}

impl Default for OrphanGains {
    fn default() -> Self {
        Self {
            fortune: 1,
            recovery: 1,
            hp: 2,
            mana: 2,
        }
    }
}

/// Configuration for the resolution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Seconds in a combat round.
    pub round_time_seconds: u32,

    /// Die selected for `d4°` by level or encounter rating.
    pub evolving_dice: EvolvingDice,

    /// Minimum character level for ranks 1 to 8.
    pub rank_min_level: [u32; 8],

    /// Capacity points granted per level before bonuses.
    pub base_capacity_points: u32,

    /// Profile paths that may be open at once.
    pub open_path_limit: usize,

    /// Mana discount for a concentrated (shift) attack spell.
    pub concentration_discount: i32,

    pub orphan_gains: OrphanGains,

    /// Refuse equipping items when not enough hands are free.
    pub free_hands_check: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            round_time_seconds: 6,
            evolving_dice: EvolvingDice::default(),
            rank_min_level: [1, 2, 3, 5, 7, 9, 11, 13],
            base_capacity_points: 2,
            open_path_limit: 5,
            concentration_discount: 2,
            orphan_gains: OrphanGains::default(),
            free_hands_check: true,
        }
    }
}

impl RulesConfig {
    pub fn with_round_time(mut self, seconds: u32) -> Self {
        self.round_time_seconds = seconds;
        self
    }

    pub fn with_rank_min_level(mut self, levels: [u32; 8]) -> Self {
        self.rank_min_level = levels;
        self
    }

    pub fn with_open_path_limit(mut self, limit: usize) -> Self {
        self.open_path_limit = limit;
        self
    }

    pub fn with_free_hands_check(mut self, enabled: bool) -> Self {
        self.free_hands_check = enabled;
        self
    }

    /// Minimum level for a rank; ranks past 8 are never reachable.
    pub fn min_level_for_rank(&self, rank: u8) -> Option<u32> {
        let index = usize::from(rank).checked_sub(1)?;
        self.rank_min_level.get(index).copied()
    }

    /// Convert a second-based duration to rounds, rounding to nearest.
    pub fn seconds_to_rounds(&self, seconds: i32) -> i32 {
        if self.round_time_seconds == 0 {
            return 0;
        }
        (f64::from(seconds) / f64::from(self.round_time_seconds)).round() as i32
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file. Missing fields take their default.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Parse a rules document where the rank table is given as a list.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(ranks) = value.get("rank_min_level").and_then(|r| r.as_array()) {
            if ranks.len() != 8 {
                return Err(ConfigError::RankTable(ranks.len()));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let rules = RulesConfig::default();
        assert_eq!(rules.min_level_for_rank(1), Some(1));
        assert_eq!(rules.min_level_for_rank(4), Some(5));
        assert_eq!(rules.min_level_for_rank(8), Some(13));
        assert_eq!(rules.min_level_for_rank(9), None);
        assert_eq!(rules.min_level_for_rank(0), None);
    }

    #[test]
    fn test_seconds_to_rounds() {
        let rules = RulesConfig::default();
        assert_eq!(rules.seconds_to_rounds(12), 2);
        assert_eq!(rules.seconds_to_rounds(20), 3);
        assert_eq!(rules.with_round_time(0).seconds_to_rounds(20), 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let rules = RulesConfig::from_json_value(serde_json::json!({
            "round_time_seconds": 10
        }))
        .unwrap();
        assert_eq!(rules.round_time_seconds, 10);
        assert_eq!(rules.base_capacity_points, 2);
    }

    #[test]
    fn test_rank_table_length_checked() {
        let err = RulesConfig::from_json_value(serde_json::json!({
            "rank_min_level": [1, 2, 3]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::RankTable(3)));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("co-rules-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("rules.json");

        let rules = RulesConfig::default().with_open_path_limit(4);
        rules.save_json(&path).await.unwrap();
        let loaded = RulesConfig::load_json(&path).await.unwrap();
        assert_eq!(loaded, rules);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
