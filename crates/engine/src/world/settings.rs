use serde::{Deserialize, Serialize};

use super::BlockPos;

/// Game mode assigned to newly joining players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Peaceful,
    Easy,
    #[default]
    Normal,
    Hard,
}

/// Mutable world metadata, loaded from the provider at start and written back
/// on close. The world keeps it behind a single mutex; all accessors on
/// `World` copy values out rather than exposing the guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub name: String,
    pub spawn: BlockPos,
    /// World time in ticks, advanced while `time_cycle` is on.
    pub time: i64,
    pub time_cycle: bool,
    /// Monotonic tick counter, advanced every tick regardless of the time
    /// cycle.
    pub current_tick: i64,
    pub default_game_mode: GameMode,
    pub difficulty: Difficulty,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "World".to_string(),
            spawn: BlockPos::new(0, 64, 0),
            time: 0,
            time_cycle: true,
            current_tick: 0,
            default_game_mode: GameMode::default(),
            difficulty: Difficulty::default(),
        }
    }
}
