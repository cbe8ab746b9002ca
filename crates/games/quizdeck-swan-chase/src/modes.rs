use quizdeck_core::minigame::SwanMode;

/// Per-mode tuning. The engine is mode-agnostic; everything a mode changes
/// lives here.
#[derive(Debug, Clone, Copy)]
pub struct ModeRules {
    /// Match length in seconds.
    pub duration: f32,
    pub initial_swans: usize,
    /// How long a tagged boat stays ghosted. Ignored when tags eliminate.
    pub ghost_duration: f32,
    /// Swarm mode: a tag removes the boat for the rest of the match.
    pub eliminate_on_tag: bool,
    /// Swarm mode: spawn an extra wave of swans on this interval (seconds).
    pub wave_interval: Option<f32>,
    /// King-of-lake: one boat holds the crown; a tag transfers it.
    pub crowned: bool,
    pub survival_points_per_sec: f32,
    pub crown_points_per_sec: f32,
    pub wave_bonus: i64,
}

pub fn rules_for(mode: SwanMode) -> ModeRules {
    match mode {
        SwanMode::Classic => ModeRules {
            duration: 60.0,
            initial_swans: 2,
            ghost_duration: 3.0,
            eliminate_on_tag: false,
            wave_interval: None,
            crowned: false,
            survival_points_per_sec: 1.0,
            crown_points_per_sec: 0.0,
            wave_bonus: 0,
        },
        SwanMode::KingOfLake => ModeRules {
            duration: 60.0,
            initial_swans: 2,
            ghost_duration: 3.0,
            eliminate_on_tag: false,
            wave_interval: None,
            crowned: true,
            survival_points_per_sec: 1.0,
            crown_points_per_sec: 2.0,
            wave_bonus: 0,
        },
        SwanMode::SwanSwarm => ModeRules {
            duration: 120.0,
            initial_swans: 1,
            ghost_duration: 0.0,
            eliminate_on_tag: true,
            wave_interval: Some(20.0),
            crowned: false,
            survival_points_per_sec: 1.0,
            crown_points_per_sec: 0.0,
            wave_bonus: 5,
        },
    }
}
