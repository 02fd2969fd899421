use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    #[serde(default)]
    pub reservable: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
    #[serde(default)]
    pub allocated: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub system_load: f64,
    #[serde(default)]
    pub lavalink_load: f64,
}

/// Frame counters averaged over the last minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct FrameStats {
    #[serde(default)]
    pub sent: f64,
    #[serde(default)]
    pub nulled: f64,
    #[serde(default)]
    pub deficit: f64,
}

/// Last `stats` snapshot reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    #[serde(default)]
    pub playing_players: u32,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub memory: MemoryStats,
    #[serde(default)]
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

impl NodeStats {
    /// Load-balancing penalty, lower is better.
    ///
    /// The arithmetic (including truncation and the doubled nulled-frame
    /// term) is kept identical to the other clients of the same backend so
    /// that rankings stay comparable across a mixed fleet.
    pub fn penalty(&self) -> i64 {
        let cpu_penalty = 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;

        let (deficit_penalty, nulled_penalty) = match &self.frame_stats {
            Some(frames) => {
                let deficit = 1.03f64.powf(500.0 * frames.deficit / 3000.0) * 600.0 - 600.0;
                let nulled = (1.03f64.powf(500.0 * frames.nulled / 3000.0) * 300.0 - 300.0) * 2.0;
                (deficit, nulled)
            }
            None => (0.0, 0.0),
        };

        // `as` trunca hacia cero
        (cpu_penalty + deficit_penalty + nulled_penalty + f64::from(self.playing_players)) as i64
    }
}
