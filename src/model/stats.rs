use serde::{Deserialize, Serialize};

/// Load statistics periodically pushed by a node, also served by `/stats`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: u32,
    pub playing_players: u32,
    /// Uptime in milliseconds.
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    /// Absent from `/stats` responses and when no player is sending audio.
    pub frame_stats: Option<FrameStats>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Frame counters averaged per minute.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl Stats {
    /// Calculates the load penalty of the node; lower is better.
    ///
    /// Playing players count linearly, CPU load and dropped frames grow the
    /// penalty exponentially so saturated nodes are avoided.
    pub fn penalty(&self) -> i32 {
        let players = f64::from(self.playing_players);
        let cpu = 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;

        let (deficit, nulled) = match self.frame_stats {
            Some(ref frames) => (
                1.03f64.powf(500.0 * (frames.deficit as f64 / 3000.0)) * 600.0 - 600.0,
                (1.03f64.powf(500.0 * (frames.nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0,
            ),
            None => (0.0, 0.0),
        };

        (players + cpu + deficit + nulled).min(f64::from(i32::MAX)) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stats(playing: u32, load: f64) -> Stats {
        serde_json::from_value(json!({
            "players": playing,
            "playingPlayers": playing,
            "uptime": 1000,
            "memory": {"free": 1, "used": 1, "allocated": 2, "reservable": 4},
            "cpu": {"cores": 4, "systemLoad": load, "lavalinkLoad": 0.1},
        }))
        .unwrap()
    }

    #[test]
    fn penalty_prefers_idle_nodes() {
        let idle = stats(0, 0.0);
        let busy = stats(20, 0.5);

        assert_eq!(idle.penalty(), 0);
        assert!(busy.penalty() > idle.penalty());
    }

    #[test]
    fn dropped_frames_raise_penalty() {
        let mut lossy = stats(1, 0.0);
        lossy.frame_stats = Some(FrameStats {
            sent: 3000,
            nulled: 300,
            deficit: 300,
        });

        assert!(lossy.penalty() > stats(1, 0.0).penalty());
    }
}
