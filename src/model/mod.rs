//! Wire models of the node's WebSocket and REST APIs.

pub mod incoming;
pub mod info;
pub mod player;
pub mod stats;
pub mod track;

pub use self::incoming::*;
pub use self::info::{Git, Info, Plugin, RoutePlannerStatus, SessionUpdate, Version};
pub use self::player::*;
pub use self::stats::*;
pub use self::track::*;

/// Discord IDs travel as strings on the wire.
pub(crate) mod snowflake {
    use serde::de::{Deserializer, Error};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;

        raw.parse().map_err(D::Error::custom)
    }
}
