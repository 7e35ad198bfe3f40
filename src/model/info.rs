use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response of `GET /info`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub version: Version,
    /// Unix timestamp in milliseconds.
    pub build_time: u64,
    pub git: Git,
    pub jvm: String,
    pub lavaplayer: String,
    pub source_managers: Vec<String>,
    pub filters: Vec<String>,
    pub plugins: Vec<Plugin>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<String>,
    pub build: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Git {
    pub branch: String,
    pub commit: String,
    pub commit_time: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Plugin {
    pub name: String,
    pub version: String,
}

/// Body and response of `PATCH /sessions/{session}`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resuming: Option<bool>,
    /// Seconds the node keeps the session alive after a disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Response of `GET /routeplanner/status`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RoutePlannerStatus {
    /// Planner implementation, absent when no planner is configured.
    pub class: Option<String>,
    pub details: Option<Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(crate) struct FreeAddress<'a> {
    pub address: &'a str,
}

/// Error body the node attaches to failed REST requests.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub message: Option<String>,
    pub error: Option<String>,
}
