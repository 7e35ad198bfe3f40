//! Stateless translation of player and track operations into REST requests.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::model::info::{ErrorResponse, FreeAddress};
use crate::model::{
    Info,
    LoadResult,
    PlayerInfo,
    RoutePlannerStatus,
    SearchSource,
    SessionUpdate,
    Stats,
    Track,
    UpdatePlayer,
};
use crate::{Error, Result};

const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Paths relative to the versioned base URL.
pub(crate) mod routes {
    use percent_encoding::utf8_percent_encode;
    use super::COMPONENT;

    pub fn players(session_id: &str) -> String {
        format!("/sessions/{}/players", encode(session_id))
    }

    pub fn player(session_id: &str, guild_id: u64) -> String {
        format!("/sessions/{}/players/{}", encode(session_id), guild_id)
    }

    pub fn update_player(session_id: &str, guild_id: u64, no_replace: bool) -> String {
        format!("{}?noReplace={}", player(session_id, guild_id), no_replace)
    }

    pub fn session(session_id: &str) -> String {
        format!("/sessions/{}", encode(session_id))
    }

    pub fn load_tracks(identifier: &str) -> String {
        format!("/loadtracks?identifier={}", encode(identifier))
    }

    pub fn decode_track(encoded: &str) -> String {
        format!("/decodetrack?encodedTrack={}", encode(encoded))
    }

    pub const DECODE_TRACKS: &str = "/decodetracks";
    pub const INFO: &str = "/info";
    pub const STATS: &str = "/stats";
    pub const VERSION: &str = "/version";
    pub const ROUTE_PLANNER: &str = "/routeplanner/status";
    pub const UNMARK_FAILED_ADDRESS: &str = "/routeplanner/free/address";
    pub const UNMARK_ALL_FAILED_ADDRESSES: &str = "/routeplanner/free/all";

    fn encode(value: &str) -> String {
        utf8_percent_encode(value, COMPONENT).to_string()
    }
}

/// REST client for one node. Cheap to clone and shared by all of its players.
#[derive(Clone)]
pub struct Rest {
    base: String,
    password: String,
    http: Arc<dyn HttpClient>,
}

impl Rest {
    /// Creates a client for the versioned base URL, e.g.
    /// `http://127.0.0.1:2333/v4`.
    pub fn new(base: impl Into<String>, password: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            base: base.into(),
            password: password.into(),
            http,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn players(&self, session_id: &str) -> Result<Vec<PlayerInfo>> {
        let response = self.request(Method::GET, &routes::players(session_id), None).await?;

        json(&response)
    }

    pub async fn player(&self, session_id: &str, guild_id: u64) -> Result<PlayerInfo> {
        let response = self.request(Method::GET, &routes::player(session_id, guild_id), None).await?;

        json(&response)
    }

    /// Updates or creates the guild's player.
    ///
    /// With `no_replace`, the node ignores the track if one is already
    /// playing and applies the remaining fields.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<PlayerInfo> {
        let path = routes::update_player(session_id, guild_id, no_replace);
        let response = self.request(Method::PATCH, &path, Some(body(update)?)).await?;

        json(&response)
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        self.request(Method::DELETE, &routes::player(session_id, guild_id), None)
            .await
            .map(|_| ())
    }

    pub async fn update_session(&self, session_id: &str, update: &SessionUpdate) -> Result<SessionUpdate> {
        let path = routes::session(session_id);
        let response = self.request(Method::PATCH, &path, Some(body(update)?)).await?;

        json(&response)
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let response = self.request(Method::GET, &routes::load_tracks(identifier), None).await?;

        json(&response)
    }

    /// Searches a provider, or loads the query directly if it is a link.
    pub async fn search(&self, source: SearchSource, query: &str) -> Result<LoadResult> {
        self.load_tracks(&source.identifier(query)).await
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let response = self.request(Method::GET, &routes::decode_track(encoded), None).await?;

        json(&response)
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let response = self
            .request(Method::POST, routes::DECODE_TRACKS, Some(body(encoded)?))
            .await?;

        json(&response)
    }

    pub async fn info(&self) -> Result<Info> {
        let response = self.request(Method::GET, routes::INFO, None).await?;

        json(&response)
    }

    pub async fn stats(&self) -> Result<Stats> {
        let response = self.request(Method::GET, routes::STATS, None).await?;

        json(&response)
    }

    /// The node's version string. This route is not versioned.
    pub async fn version(&self) -> Result<String> {
        let url = format!("{}{}", self.unversioned_base(), routes::VERSION);
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status;

        String::from_utf8(response.body).map_err(|_| Error::bad_response(status, "version is not UTF-8"))
    }

    /// Route planner status, `None` when the node has no planner configured.
    pub async fn route_planner_status(&self) -> Result<Option<RoutePlannerStatus>> {
        let response = self.request(Method::GET, routes::ROUTE_PLANNER, None).await?;

        if response.status == 204 {
            return Ok(None);
        }

        let status = json::<RoutePlannerStatus>(&response)?;

        Ok(if status.class.is_some() { Some(status) } else { None })
    }

    pub async fn unmark_failed_address(&self, address: &str) -> Result<()> {
        let payload = body(&FreeAddress { address })?;

        self.request(Method::POST, routes::UNMARK_FAILED_ADDRESS, Some(payload))
            .await
            .map(|_| ())
    }

    pub async fn unmark_all_failed_addresses(&self) -> Result<()> {
        self.request(Method::POST, routes::UNMARK_ALL_FAILED_ADDRESSES, None)
            .await
            .map(|_| ())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base, path);

        self.send(method, url, body).await
    }

    async fn send(&self, method: Method, url: String, body: Option<Vec<u8>>) -> Result<HttpResponse> {
        trace!("{} {}", method, url);

        let response = self
            .http
            .execute(HttpRequest {
                headers: vec![("authorization", self.password.clone())],
                method,
                url,
                body,
            })
            .await?;

        if response.is_success() {
            return Ok(response);
        }

        let message = serde_json::from_slice::<ErrorResponse>(&response.body)
            .ok()
            .and_then(|error| error.message.or(error.error));

        Err(Error::BadBackendResponse {
            status: response.status,
            message,
        })
    }

    fn unversioned_base(&self) -> &str {
        match self.base.rfind("/v") {
            Some(index) if self.base[index + 2..].chars().all(|c| c.is_ascii_digit()) => &self.base[..index],
            _ => &self.base,
        }
    }
}

impl fmt::Debug for Rest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rest").field("base", &self.base).finish()
    }
}

fn body<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(From::from)
}

fn json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|why| Error::bad_response(response.status, why.to_string()))
}
