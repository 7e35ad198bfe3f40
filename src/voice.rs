//! Assembles voice credentials from the two Discord gateway events that
//! carry them.

use parking_lot::Mutex;
use std::collections::HashMap;
use crate::model::VoiceState;

/// A `VOICE_SERVER_UPDATE` dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceServerUpdate {
    pub guild_id: u64,
    pub token: String,
    /// `None` while Discord is allocating a new voice server.
    pub endpoint: Option<String>,
}

/// A `VOICE_STATE_UPDATE` dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceStateUpdate {
    pub guild_id: u64,
    pub user_id: u64,
    /// `None` when the user left voice.
    pub channel_id: Option<u64>,
    pub session_id: String,
}

/// Complete credentials for the node's voice connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceCredentials {
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
}

impl From<VoiceCredentials> for VoiceState {
    fn from(credentials: VoiceCredentials) -> Self {
        VoiceState {
            token: credentials.token,
            endpoint: credentials.endpoint,
            session_id: credentials.session_id,
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    server: Option<(String, String)>,
    session_id: Option<String>,
    channel_id: Option<u64>,
    forwarded: Option<VoiceCredentials>,
}

impl Pending {
    fn complete(&self) -> Option<VoiceCredentials> {
        let (endpoint, token) = self.server.clone()?;

        Some(VoiceCredentials {
            endpoint,
            token,
            session_id: self.session_id.clone()?,
        })
    }

    /// Returns the credentials if they are complete and not yet forwarded,
    /// recording them as forwarded.
    fn take_changed(&mut self) -> Option<VoiceCredentials> {
        let credentials = self.complete()?;

        if self.forwarded.as_ref() == Some(&credentials) {
            return None;
        }

        self.forwarded = Some(credentials.clone());

        Some(credentials)
    }
}

/// Per-guild buffer of half-received voice credentials.
///
/// The latest value of each half wins. Merged credentials are released once
/// per distinct value, so redelivered updates are not forwarded twice.
#[derive(Debug)]
pub struct VoiceCoordinator {
    user_id: u64,
    guilds: Mutex<HashMap<u64, Pending>>,
}

impl VoiceCoordinator {
    /// Creates a coordinator tracking the voice states of `user_id`.
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            guilds: Mutex::new(HashMap::new()),
        }
    }

    pub fn server_update(&self, update: VoiceServerUpdate) -> Option<VoiceCredentials> {
        let mut guilds = self.guilds.lock();
        let pending = guilds.entry(update.guild_id).or_default();

        match update.endpoint {
            Some(endpoint) => {
                pending.server = Some((endpoint, update.token));

                pending.take_changed()
            },
            None => {
                debug!("Voice server for guild {} is being reallocated", update.guild_id);

                pending.server = None;

                None
            },
        }
    }

    pub fn state_update(&self, update: VoiceStateUpdate) -> Option<VoiceCredentials> {
        if update.user_id != self.user_id {
            return None;
        }

        let mut guilds = self.guilds.lock();

        if update.channel_id.is_none() {
            debug!("Left voice in guild {}", update.guild_id);

            guilds.remove(&update.guild_id);

            return None;
        }

        let pending = guilds.entry(update.guild_id).or_default();
        pending.channel_id = update.channel_id;
        pending.session_id = Some(update.session_id);

        pending.take_changed()
    }

    /// The voice channel the user is in, if known.
    pub fn channel(&self, guild_id: u64) -> Option<u64> {
        self.guilds.lock().get(&guild_id).and_then(|pending| pending.channel_id)
    }

    /// Releases complete credentials that were not forwarded yet.
    pub fn merged(&self, guild_id: u64) -> Option<VoiceCredentials> {
        self.guilds.lock().get_mut(&guild_id).and_then(Pending::take_changed)
    }

    /// Forgets that the guild's credentials were forwarded, e.g. because
    /// forwarding failed, keeping both halves.
    pub fn forget(&self, guild_id: u64) {
        if let Some(pending) = self.guilds.lock().get_mut(&guild_id) {
            pending.forwarded = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: u64 = 10;
    const GUILD: u64 = 1;

    fn server(token: &str) -> VoiceServerUpdate {
        VoiceServerUpdate {
            guild_id: GUILD,
            token: token.to_owned(),
            endpoint: Some("us-east1.discord.media:443".to_owned()),
        }
    }

    fn state(session_id: &str) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: GUILD,
            user_id: BOT,
            channel_id: Some(99),
            session_id: session_id.to_owned(),
        }
    }

    #[test]
    fn forwards_once_both_halves_arrive() {
        let voice = VoiceCoordinator::new(BOT);

        assert_eq!(voice.state_update(state("s1")), None);

        let merged = voice.server_update(server("t1")).unwrap();
        assert_eq!(merged.session_id, "s1");
        assert_eq!(merged.token, "t1");

        assert_eq!(voice.server_update(server("t1")), None);
        assert_eq!(voice.state_update(state("s1")), None);
        assert_eq!(voice.channel(GUILD), Some(99));
    }

    #[test]
    fn latest_half_wins() {
        let voice = VoiceCoordinator::new(BOT);

        assert_eq!(voice.server_update(server("t1")), None);
        assert_eq!(voice.server_update(server("t2")), None);

        assert_eq!(voice.state_update(state("s1")).unwrap().token, "t2");
        assert_eq!(voice.state_update(state("s2")).unwrap().session_id, "s2");
    }

    #[test]
    fn ignores_other_users_and_resets_on_leave() {
        let voice = VoiceCoordinator::new(BOT);

        let mut other = state("s1");
        other.user_id = 11;
        assert_eq!(voice.state_update(other), None);
        assert_eq!(voice.server_update(server("t1")), None);

        let mut left = state("s1");
        left.channel_id = None;
        assert_eq!(voice.state_update(left), None);
        assert_eq!(voice.channel(GUILD), None);

        assert_eq!(voice.state_update(state("s1")), None);
    }

    #[test]
    fn reallocation_drops_the_server_half() {
        let voice = VoiceCoordinator::new(BOT);
        voice.state_update(state("s1"));

        let mut reallocating = server("t1");
        reallocating.endpoint = None;
        assert_eq!(voice.server_update(reallocating), None);
        assert!(voice.server_update(server("t1")).is_some());
    }

    #[test]
    fn forgotten_credentials_are_released_again() {
        let voice = VoiceCoordinator::new(BOT);
        voice.state_update(state("s1"));
        voice.server_update(server("t1")).unwrap();

        assert_eq!(voice.merged(GUILD), None);
        voice.forget(GUILD);
        assert!(voice.merged(GUILD).is_some());
        assert_eq!(voice.merged(GUILD), None);
    }
}
