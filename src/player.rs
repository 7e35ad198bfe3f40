//! Module containing structs for tracking and commanding the audio players of
//! a node's guilds.

use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as CommandLock;
use crate::model::{Filters, NodeEvent, PlayerInfo, PlayerUpdate, Track, UpdatePlayer, VoiceState};
use crate::nodes::Shared;
use crate::voice::VoiceCredentials;
use crate::{Error, Result};

pub const DEFAULT_VOLUME: u16 = 100;
pub const MAX_VOLUME: u16 = 1000;

/// The state kept for a guild's player.
///
/// This survives disconnects and is what gets replayed to a new session.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerData {
    pub guild_id: u64,
    /// The track that the player is playing.
    pub track: Option<Track>,
    /// Tracks to play once the current one finishes.
    pub queue: VecDeque<Track>,
    /// The last known position in milliseconds.
    pub position: u64,
    /// The volume setting, on a scale of 0 to 1000.
    pub volume: u16,
    pub paused: bool,
    pub filters: Filters,
    /// The voice channel the bot is in.
    pub channel_id: Option<u64>,
    pub voice: Option<VoiceCredentials>,
    /// Whether the node reports its voice connection as up.
    pub connected: bool,
}

impl PlayerData {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            track: None,
            queue: VecDeque::new(),
            position: 0,
            volume: DEFAULT_VOLUME,
            paused: false,
            filters: Filters::default(),
            channel_id: None,
            voice: None,
            connected: false,
        }
    }
}

/// Options for [`AudioPlayer::play_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayOptions {
    /// Leave a playing track untouched.
    pub no_replace: bool,
    /// Position to start at, in milliseconds.
    pub start_time: Option<u64>,
    /// Position to stop at, in milliseconds.
    pub end_time: Option<u64>,
}

/// The players of a node, keyed by guild ID.
pub struct AudioPlayerManager {
    shared: Arc<Shared>,
    players: RwLock<HashMap<u64, Arc<AudioPlayer>>>,
}

impl AudioPlayerManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            players: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the player for the guild.
    ///
    /// Fails with [`Error::DuplicateGuild`] if the guild already has one.
    pub fn create(&self, guild_id: u64) -> Result<Arc<AudioPlayer>> {
        match self.players.write().entry(guild_id) {
            Entry::Occupied(_) => Err(Error::DuplicateGuild(guild_id)),
            Entry::Vacant(entry) => {
                debug!("[{}] Created player for guild {}", self.shared.name(), guild_id);

                let player = AudioPlayer::new(Arc::clone(&self.shared), PlayerData::new(guild_id));

                Ok(Arc::clone(entry.insert(Arc::new(player))))
            },
        }
    }

    pub fn get(&self, guild_id: u64) -> Result<Arc<AudioPlayer>> {
        self.players
            .read()
            .get(&guild_id)
            .cloned()
            .ok_or(Error::NotFound(guild_id))
    }

    /// Whether the manager contains a player for the given guild.
    pub fn has(&self, guild_id: u64) -> bool {
        self.players.read().contains_key(&guild_id)
    }

    /// Overwrites the guild's player state, creating the player if needed.
    ///
    /// Existing handles to the player observe the new state.
    pub fn replace(&self, guild_id: u64, mut data: PlayerData) -> Arc<AudioPlayer> {
        data.guild_id = guild_id;

        match self.players.write().entry(guild_id) {
            Entry::Occupied(entry) => {
                *entry.get().data.lock() = data;

                Arc::clone(entry.get())
            },
            Entry::Vacant(entry) => {
                let player = AudioPlayer::new(Arc::clone(&self.shared), data);

                Arc::clone(entry.insert(Arc::new(player)))
            },
        }
    }

    /// Removes the guild's player and destroys it on the node.
    ///
    /// Destroying on the node is best-effort. Returns whether a player was
    /// registered.
    pub async fn destroy(&self, guild_id: u64) -> bool {
        let removed = self.players.write().remove(&guild_id);

        let player = match removed {
            Some(player) => player,
            None => return false,
        };

        let _lock = player.commands.lock().await;

        if let Ok(session_id) = self.shared.session_id() {
            let call = self.shared.rest.destroy_player(&session_id, guild_id);

            if let Err(why) = self.shared.guarded(call).await {
                warn!("[{}] Failed to destroy player for guild {}: {}", self.shared.name(), guild_id, why);
            }
        }

        true
    }

    pub fn guild_ids(&self) -> Vec<u64> {
        self.players.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    pub(crate) fn apply_update(&self, update: &PlayerUpdate) {
        if let Ok(player) = self.get(update.guild_id) {
            let mut data = player.data.lock();
            data.position = update.state.position;
            data.connected = update.state.connected;
        }
    }

    /// Applies a player event in receive order, starting the next queued
    /// track in the background when the current one finished.
    pub(crate) fn handle_event(&self, event: &NodeEvent) {
        let player = match self.get(event.guild_id()) {
            Ok(player) => player,
            Err(_) => return,
        };

        let advance = {
            let mut data = player.data.lock();

            match event {
                NodeEvent::TrackStart(start) => {
                    data.track = Some(start.track.clone());
                    data.position = 0;

                    false
                },
                NodeEvent::TrackEnd(end) => {
                    if data.track.as_ref() == Some(&end.track) {
                        data.track = None;
                        data.position = 0;
                    }

                    end.reason.may_start_next() && !data.queue.is_empty()
                },
                NodeEvent::WebSocketClosed(_) => {
                    data.connected = false;

                    false
                },
                NodeEvent::TrackException(_) | NodeEvent::TrackStuck(_) => false,
            }
        };

        if advance {
            tokio::spawn(async move {
                if let Err(why) = player.advance().await {
                    warn!("[{}] Failed to start the next track for guild {}: {}", player.shared.name(), player.guild_id, why);
                }
            });
        }
    }

    /// Sends voice credentials the node has not acknowledged yet, e.g.
    /// because they arrived before the first session.
    pub(crate) fn flush_voice(&self) {
        let players = self
            .players
            .read()
            .values()
            .filter(|player| player.voice_pending.load(Ordering::SeqCst))
            .cloned()
            .collect::<Vec<_>>();

        for player in players {
            tokio::spawn(async move {
                if let Err(why) = player.flush_voice().await {
                    warn!("[{}] Failed to send voice for guild {}: {}", player.shared.name(), player.guild_id, why);
                }
            });
        }
    }

    /// Re-sends every player with voice credentials to a new session.
    pub(crate) fn replay_all(&self) {
        let players = self.players.read().values().cloned().collect::<Vec<_>>();

        for player in players {
            tokio::spawn(async move {
                if let Err(why) = player.replay().await {
                    warn!("[{}] Failed to replay player for guild {}: {}", player.shared.name(), player.guild_id, why);
                }
            });
        }
    }
}

/// A guild's audio player.
///
/// Commands to the node are serialized per player, so concurrent calls reach
/// the node in the order they acquired the player.
pub struct AudioPlayer {
    guild_id: u64,
    shared: Arc<Shared>,
    data: Mutex<PlayerData>,
    commands: CommandLock<()>,
    /// Set while the stored voice credentials are unacknowledged.
    voice_pending: AtomicBool,
}

impl AudioPlayer {
    fn new(shared: Arc<Shared>, data: PlayerData) -> Self {
        Self {
            guild_id: data.guild_id,
            commands: CommandLock::new(()),
            voice_pending: AtomicBool::new(false),
            data: Mutex::new(data),
            shared,
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// A copy of the player's state.
    pub fn snapshot(&self) -> PlayerData {
        self.data.lock().clone()
    }

    pub fn track(&self) -> Option<Track> {
        self.data.lock().track.clone()
    }

    pub fn position(&self) -> u64 {
        self.data.lock().position
    }

    pub fn volume(&self) -> u16 {
        self.data.lock().volume
    }

    pub fn is_paused(&self) -> bool {
        self.data.lock().paused
    }

    pub fn filters(&self) -> Filters {
        self.data.lock().filters.clone()
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.data.lock().channel_id
    }

    pub fn set_channel(&self, channel_id: Option<u64>) {
        self.data.lock().channel_id = channel_id;
    }

    /// Plays the track, replacing the current one.
    pub async fn play(&self, track: Track) -> Result<()> {
        self.play_with(track, PlayOptions::default()).await
    }

    /// Plays the track with optional configuration settings.
    ///
    /// With [`PlayOptions::no_replace`] set and a track already playing, the
    /// node keeps the current track and this still succeeds.
    pub async fn play_with(&self, track: Track, options: PlayOptions) -> Result<()> {
        let _lock = self.commands.lock().await;

        self.start(track, options).await
    }

    /// Pauses playback. Does nothing if already paused.
    pub async fn pause(&self) -> Result<()> {
        self.set_paused(true).await
    }

    /// Resumes playback. Does nothing if not paused.
    pub async fn resume(&self) -> Result<()> {
        self.set_paused(false).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        let _lock = self.commands.lock().await;

        if self.data.lock().paused == paused {
            return Ok(());
        }

        self.update(
            UpdatePlayer {
                paused: Some(paused),
                ..Default::default()
            },
            false,
        )
        .await?;

        self.data.lock().paused = paused;

        Ok(())
    }

    /// Seeks the current track, clamping the position to the track's length.
    ///
    /// Returns the position that was sought to.
    pub async fn seek(&self, position: i64) -> Result<u64> {
        let _lock = self.commands.lock().await;

        let track = self.data.lock().track.clone().ok_or(Error::NoActiveTrack)?;
        let position = clamp_position(position, track.duration());

        self.update(
            UpdatePlayer {
                position: Some(position),
                ..Default::default()
            },
            false,
        )
        .await?;

        self.data.lock().position = position;

        Ok(position)
    }

    /// Sets the volume, from 0 to 1000.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        if volume > MAX_VOLUME {
            return Err(Error::InvalidVolume(volume));
        }

        let _lock = self.commands.lock().await;

        self.update(
            UpdatePlayer {
                volume: Some(volume),
                ..Default::default()
            },
            false,
        )
        .await?;

        self.data.lock().volume = volume;

        Ok(())
    }

    /// Replaces the active filters.
    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        let _lock = self.commands.lock().await;

        self.update(
            UpdatePlayer {
                filters: Some(filters.clone()),
                ..Default::default()
            },
            false,
        )
        .await?;

        self.data.lock().filters = filters;

        Ok(())
    }

    /// Stops the current track. The queue is kept.
    pub async fn stop(&self) -> Result<()> {
        let _lock = self.commands.lock().await;

        self.halt().await
    }

    /// Plays the next queued track, or stops if the queue is empty.
    ///
    /// Returns the track that is now playing.
    pub async fn skip(&self) -> Result<Option<Track>> {
        let _lock = self.commands.lock().await;

        let next = self.data.lock().queue.pop_front();

        match next {
            Some(track) => {
                if let Err(why) = self.start(track.clone(), PlayOptions::default()).await {
                    self.data.lock().queue.push_front(track);

                    return Err(why);
                }

                Ok(Some(track))
            },
            None => self.halt().await.map(|_| None),
        }
    }

    pub fn enqueue(&self, track: Track) {
        self.data.lock().queue.push_back(track);
    }

    pub fn enqueue_front(&self, track: Track) {
        self.data.lock().queue.push_front(track);
    }

    pub fn dequeue(&self) -> Option<Track> {
        self.data.lock().queue.pop_front()
    }

    pub fn remove(&self, index: usize) -> Option<Track> {
        self.data.lock().queue.remove(index)
    }

    pub fn clear_queue(&self) {
        self.data.lock().queue.clear();
    }

    pub fn queue(&self) -> Vec<Track> {
        self.data.lock().queue.iter().cloned().collect()
    }

    /// Sends voice credentials to the node so it can join the channel.
    ///
    /// The credentials are kept even if sending fails, and are sent again
    /// once the next session is established.
    pub async fn update_voice(&self, credentials: VoiceCredentials) -> Result<()> {
        let _lock = self.commands.lock().await;

        self.data.lock().voice = Some(credentials);
        self.voice_pending.store(true, Ordering::SeqCst);

        self.send_voice().await
    }

    /// Refreshes the local state from the node's view of the player.
    pub async fn sync(&self) -> Result<PlayerInfo> {
        let _lock = self.commands.lock().await;

        let session_id = self.shared.session_id()?;
        let info = self
            .shared
            .guarded(self.shared.rest.player(&session_id, self.guild_id))
            .await?;

        let mut data = self.data.lock();
        data.track = info.track.clone();
        data.position = info.state.position;
        data.connected = info.state.connected;
        data.volume = info.volume;
        data.paused = info.paused;
        data.filters = info.filters.clone();

        Ok(info)
    }

    async fn flush_voice(&self) -> Result<()> {
        let _lock = self.commands.lock().await;

        if !self.voice_pending.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.send_voice().await
    }

    async fn send_voice(&self) -> Result<()> {
        let voice = match self.data.lock().voice.clone() {
            Some(voice) => voice,
            None => return Ok(()),
        };

        self.update(
            UpdatePlayer {
                voice: Some(VoiceState::from(voice)),
                ..Default::default()
            },
            false,
        )
        .await?;

        self.voice_pending.store(false, Ordering::SeqCst);

        Ok(())
    }

    async fn start(&self, track: Track, options: PlayOptions) -> Result<()> {
        let playing = self.data.lock().track.is_some();

        let update = UpdatePlayer {
            encoded_track: Some(Some(track.encoded.clone())),
            position: options.start_time,
            end_time: options.end_time,
            paused: Some(false),
            ..Default::default()
        };

        self.update(update, options.no_replace).await?;

        let mut data = self.data.lock();
        data.paused = false;

        if !(options.no_replace && playing) {
            data.track = Some(track);
            data.position = options.start_time.unwrap_or(0);
        }

        Ok(())
    }

    async fn halt(&self) -> Result<()> {
        self.update(
            UpdatePlayer {
                encoded_track: Some(None),
                ..Default::default()
            },
            false,
        )
        .await?;

        let mut data = self.data.lock();
        data.track = None;
        data.position = 0;

        Ok(())
    }

    async fn advance(&self) -> Result<()> {
        let _lock = self.commands.lock().await;

        let next = {
            let mut data = self.data.lock();

            if data.track.is_some() {
                return Ok(());
            }

            data.queue.pop_front()
        };

        match next {
            Some(track) => self.start(track, PlayOptions::default()).await,
            None => Ok(()),
        }
    }

    async fn replay(&self) -> Result<()> {
        let _lock = self.commands.lock().await;

        let update = {
            let data = self.data.lock();

            let voice = match data.voice {
                Some(ref voice) => voice.clone(),
                None => return Ok(()),
            };

            UpdatePlayer {
                encoded_track: data.track.as_ref().map(|track| Some(track.encoded.clone())),
                position: data.track.as_ref().map(|_| data.position),
                volume: Some(data.volume),
                paused: Some(data.paused),
                filters: Some(data.filters.clone()),
                voice: Some(VoiceState::from(voice)),
                ..Default::default()
            }
        };

        self.update(update, false).await?;
        self.voice_pending.store(false, Ordering::SeqCst);

        Ok(())
    }

    async fn update(&self, update: UpdatePlayer, no_replace: bool) -> Result<PlayerInfo> {
        let session_id = self.shared.session_id()?;
        let call = self
            .shared
            .rest
            .update_player(&session_id, self.guild_id, &update, no_replace);

        self.shared.guarded(call).await
    }
}

fn clamp_position(position: i64, duration: Option<u64>) -> u64 {
    let position = position.max(0) as u64;

    match duration {
        Some(duration) => position.min(duration),
        None => position,
    }
}

#[cfg(test)]
mod tests {
    use super::clamp_position;

    #[test]
    fn positions_are_clamped_to_the_track() {
        assert_eq!(clamp_position(-100, Some(200_000)), 0);
        assert_eq!(clamp_position(999_999, Some(200_000)), 200_000);
        assert_eq!(clamp_position(1_500, Some(200_000)), 1_500);
        assert_eq!(clamp_position(999_999, None), 999_999);
    }
}
