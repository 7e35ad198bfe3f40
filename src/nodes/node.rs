use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use super::transport::{Connector, Transport, WsConnector};
use super::{ConnectionState, NodeConfig};
use crate::events::{Event, EventDispatcher};
use crate::http::{HttpClient, HyperClient};
use crate::model::{Incoming, NodeEvent, SessionUpdate, Stats};
use crate::player::{AudioPlayer, AudioPlayerManager};
use crate::rest::Rest;
use crate::voice::{VoiceCoordinator, VoiceCredentials, VoiceServerUpdate, VoiceStateUpdate};
use crate::{Error, Result};

/// State shared between a node, its receive loop and its players.
pub(crate) struct Shared {
    pub(crate) config: NodeConfig,
    pub(crate) rest: Rest,
    pub(crate) events: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    cancel: Mutex<CancellationToken>,
    stats: RwLock<Option<Stats>>,
}

impl Shared {
    pub(crate) fn new(config: NodeConfig, http: Arc<dyn HttpClient>) -> Self {
        let rest = Rest::new(config.http_base(), config.password.clone(), http);
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            rest,
            config,
            events: EventDispatcher::new(),
            state,
            outbound: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            stats: RwLock::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub(crate) fn session_id(&self) -> Result<String> {
        self.state
            .borrow()
            .session_id()
            .map(ToOwned::to_owned)
            .ok_or(Error::NotConnected)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state.clone());

        if previous != state {
            debug!("[{}] {:?} -> {:?}", self.name(), previous, state);
        }
    }

    /// Runs a backend call, failing it with [`Error::NotConnected`] if the
    /// node is shut down first.
    pub(crate) async fn guarded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let cancel = self.cancel.lock().clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::NotConnected),
            result = call => result,
        }
    }

    fn send(&self, text: String) -> Result<()> {
        if !self.state.borrow().is_connected() {
            return Err(Error::NotConnected);
        }

        match *self.outbound.lock() {
            Some(ref outbound) => outbound.send(text).map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }
}

/// A connection to one audio node, owning that node's players.
pub struct Node {
    shared: Arc<Shared>,
    players: Arc<AudioPlayerManager>,
    voice: VoiceCoordinator,
    connector: Arc<dyn Connector>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Creates a node speaking WebSocket and HTTP to the configured host.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(WsConnector), Arc::new(HyperClient::new()))
    }

    /// Creates a node over custom session and HTTP transports.
    pub fn with_transport(
        config: NodeConfig,
        connector: Arc<dyn Connector>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        config.validate()?;

        let voice = VoiceCoordinator::new(config.user_id);
        let shared = Arc::new(Shared::new(config, http));

        Ok(Self {
            players: Arc::new(AudioPlayerManager::new(Arc::clone(&shared))),
            shared,
            voice,
            connector,
            task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watches connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The current session ID, set only while connected.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id().ok()
    }

    /// The most recent statistics pushed by the node.
    pub fn stats(&self) -> Option<Stats> {
        self.shared.stats.read().clone()
    }

    pub fn penalty(&self) -> Option<i32> {
        self.shared.stats.read().as_ref().map(Stats::penalty)
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.shared.events
    }

    pub fn players(&self) -> &AudioPlayerManager {
        &self.players
    }

    pub fn rest(&self) -> &Rest {
        &self.shared.rest
    }

    /// Starts connecting in the background.
    ///
    /// Does nothing if the node is already running. A closed node can be
    /// started again.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|_| Error::NotSupported("nodes must be started within a tokio runtime"))?;
        let mut task = self.task.lock();

        if task.as_ref().map_or(false, |task| !task.is_finished()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.shared.cancel.lock() = cancel.clone();
        self.shared.set_state(ConnectionState::Connecting);

        info!("[{}] Connecting to {}", self.name(), self.shared.config.websocket_url());

        *task = Some(handle.spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.players),
            Arc::clone(&self.connector),
            cancel,
        )));

        Ok(())
    }

    /// Waits until a session is established, returning its ID.
    ///
    /// Fails with [`Error::NotConnected`] if the node closes instead.
    pub async fn wait_connected(&self) -> Result<String> {
        let mut changes = self.shared.state.subscribe();
        let state = changes
            .wait_for(|state| state.is_connected() || *state == ConnectionState::Closed)
            .await
            .map_err(|_| Error::NotConnected)?;

        state.session_id().map(ToOwned::to_owned).ok_or(Error::NotConnected)
    }

    /// Signals the node to shut down without waiting for it.
    ///
    /// Pending connection attempts, backoff timers and in-flight player
    /// commands are cancelled.
    pub fn shutdown(&self) {
        self.shared.cancel.lock().cancel();
    }

    /// Shuts the node down and waits for its connection to close.
    pub async fn close(&self) {
        self.shutdown();

        let task = self.task.lock().take();

        if let Some(task) = task {
            if let Err(why) = task.await {
                warn!("[{}] Connection task failed: {:?}", self.name(), why);
            }
        }

        self.shared.set_state(ConnectionState::Closed);
    }

    /// Sends a directive over the session transport.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.shared.send(serde_json::to_string(payload)?)
    }

    /// Creates a player, forwarding voice credentials already received for
    /// the guild.
    ///
    /// Without a session the credentials are sent once one is established.
    /// If the node rejects them, the player is destroyed again and the error
    /// is returned.
    pub async fn create_player(&self, guild_id: u64) -> Result<Arc<AudioPlayer>> {
        let player = self.players.create(guild_id)?;

        if let Some(channel_id) = self.voice.channel(guild_id) {
            player.set_channel(Some(channel_id));
        }

        // The new player has been sent nothing, whatever an earlier player
        // of the guild received.
        self.voice.forget(guild_id);

        if let Some(credentials) = self.voice.merged(guild_id) {
            match self.forward_voice(guild_id, credentials).await {
                Ok(_) => {},
                Err(Error::NotConnected) => {
                    info!("[{}] Voice for guild {} will be sent once connected", self.name(), guild_id);
                },
                Err(why) => {
                    warn!("[{}] The node rejected voice for guild {}: {}", self.name(), guild_id, why);

                    self.players.destroy(guild_id).await;

                    return Err(why);
                },
            }
        }

        Ok(player)
    }

    /// Destroys the guild's player. Returns whether one existed.
    pub async fn destroy_player(&self, guild_id: u64) -> bool {
        let destroyed = self.players.destroy(guild_id).await;
        self.voice.forget(guild_id);

        destroyed
    }

    /// Feeds a voice server update from the Discord gateway.
    ///
    /// Returns whether merged credentials were forwarded to the node. They
    /// are held for [`create_player`] if the guild has no player yet.
    ///
    /// [`create_player`]: #method.create_player
    pub async fn voice_server_update(&self, update: VoiceServerUpdate) -> Result<bool> {
        let guild_id = update.guild_id;

        match self.voice.server_update(update) {
            Some(credentials) => self.forward_voice(guild_id, credentials).await,
            None => Ok(false),
        }
    }

    /// Feeds a voice state update from the Discord gateway.
    ///
    /// Updates for other users are ignored. Returns whether merged
    /// credentials were forwarded to the node.
    pub async fn voice_state_update(&self, update: VoiceStateUpdate) -> Result<bool> {
        let guild_id = update.guild_id;

        if update.user_id == self.shared.config.user_id {
            if let Ok(player) = self.players.get(guild_id) {
                player.set_channel(update.channel_id);
            }
        }

        match self.voice.state_update(update) {
            Some(credentials) => self.forward_voice(guild_id, credentials).await,
            None => Ok(false),
        }
    }

    async fn forward_voice(&self, guild_id: u64, credentials: VoiceCredentials) -> Result<bool> {
        let player = match self.players.get(guild_id) {
            Ok(player) => player,
            Err(_) => {
                debug!("[{}] Holding voice for guild {} until it has a player", self.name(), guild_id);

                self.voice.forget(guild_id);

                return Ok(false);
            },
        };

        if let Err(why) = player.update_voice(credentials).await {
            self.voice.forget(guild_id);

            return Err(why);
        }

        Ok(true)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Why a session ended.
enum Outcome {
    /// Shutdown was requested.
    Shutdown,
    /// An established session was lost.
    Lost { session_id: String, reason: Error },
    /// The transport ended before the node acknowledged a session.
    Failed(Error),
}

struct ResumeTicket {
    session_id: String,
    lost_at: Instant,
}

/// Drives the connect, resume and reconnect cycle until shutdown or until
/// reconnecting is given up.
async fn run(
    shared: Arc<Shared>,
    players: Arc<AudioPlayerManager>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
) {
    let config = &shared.config;
    let mut attempt = 0u32;
    let mut resume: Option<ResumeTicket> = None;
    let mut had_session = false;

    loop {
        let expired = resume
            .as_ref()
            .map_or(false, |ticket| !config.can_resume(ticket.lost_at.elapsed()));

        if expired {
            if let Some(ticket) = resume.take() {
                info!("[{}] Resume window of {} has passed", shared.name(), ticket.session_id);
            }
        }

        let resuming = resume.is_some();

        shared.set_state(match (resuming, attempt) {
            (true, _) => ConnectionState::Resuming,
            (false, 0) => ConnectionState::Connecting,
            (false, attempt) => ConnectionState::Reconnecting { attempt },
        });

        let handshake = config.handshake(resume.as_ref().map(|ticket| ticket.session_id.as_str()));
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = connector.connect(&handshake) => connected,
        };

        let failure = match connected {
            Ok(transport) => match session(&shared, &players, transport, &cancel, had_session).await {
                Outcome::Shutdown => break,
                Outcome::Lost { session_id, reason } => {
                    warn!("[{}] Lost session {}: {}", shared.name(), session_id, reason);

                    had_session = true;
                    attempt = 0;
                    shared.events.publish(Event::Disconnected {
                        reason: reason.to_string(),
                    });

                    if config.resume_key.is_some() {
                        resume = Some(ResumeTicket {
                            session_id,
                            lost_at: Instant::now(),
                        });

                        continue;
                    }

                    reason
                },
                Outcome::Failed(why) => why,
            },
            Err(Error::AuthorizationFailed) => {
                error!("[{}] The node rejected the configured password", shared.name());

                shared.events.publish(Event::ConnectionFailed {
                    reason: Error::AuthorizationFailed.to_string(),
                });

                break;
            },
            Err(why) => why,
        };

        if resuming {
            warn!("[{}] Resume attempt failed: {}", shared.name(), failure);
        }

        attempt += 1;

        if config.backoff.exhausted(attempt) {
            error!(
                "[{}] Giving up after {} attempts: {}",
                shared.name(),
                attempt - 1,
                failure,
            );

            shared.events.publish(Event::ConnectionFailed {
                reason: failure.to_string(),
            });

            break;
        }

        let delay = config.backoff.delay(attempt);

        info!("[{}] Reconnecting in {:?} (attempt {}): {}", shared.name(), delay, attempt, failure);

        shared.set_state(ConnectionState::Reconnecting { attempt });
        shared.events.publish(Event::Reconnecting { attempt, delay });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {},
        }
    }

    *shared.outbound.lock() = None;
    shared.set_state(ConnectionState::Closed);

    info!("[{}] Closed", shared.name());
}

/// Pumps one open transport until it ends.
async fn session(
    shared: &Arc<Shared>,
    players: &Arc<AudioPlayerManager>,
    mut transport: Box<dyn Transport>,
    cancel: &CancellationToken,
    had_session: bool,
) -> Outcome {
    let (outbound, mut queued) = mpsc::unbounded_channel::<String>();
    let mut session_id: Option<String> = None;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(why) = transport.close().await {
                    debug!("[{}] Error closing transport: {}", shared.name(), why);
                }

                break Outcome::Shutdown;
            },
            Some(text) = queued.recv() => {
                if let Err(why) = transport.send(text).await {
                    break ended(session_id, why);
                }
            },
            frame = transport.recv() => match frame {
                Some(Ok(text)) => {
                    trace!("[{}] Received text: {}", shared.name(), text);

                    if let Some(id) = handle_message(shared, players, &text, &outbound, had_session) {
                        session_id = Some(id);
                    }
                },
                Some(Err(why)) => break ended(session_id, why),
                None => break ended(session_id, Error::ConnectionLost),
            },
        }
    };

    *shared.outbound.lock() = None;

    outcome
}

fn ended(session_id: Option<String>, reason: Error) -> Outcome {
    match session_id {
        Some(session_id) => Outcome::Lost { session_id, reason },
        None => Outcome::Failed(reason),
    }
}

/// Applies and publishes one inbound message, returning the session ID if the
/// message established one.
fn handle_message(
    shared: &Arc<Shared>,
    players: &Arc<AudioPlayerManager>,
    text: &str,
    outbound: &UnboundedSender<String>,
    had_session: bool,
) -> Option<String> {
    let message = match Incoming::decode(text) {
        Ok(message) => message,
        Err(why) => {
            warn!("[{}] Error parsing received JSON: {:?}", shared.name(), why);

            return None;
        },
    };

    match message {
        Incoming::Ready(ready) => {
            let session_id = ready.session_id.clone();

            *shared.outbound.lock() = Some(outbound.clone());
            shared.set_state(ConnectionState::Connected {
                session_id: session_id.clone(),
            });
            shared.events.publish(Event::Ready(ready.clone()));

            if ready.resumed {
                info!("[{}] Resumed session {}", shared.name(), session_id);

                shared.events.publish(Event::Resumed {
                    session_id: session_id.clone(),
                });

                players.flush_voice();
            } else {
                info!("[{}] Established session {}", shared.name(), session_id);

                shared.events.publish(Event::Connected {
                    session_id: session_id.clone(),
                });

                if shared.config.resume_key.is_some() {
                    tokio::spawn(mark_resumable(Arc::clone(shared), session_id.clone()));
                }

                if had_session && shared.config.replay_players {
                    players.replay_all();
                } else {
                    players.flush_voice();
                }
            }

            Some(session_id)
        },
        Incoming::PlayerUpdate(update) => {
            players.apply_update(&update);
            shared.events.publish(Event::PlayerUpdate(update));

            None
        },
        Incoming::Stats(stats) => {
            *shared.stats.write() = Some(stats.clone());
            shared.events.publish(Event::Stats(stats));

            None
        },
        Incoming::Event(event) => {
            players.handle_event(&event);
            shared.events.publish(match event {
                NodeEvent::TrackStart(event) => Event::TrackStart(event),
                NodeEvent::TrackEnd(event) => Event::TrackEnd(event),
                NodeEvent::TrackException(event) => Event::TrackException(event),
                NodeEvent::TrackStuck(event) => Event::TrackStuck(event),
                NodeEvent::WebSocketClosed(event) => Event::WebSocketClosed(event),
            });

            None
        },
        Incoming::Unknown(value) => {
            shared.events.publish(Event::Unknown(value));

            None
        },
    }
}

async fn mark_resumable(shared: Arc<Shared>, session_id: String) {
    let update = SessionUpdate {
        resuming: Some(true),
        timeout: Some(shared.config.resume_timeout),
    };

    match shared.guarded(shared.rest.update_session(&session_id, &update)).await {
        Ok(_) => debug!("[{}] Session {} is resumable", shared.name(), session_id),
        Err(why) => warn!("[{}] Failed to make session {} resumable: {}", shared.name(), session_id, why),
    }
}
