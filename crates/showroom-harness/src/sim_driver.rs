//! Simulation driver.
//!
//! `SimDriver` plays the role of the production `Runtime` for deterministic
//! tests: it feeds events into a [`ChatSession`], executes the returned
//! [`ChatAction`]s against a [`SimServer`] and queues the outcomes as new
//! events. Faults (failed dials, failed or late REST responses, dropped
//! transports) are drawn from a seeded RNG, so a seed reproduces a run.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use showroom_client::{
    ApiError, AuthChange, ChatAction, ChatConfig, ChatEvent, ChatSession,
};
use showroom_core::{ConnectionState, TokenSource, TransportId};
use showroom_proto::{BearerToken, ClientFrame, RoomId, UserId};

use crate::{
    SimEnv,
    invariants::{InvariantRegistry, SessionSnapshot, Violation},
    sim_server::{ConnId, SimServer},
};

/// Upper bound on events processed by one [`SimDriver::run_until_idle`].
const MAX_STEPS: usize = 10_000;

/// Clock step and round limit for [`SimDriver::settle`]. Covers the longest
/// backoff several times over.
const SETTLE_STEP: Duration = Duration::from_secs(5);
const SETTLE_ROUNDS: usize = 60;

/// Fault probabilities, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// A dial fails instead of opening.
    pub dial_failure: f64,
    /// A REST call fails with a network error.
    pub fetch_failure: f64,
    /// A REST response is held back until the clock next advances.
    pub fetch_delay: f64,
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// A moderately hostile network.
    pub fn flaky() -> Self {
        Self { dial_failure: 0.2, fetch_failure: 0.2, fetch_delay: 0.3 }
    }
}

/// Drives a [`ChatSession`] against a [`SimServer`].
pub struct SimDriver {
    env: SimEnv,
    session: ChatSession<SimEnv>,
    server: SimServer,
    links: BTreeMap<TransportId, ConnId>,
    pending: VecDeque<ChatEvent>,
    delayed: Vec<ChatEvent>,
    refresh_tokens: VecDeque<BearerToken>,
    faults: FaultConfig,
    rng: ChaCha8Rng,
    invariants: Option<InvariantRegistry>,
    sent: Vec<ClientFrame>,
    forced_sign_outs: usize,
    frames_held: bool,
}

impl SimDriver {
    /// Driver with default configuration.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, &ChatConfig::default())
    }

    /// Driver with explicit configuration.
    pub fn with_config(seed: u64, config: &ChatConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        Self {
            session: ChatSession::new(env.clone(), config),
            env,
            server: SimServer::new(),
            links: BTreeMap::new(),
            pending: VecDeque::new(),
            delayed: Vec::new(),
            refresh_tokens: VecDeque::new(),
            faults: FaultConfig::none(),
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            invariants: None,
            sent: Vec::new(),
            forced_sign_outs: 0,
            frames_held: false,
        }
    }

    /// Enable fault injection.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Change fault injection mid-run.
    pub fn set_faults(&mut self, faults: FaultConfig) {
        self.faults = faults;
    }

    /// Check invariants after every event.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// The session under test.
    pub fn session(&self) -> &ChatSession<SimEnv> {
        &self.session
    }

    /// The simulated backend.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// The simulated backend, for setup and out-of-band posts.
    pub fn server_mut(&mut self) -> &mut SimServer {
        &mut self.server
    }

    /// Simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Frames the session sent, in order.
    pub fn sent_frames(&self) -> &[ClientFrame] {
        &self.sent
    }

    /// How often the session asked the auth session to sign out.
    pub fn forced_sign_outs(&self) -> usize {
        self.forced_sign_outs
    }

    /// Queue a token for the next refresh request. The server only accepts
    /// it once issued through [`SimServer::issue_token`].
    pub fn push_refresh_token(&mut self, token: BearerToken) {
        self.refresh_tokens.push_back(token);
    }

    /// Register `token` with the server and sign in with it.
    pub fn sign_in(&mut self, user: &str, token: &str) {
        let user = UserId::from(user);
        let token = BearerToken::new(token);
        self.server.issue_token(&user, &token);
        self.inject(ChatEvent::Auth(AuthChange::SignedIn { user, token: Some(token) }));
    }

    /// Feed one event, then run until quiet.
    pub fn inject(&mut self, event: ChatEvent) {
        self.pending.push_back(event);
        self.run_until_idle();
    }

    /// Send a message as the UI would.
    pub fn send_message(&mut self, room: &str, body: &str) {
        self.inject(ChatEvent::SendMessage { room_id: RoomId::from(room), body: body.into() });
    }

    /// Open a room as the UI would.
    pub fn open_room(&mut self, room: &str) {
        self.inject(ChatEvent::OpenRoom(RoomId::from(room)));
    }

    /// Stop (or resume) delivering server frames. Held frames stay queued
    /// on the server and are lost if their connection drops.
    pub fn hold_frames(&mut self, held: bool) {
        self.frames_held = held;
    }

    /// Drop the live transport from the server side.
    pub fn drop_transport(&mut self) {
        let Some(transport) = self.session.transport() else {
            return;
        };
        if let Some(conn) = self.links.remove(&transport) {
            self.server.disconnect(conn);
        }
        self.inject(ChatEvent::TransportClosed { transport, reason: "simulated drop".into() });
    }

    /// Move the clock forward, release held-back responses and tick.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        self.pending.extend(self.delayed.drain(..));
        self.inject(ChatEvent::Tick);
    }

    /// Advance in `step` increments until `total` has elapsed.
    pub fn advance_by(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.advance(step);
            elapsed += step;
        }
    }

    /// Disable faults and advance until the session is connected with no
    /// catch-up fetch in flight. Returns `false` if it never settles.
    pub fn settle(&mut self) -> bool {
        self.faults = FaultConfig::none();
        for _ in 0..SETTLE_ROUNDS {
            self.advance(SETTLE_STEP);
            let connected = self.session.connection_state() == ConnectionState::Connected;
            let fresh = self.session.rooms().all(|r| !self.session.is_stale(r.id()));
            if self.delayed.is_empty() && (self.session.user().is_none() || (connected && fresh)) {
                return true;
            }
        }
        false
    }

    /// Process queued events and server frames until none remain.
    ///
    /// Returns the number of events processed.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS {
            self.collect_frames();
            let Some(event) = self.pending.pop_front() else {
                return steps;
            };
            let context = format!("after {event:?}");
            let actions = self.session.handle(event);
            self.execute(actions);
            self.check_invariants(&context);
            steps += 1;
        }
        tracing::warn!(steps, "simulation did not go idle");
        steps
    }

    /// Observable state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.session)
    }

    /// Every room whose history is loaded holds exactly the server's
    /// messages, in server order.
    pub fn caught_up(&self) -> Result<(), Violation> {
        for room in self.session.rooms().filter(|r| r.history_loaded()) {
            let local: Vec<_> =
                room.messages().iter().filter(|m| m.seq.is_some()).map(|m| &m.id).collect();
            let remote: Vec<_> = self.server.messages(room.id()).iter().map(|m| &m.id).collect();
            if local != remote {
                return Err(Violation {
                    invariant: "caught_up",
                    message: format!("room {}: local {local:?}, server {remote:?}", room.id()),
                });
            }
        }
        Ok(())
    }

    fn check_invariants(&self, context: &str) {
        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(), context);
        }
    }

    fn collect_frames(&mut self) {
        if self.frames_held {
            return;
        }
        for (transport, conn) in &self.links {
            for frame in self.server.take_outbound(*conn) {
                self.pending.push_back(ChatEvent::FrameReceived { transport: *transport, frame });
            }
        }
    }

    fn execute(&mut self, actions: Vec<ChatAction>) {
        for action in actions {
            match action {
                ChatAction::Dial { transport } => {
                    if self.roll(self.faults.dial_failure) {
                        self.pending.push_back(ChatEvent::TransportClosed {
                            transport,
                            reason: "simulated dial failure".into(),
                        });
                    } else {
                        let conn = self.server.connect();
                        self.links.insert(transport, conn);
                        self.pending.push_back(ChatEvent::TransportOpened(transport));
                    }
                },
                ChatAction::Send { transport, frame } => {
                    if let Some(conn) = self.links.get(&transport) {
                        self.server.receive(*conn, frame.clone());
                    }
                    self.sent.push(frame);
                },
                ChatAction::CloseTransport { transport } => {
                    if let Some(conn) = self.links.remove(&transport) {
                        self.server.disconnect(conn);
                    }
                },
                ChatAction::FetchRooms { generation, request } => {
                    let result = self.fetch(SimServer::rooms_for);
                    self.respond(ChatEvent::RoomsFetched { generation, request, result });
                },
                ChatAction::FetchUnread { generation } => {
                    let result = self.fetch(SimServer::unread_for);
                    self.respond(ChatEvent::UnreadFetched { generation, result });
                },
                ChatAction::FetchHistory { generation, room_id, request } => {
                    let result = self.fetch(|server, token| server.history(token, &room_id));
                    self.respond(ChatEvent::HistoryFetched { generation, room_id, request, result });
                },
                ChatAction::RefreshToken { generation } => {
                    let result = self
                        .refresh_tokens
                        .pop_front()
                        .ok_or_else(|| "no refreshed token available".to_owned());
                    self.pending.push_back(ChatEvent::TokenRefreshed { generation, result });
                },
                ChatAction::ForceSignOut => {
                    self.forced_sign_outs += 1;
                    self.pending.push_back(ChatEvent::Auth(AuthChange::SignedOut));
                },
            }
        }
    }

    fn fetch<T>(
        &mut self,
        call: impl FnOnce(&SimServer, &BearerToken) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        if self.roll(self.faults.fetch_failure) {
            return Err(ApiError::Network("simulated failure".into()));
        }
        let token = self.session.token_source().current_token().ok_or(ApiError::Unauthorized)?;
        call(&self.server, &token)
    }

    fn respond(&mut self, event: ChatEvent) {
        if self.roll(self.faults.fetch_delay) {
            self.delayed.push(event);
        } else {
            self.pending.push_back(event);
        }
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_bool(probability.min(1.0))
    }
}

impl std::fmt::Debug for SimDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDriver")
            .field("env", &self.env)
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .field("delayed", &self.delayed.len())
            .finish_non_exhaustive()
    }
}
