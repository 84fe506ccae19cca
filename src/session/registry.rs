//! # Session Registry
//!
//! Maps session ids to live session actors. It is the only entry point for the
//! transport layer and the HTTP API: creating a session, routing caller audio,
//! querying, and ending.
//!
//! ## Thread Safety:
//! The map sits behind a std `RwLock`. Routing audio takes a read lock, and create/end
//! take a write lock for the insert or remove only. No lock is held across an `.await`.
//!
//! ## Ending a Session:
//! `end` removes the entry first, so routing to an ended id fails immediately. It then
//! stops the recognizer, cancels the active turn through the shared slot, and asks
//! the actor to stop. None of these steps waits for in-flight work.
//!
//! ## Rust Concepts Used:
//! - **`RwLock<HashMap<K, V>>`**: many readers or one writer; guards release the lock
//!   when they go out of scope
//! - **`Addr<A>`**: a cloneable handle to an actor; `send` awaits a reply, `do_send`
//!   fires and forgets
//! - **`Arc<dyn CollaboratorFactory>`**: the registry builds collaborators without
//!   knowing which implementation it was given

use crate::audio::PcmChunk;
use crate::collaborators::{CollaboratorFactory, Recognizer, Transport};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::actor::{
    GetHistory, GetStatus, SessionActor, SessionEvent, SessionParts, SessionStatus, Shutdown,
    UserAudio,
};
use crate::session::barge_in::BargeInController;
use crate::session::cancel::ActiveTurnSlot;
use crate::session::history::ChatMessage;
use crate::session::pipeline::TurnPipeline;
use crate::session::SessionId;
use crate::state::BridgeMetrics;
use actix::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Buffered session events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Session behavior shared by every call.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub max_concurrent_sessions: usize,
    pub barge_in_threshold: f32,
    pub turn_timeout: Option<Duration>,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_concurrent_sessions: config.max_concurrent_sessions,
            barge_in_threshold: config.barge_in_threshold,
            turn_timeout: (config.turn_timeout_secs > 0)
                .then(|| Duration::from_secs(config.turn_timeout_secs)),
        }
    }
}

struct SessionHandle {
    addr: Addr<SessionActor>,
    recognizer: Arc<dyn Recognizer>,
    turn_slot: ActiveTurnSlot,
    events: broadcast::Sender<SessionEvent>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    factory: Arc<dyn CollaboratorFactory>,
    settings: SessionSettings,
    metrics: Arc<BridgeMetrics>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn CollaboratorFactory>,
        settings: SessionSettings,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            settings,
            metrics,
        }
    }

    /// Create a session for a newly connected caller.
    ///
    /// Fails if the registry is full or the recognizer cannot be started; nothing is
    /// registered in that case. Must be called from within an actix system.
    pub async fn create(&self, transport: Arc<dyn Transport>) -> Result<SessionId, SessionError> {
        let created = self.try_create(transport).await;
        match &created {
            Ok(session_id) => {
                self.metrics.record_session_created();
                info!(session_id = %session_id, active = self.session_count(), "Session created");
            }
            Err(err) => {
                self.metrics.record_session_failure();
                warn!(error = %err, "Session creation failed");
            }
        }
        created
    }

    async fn try_create(&self, transport: Arc<dyn Transport>) -> Result<SessionId, SessionError> {
        let capacity = self.settings.max_concurrent_sessions;
        if self.session_count() >= capacity {
            return Err(SessionError::CapacityReached(capacity));
        }

        let session_id = SessionId::new();
        let recognizer = self.factory.recognizer(&session_id)?;
        let synthesizer = self.factory.synthesizer(&session_id)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        recognizer.start(events_tx).await?;

        let mut sessions = self.write();
        // Another create may have filled the last slot while the recognizer connected
        if sessions.len() >= capacity {
            drop(sessions);
            recognizer.stop();
            return Err(SessionError::CapacityReached(capacity));
        }

        let turn_slot = ActiveTurnSlot::default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pipeline = TurnPipeline::new(
            session_id.clone(),
            self.factory.generator(),
            synthesizer,
            transport,
        );

        let addr = SessionActor::new(SessionParts {
            session_id: session_id.clone(),
            system_prompt: self.settings.system_prompt.clone(),
            pipeline,
            recognizer: recognizer.clone(),
            recognizer_events: events_rx,
            barge_in: BargeInController::new(self.settings.barge_in_threshold),
            turn_slot: turn_slot.clone(),
            events: events.clone(),
            metrics: self.metrics.clone(),
            turn_timeout: self.settings.turn_timeout,
        })
        .start();

        sessions.insert(
            session_id.clone(),
            SessionHandle {
                addr,
                recognizer,
                turn_slot,
                events,
            },
        );

        Ok(session_id)
    }

    /// Deliver caller audio to a session. Returns `false` if the session does not exist.
    pub fn route_audio(&self, session_id: &SessionId, chunk: PcmChunk) -> bool {
        match self.read().get(session_id) {
            Some(handle) => {
                handle.addr.do_send(UserAudio(chunk));
                true
            }
            None => false,
        }
    }

    /// End a session. Returns `false` if it was not registered (already ended or unknown).
    pub fn end(&self, session_id: &SessionId) -> bool {
        let handle = match self.write().remove(session_id) {
            Some(handle) => handle,
            None => return false,
        };

        handle.recognizer.stop();
        handle.turn_slot.cancel();
        handle.addr.do_send(Shutdown);

        self.metrics.record_session_ended();
        info!(session_id = %session_id, active = self.session_count(), "Session ended");
        true
    }

    /// End every session, e.g. on server shutdown. Returns how many were ended.
    pub fn end_all(&self) -> usize {
        self.session_ids()
            .iter()
            .filter(|session_id| self.end(session_id))
            .count()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.read().contains_key(session_id)
    }

    pub fn subscribe(&self, session_id: &SessionId) -> Option<broadcast::Receiver<SessionEvent>> {
        self.read()
            .get(session_id)
            .map(|handle| handle.events.subscribe())
    }

    pub async fn history(&self, session_id: &SessionId) -> Option<Vec<ChatMessage>> {
        let addr = self.addr(session_id)?;
        addr.send(GetHistory).await.ok()
    }

    pub async fn status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        let addr = self.addr(session_id)?;
        addr.send(GetStatus).await.ok()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.read().keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.settings.max_concurrent_sessions
    }

    fn addr(&self, session_id: &SessionId) -> Option<Addr<SessionActor>> {
        self.read().get(session_id).map(|handle| handle.addr.clone())
    }

    // The map is only ever mutated by single insert/remove calls, so a poisoned lock
    // still holds a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
