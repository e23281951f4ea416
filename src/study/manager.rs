//! StudyManager: owns live participant sessions, drives transitions and
//! persists milestone records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::StudyConfig;
use crate::error::{ChatError, FlowError};
use crate::store::{PartialRecord, UpsertRecorder};

use super::chat::ChatResponder;
use super::session::{
    FeedbackSubmission, FlowRules, ParticipantSession, PosttestSubmission, PretestSubmission,
    SessionView,
};

/// Whether a step's record reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveStatus {
    Saved,
    /// The step produces no record (or was a repeated final action).
    Skipped,
    Failed { reason: String },
}

/// Result of a screen action.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub view: SessionView,
    pub save: SaveStatus,
}

/// Result of one chat turn. Exactly one of `reply` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub view: SessionView,
}

type SessionHandle = Arc<Mutex<ParticipantSession>>;

/// Coordinates participant sessions, the recorder and the chat responder.
///
/// Each session sits behind its own mutex, so one participant has at most
/// one action in flight while different participants proceed in parallel.
pub struct StudyManager {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    recorder: Arc<UpsertRecorder>,
    responder: ChatResponder,
    rules: FlowRules,
    idle_timeout: Duration,
}

impl StudyManager {
    pub fn new(
        recorder: Arc<UpsertRecorder>,
        responder: ChatResponder,
        config: &StudyConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            recorder,
            responder,
            rules: FlowRules::from(config),
            idle_timeout: config.session_idle_timeout,
        }
    }

    /// Create a fresh session on the consent screen.
    pub async fn start_session(&self) -> SessionView {
        let session = ParticipantSession::new();
        let id = session.id();
        let view = session.view(self.rules.chat_unlock_after, Instant::now());
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %id, "Started participant session");
        view
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView, FlowError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        Ok(session.view(self.rules.chat_unlock_after, Instant::now()))
    }

    pub async fn consent(&self, id: Uuid, agreed: bool) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, rules| s.consent(agreed, rules, Local::now()).map(Some))
            .await
    }

    pub async fn submit_pretest(
        &self,
        id: Uuid,
        submission: &PretestSubmission,
    ) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, rules| {
            s.submit_pretest(submission, rules, Local::now()).map(Some)
        })
        .await
    }

    pub async fn begin_chat(&self, id: Uuid) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, _| s.begin_chat(Instant::now()).map(|_| None))
            .await
    }

    /// Record the utterance, then ask the persona for a reply.
    ///
    /// A generation failure is reported inline; the utterance stays in the
    /// conversation and no assistant turn is added.
    pub async fn send_message(&self, id: Uuid, text: &str) -> Result<ChatOutcome, FlowError> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        session.touch(Instant::now());
        session.push_user_turn(text)?;

        let result = match session.chat_context() {
            Some(ctx) => self.responder.reply(&ctx).await,
            None => Err(ChatError::EmptyReply),
        };

        let (reply, error) = match result {
            Ok(reply) => {
                session.push_assistant_turn(reply.clone());
                (Some(reply), None)
            }
            Err(e) => {
                tracing::warn!(session_id = %id, "Chat turn failed: {}", e);
                (None, Some(e.to_string()))
            }
        };
        session.touch(Instant::now());

        Ok(ChatOutcome {
            reply,
            error,
            view: session.view(self.rules.chat_unlock_after, Instant::now()),
        })
    }

    pub async fn end_chat(&self, id: Uuid) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, rules| {
            s.end_chat(rules, Instant::now(), Local::now()).map(Some)
        })
        .await
    }

    pub async fn submit_posttest(
        &self,
        id: Uuid,
        submission: &PosttestSubmission,
    ) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, rules| {
            s.submit_posttest(submission, rules, Local::now()).map(Some)
        })
        .await
    }

    pub async fn submit_feedback(
        &self,
        id: Uuid,
        feedback: &FeedbackSubmission,
    ) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, _| s.submit_feedback(feedback, Local::now()))
            .await
    }

    pub async fn finish_without_feedback(&self, id: Uuid) -> Result<StepOutcome, FlowError> {
        self.step(id, |s, _| s.finish_without_feedback(Local::now()))
            .await
    }

    /// Drop a session. Its persisted record is untouched.
    pub async fn end_session(&self, id: Uuid) -> Result<(), FlowError> {
        match self.sessions.write().await.remove(&id) {
            Some(_) => {
                tracing::info!(session_id = %id, "Ended participant session");
                Ok(())
            }
            None => Err(FlowError::SessionNotFound(id)),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session idle for longer than the configured timeout.
    /// Sessions with an action in flight are never idle.
    pub async fn sweep_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => session.idle_for(now) < self.idle_timeout,
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "Swept idle sessions");
        }
        removed
    }

    async fn session(&self, id: Uuid) -> Result<SessionHandle, FlowError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(FlowError::SessionNotFound(id))
    }

    /// Run one guarded transition and persist whatever record it produced.
    async fn step<F>(&self, id: Uuid, apply: F) -> Result<StepOutcome, FlowError>
    where
        F: FnOnce(&mut ParticipantSession, &FlowRules) -> Result<Option<PartialRecord>, FlowError>,
    {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        session.touch(Instant::now());
        let record = apply(&mut *session, &self.rules)?;
        let save = self.save(id, record).await;
        Ok(StepOutcome {
            view: session.view(self.rules.chat_unlock_after, Instant::now()),
            save,
        })
    }

    /// Store failures are logged and reported, never propagated.
    async fn save(&self, id: Uuid, record: Option<PartialRecord>) -> SaveStatus {
        let Some(record) = record else {
            return SaveStatus::Skipped;
        };
        let status = record.get("status").unwrap_or_default().to_string();
        match self.recorder.upsert(&record).await {
            Ok(outcome) => {
                tracing::info!(
                    session_id = %id,
                    status = %status,
                    row = outcome.row,
                    action = ?outcome.action,
                    added_headers = outcome.added_headers.len(),
                    "Saved participant record"
                );
                SaveStatus::Saved
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %id,
                    status = %status,
                    "Failed to save participant record: {}",
                    e
                );
                SaveStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Spawn a background task that periodically drops idle sessions.
pub fn spawn_session_sweeper(
    manager: Arc<StudyManager>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            manager.sweep_idle(Instant::now()).await;
        }
    })
}
