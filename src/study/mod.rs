//! The study flow: consent, pre-survey, persona chat, post-survey, feedback.
//!
//! A participant's run is a `ParticipantSession` moving through a fixed set of
//! screens. Each completed screen hands a partial record to the upsert
//! recorder, so the shared sheet always holds one merged row per participant.

pub mod chat;
pub mod manager;
pub mod model;
pub mod prompts;
pub mod routes;
pub mod session;
pub mod state;

pub use chat::{ChatResponder, history_window};
pub use manager::{ChatOutcome, SaveStatus, StepOutcome, StudyManager, spawn_session_sweeper};
pub use model::{Answer, Demographics, Education, Employment, Gender};
pub use routes::{StudyRouteState, study_routes};
pub use session::{Group, Milestone, ParticipantSession, SessionView, Speaker, Turn};
pub use state::{Action, Screen};
