//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How an unanswered survey item is treated on submission.
///
/// The participant form pre-selects a neutral rating, so "unanswered" is
/// ambiguous. This makes the choice explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPolicy {
    /// Every item must carry an explicit rating.
    RequireExplicit,
    /// Missing items are filled with the configured default rating.
    AcceptDefault,
}

impl FromStr for AnswerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require_explicit" => Ok(Self::RequireExplicit),
            "accept_default" => Ok(Self::AcceptDefault),
            other => Err(format!(
                "expected require_explicit or accept_default, got {other}"
            )),
        }
    }
}

/// Which fields each milestone write carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Only the fields produced by the milestone (plus id and status).
    Incremental,
    /// Every field known so far, re-sent on each milestone.
    Cumulative,
}

impl FromStr for RecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "cumulative" => Ok(Self::Cumulative),
            other => Err(format!("expected incremental or cumulative, got {other}")),
        }
    }
}

/// Retry behaviour for transient record store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero drops the write on first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Study runner configuration.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    /// HTTP port for the participant API.
    pub port: u16,
    /// libSQL database file backing the record sheet.
    pub db_path: PathBuf,
    /// Sheet name inside the database.
    pub sheet_name: String,
    /// Prepared passage index (JSON).
    pub index_path: PathBuf,
    /// Time in the chat stage before the participant may end the conversation.
    pub chat_unlock_after: Duration,
    /// Most recent turns sent to the response generator.
    pub history_turns: usize,
    /// Passages retrieved per chat turn.
    pub retrieval_k: usize,
    /// Rewrite the utterance into a standalone search query before retrieval.
    pub rewrite_queries: bool,
    pub answer_policy: AnswerPolicy,
    /// Neutral rating used by `AnswerPolicy::AcceptDefault`.
    pub default_rating: u8,
    pub record_policy: RecordPolicy,
    pub store_retry: RetryPolicy,
    /// Sessions idle longer than this are dropped by the sweeper.
    pub session_idle_timeout: Duration,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/study.db"),
            sheet_name: "responses".to_string(),
            index_path: PathBuf::from("./data/passage_index.json"),
            chat_unlock_after: Duration::from_secs(600), // 10 minutes
            history_turns: 6,
            retrieval_k: 4,
            rewrite_queries: true,
            answer_policy: AnswerPolicy::RequireExplicit,
            default_rating: 3,
            record_policy: RecordPolicy::Incremental,
            store_retry: RetryPolicy::default(),
            session_idle_timeout: Duration::from_secs(2 * 3600),
        }
    }
}

impl StudyConfig {
    /// Build configuration from `STUDY_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_rating: u8 = env_parse("STUDY_DEFAULT_RATING", defaults.default_rating)?;
        if !(1..=5).contains(&default_rating) {
            return Err(ConfigError::InvalidValue {
                key: "STUDY_DEFAULT_RATING".to_string(),
                message: format!("must be between 1 and 5, got {default_rating}"),
            });
        }

        let history_turns: usize = env_parse("STUDY_HISTORY_TURNS", defaults.history_turns)?;
        if history_turns == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STUDY_HISTORY_TURNS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: env_parse("STUDY_PORT", defaults.port)?,
            db_path: std::env::var("STUDY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            sheet_name: std::env::var("STUDY_SHEET_NAME").unwrap_or(defaults.sheet_name),
            index_path: std::env::var("STUDY_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_path),
            chat_unlock_after: Duration::from_secs(env_parse(
                "STUDY_CHAT_UNLOCK_SECS",
                defaults.chat_unlock_after.as_secs(),
            )?),
            history_turns,
            retrieval_k: env_parse("STUDY_RETRIEVAL_K", defaults.retrieval_k)?,
            rewrite_queries: env_parse("STUDY_REWRITE_QUERIES", defaults.rewrite_queries)?,
            answer_policy: env_parse("STUDY_ANSWER_POLICY", defaults.answer_policy)?,
            default_rating,
            record_policy: env_parse("STUDY_RECORD_POLICY", defaults.record_policy)?,
            store_retry: RetryPolicy {
                max_retries: env_parse("STUDY_STORE_RETRIES", defaults.store_retry.max_retries)?,
                ..defaults.store_retry
            },
            session_idle_timeout: env_minutes(
                "STUDY_SESSION_IDLE_MINUTES",
                defaults.session_idle_timeout,
            )?,
        })
    }
}

/// Parse an optional env var, keeping `default` when it is unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

/// Parse a whole-minute duration, rejecting values too large to represent.
fn env_minutes(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let minutes: u64 = env_parse(key, default.as_secs() / 60)?;
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{minutes} minutes is out of range"),
        })
}
