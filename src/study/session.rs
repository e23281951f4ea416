//! One participant's run through the study.
//!
//! Every step method validates first and mutates second, so a rejected
//! action leaves the session exactly as it was. Steps that persist something
//! return the `PartialRecord` to hand to the recorder.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{AnswerPolicy, RecordPolicy, StudyConfig};
use crate::error::{FieldIssue, FlowError};
use crate::store::PartialRecord;

use super::model::{
    AnswerSet, Demographics, DemographicsInput, Gender, POSTTEST_SECTIONS, PRETEST_SECTIONS,
    RatingSubmission, Section, validate_ratings,
};
use super::prompts::{OPENING_LINE, chat_instruction};
use super::state::{Action, Screen};

/// Format of every `timestamp_*` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Experimental condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Group {
    A,
    B,
}

impl Group {
    /// Uniform binary draw.
    pub fn draw() -> Self {
        if rand::random::<bool>() {
            Self::A
        } else {
            Self::B
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// Points in the run that get a wall-clock stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Milestone {
    Start,
    PretestEnd,
    ChatEnd,
    PosttestEnd,
    FeedbackSubmit,
    StudyEndNoFeedback,
}

impl Milestone {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Start => "timestamp_start",
            Self::PretestEnd => "timestamp_pretest_end",
            Self::ChatEnd => "timestamp_chat_end",
            Self::PosttestEnd => "timestamp_posttest_end",
            Self::FeedbackSubmit => "timestamp_feedback_submit",
            Self::StudyEndNoFeedback => "timestamp_study_end_no_feedback",
        }
    }
}

/// Value written to the `status` column at each milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    ConsentGiven,
    PretestCompleted,
    ChatCompleted,
    PosttestCompleted,
    FinishedWithFeedback,
    FinishedWithoutFeedback,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsentGiven => "consent_given",
            Self::PretestCompleted => "pretest_completed",
            Self::ChatCompleted => "chat_completed",
            Self::PosttestCompleted => "posttest_completed",
            Self::FinishedWithFeedback => "finished_with_feedback",
            Self::FinishedWithoutFeedback => "finished_without_feedback",
        }
    }
}

/// The parts of `StudyConfig` that shape the flow itself.
#[derive(Debug, Clone, Copy)]
pub struct FlowRules {
    pub answer_policy: AnswerPolicy,
    pub default_rating: u8,
    pub record_policy: RecordPolicy,
    pub chat_unlock_after: Duration,
}

impl From<&StudyConfig> for FlowRules {
    fn from(config: &StudyConfig) -> Self {
        Self {
            answer_policy: config.answer_policy,
            default_rating: config.default_rating,
            record_policy: config.record_policy,
            chat_unlock_after: config.chat_unlock_after,
        }
    }
}

impl Default for FlowRules {
    fn default() -> Self {
        Self::from(&StudyConfig::default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PretestSubmission {
    #[serde(default)]
    pub demographics: DemographicsInput,
    #[serde(default)]
    pub answers: RatingSubmission,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PosttestSubmission {
    #[serde(default)]
    pub answers: RatingSubmission,
    #[serde(default)]
    pub reflection: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackSubmission {
    #[serde(default)]
    pub positive: String,
    #[serde(default)]
    pub negative: String,
}

/// Chat gate state as seen by a client.
#[derive(Debug, Clone, Serialize)]
pub struct ChatGate {
    pub remaining_secs: u64,
    pub can_end_chat: bool,
}

/// What a client needs to render the current screen.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub screen: Screen,
    pub group: Option<Group>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatGate>,
    pub conversation: Vec<Turn>,
    /// On the last screen; only feedback or finishing remain.
    pub finished: bool,
    pub feedback_submitted: bool,
}

/// Input to one chat turn: prior turns plus the new utterance.
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    pub history: &'a [Turn],
    pub utterance: &'a str,
    pub gender: Option<Gender>,
}

/// All data collected for one participant.
#[derive(Debug, Clone)]
pub struct ParticipantSession {
    id: Uuid,
    group: Option<Group>,
    screen: Screen,
    demographics: Option<Demographics>,
    answers: AnswerSet,
    reflection: Option<String>,
    conversation: Vec<Turn>,
    timestamps: BTreeMap<Milestone, DateTime<Local>>,
    feedback_submitted: bool,
    chat_started_at: Option<Instant>,
    last_activity: Instant,
}

impl Default for ParticipantSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            group: None,
            screen: Screen::Consent,
            demographics: None,
            answers: AnswerSet::new(),
            reflection: None,
            conversation: Vec::new(),
            timestamps: BTreeMap::new(),
            feedback_submitted: false,
            chat_started_at: None,
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group(&self) -> Option<Group> {
        self.group
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn demographics(&self) -> Option<&Demographics> {
        self.demographics.as_ref()
    }

    pub fn conversation(&self) -> &[Turn] {
        &self.conversation
    }

    pub fn timestamp(&self, milestone: Milestone) -> Option<DateTime<Local>> {
        self.timestamps.get(&milestone).copied()
    }

    pub fn feedback_submitted(&self) -> bool {
        self.feedback_submitted
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    fn check(&self, action: Action) -> Result<Screen, FlowError> {
        self.screen
            .apply(action)
            .ok_or_else(|| FlowError::InvalidAction {
                screen: self.screen.to_string(),
                action: action.to_string(),
            })
    }

    /// Consent → Pretest.
    pub fn consent(
        &mut self,
        agreed: bool,
        rules: &FlowRules,
        now: DateTime<Local>,
    ) -> Result<PartialRecord, FlowError> {
        let next = self.check(Action::Consent)?;
        if !agreed {
            return Err(FlowError::validation(vec![FieldIssue::new(
                "agreed",
                "consent is required to take part in the study",
            )]));
        }

        if self.group.is_none() {
            self.group = Some(Group::draw());
        }
        self.timestamps.insert(Milestone::Start, now);
        self.screen = next;
        Ok(self.milestone_record(Status::ConsentGiven, Milestone::Start, rules.record_policy))
    }

    /// Pretest → ChatInstruction.
    pub fn submit_pretest(
        &mut self,
        submission: &PretestSubmission,
        rules: &FlowRules,
        now: DateTime<Local>,
    ) -> Result<PartialRecord, FlowError> {
        let next = self.check(Action::SubmitPretest)?;

        let mut issues = Vec::new();
        let demographics = Demographics::validate(&submission.demographics, &mut issues);
        let answers = validate_ratings(
            &PRETEST_SECTIONS,
            &submission.answers,
            rules.answer_policy,
            rules.default_rating,
            &mut issues,
        );
        let Some(demographics) = demographics.filter(|_| issues.is_empty()) else {
            return Err(FlowError::validation(issues));
        };

        self.demographics = Some(demographics);
        self.answers.extend(answers);
        self.timestamps.insert(Milestone::PretestEnd, now);
        self.screen = next;
        Ok(self.milestone_record(
            Status::PretestCompleted,
            Milestone::PretestEnd,
            rules.record_policy,
        ))
    }

    /// ChatInstruction → Chat. Starts the gate clock and seeds the opening
    /// line on first entry.
    pub fn begin_chat(&mut self, now: Instant) -> Result<(), FlowError> {
        let next = self.check(Action::BeginChat)?;
        if self.chat_started_at.is_none() {
            self.chat_started_at = Some(now);
        }
        if self.conversation.is_empty() {
            self.conversation.push(Turn::assistant(OPENING_LINE));
        }
        self.screen = next;
        Ok(())
    }

    /// Record the participant's utterance. The reply is appended separately
    /// once generation succeeds.
    pub fn push_user_turn(&mut self, text: &str) -> Result<(), FlowError> {
        self.check(Action::SendMessage)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(FlowError::validation(vec![FieldIssue::new(
                "text",
                "message must not be empty",
            )]));
        }
        self.conversation.push(Turn::user(text));
        Ok(())
    }

    pub fn push_assistant_turn(&mut self, text: impl Into<String>) {
        self.conversation.push(Turn::assistant(text));
    }

    /// The latest utterance and everything said before it, if the last turn
    /// is the participant's.
    pub fn chat_context(&self) -> Option<ChatContext<'_>> {
        let (last, history) = self.conversation.split_last()?;
        (last.speaker == Speaker::User).then(|| ChatContext {
            history,
            utterance: last.text.as_str(),
            gender: self.demographics.as_ref().map(|d| d.gender),
        })
    }

    /// Time left before the conversation may end. `None` before the chat
    /// has started.
    pub fn chat_remaining(&self, unlock_after: Duration, now: Instant) -> Option<Duration> {
        let started = self.chat_started_at?;
        Some(unlock_after.saturating_sub(now.saturating_duration_since(started)))
    }

    /// Chat → Posttest, once `unlock_after` has elapsed.
    pub fn end_chat(
        &mut self,
        rules: &FlowRules,
        now: Instant,
        stamp: DateTime<Local>,
    ) -> Result<PartialRecord, FlowError> {
        let next = self.check(Action::EndChat)?;
        let remaining = self
            .chat_remaining(rules.chat_unlock_after, now)
            .unwrap_or(rules.chat_unlock_after);
        if !remaining.is_zero() {
            return Err(FlowError::ChatLocked { remaining });
        }

        self.timestamps.insert(Milestone::ChatEnd, stamp);
        self.screen = next;
        Ok(self.milestone_record(Status::ChatCompleted, Milestone::ChatEnd, rules.record_policy))
    }

    /// Posttest → Thankyou.
    pub fn submit_posttest(
        &mut self,
        submission: &PosttestSubmission,
        rules: &FlowRules,
        now: DateTime<Local>,
    ) -> Result<PartialRecord, FlowError> {
        let next = self.check(Action::SubmitPosttest)?;

        let mut issues = Vec::new();
        let answers = validate_ratings(
            &POSTTEST_SECTIONS,
            &submission.answers,
            rules.answer_policy,
            rules.default_rating,
            &mut issues,
        );
        if !issues.is_empty() {
            return Err(FlowError::validation(issues));
        }

        self.answers.extend(answers);
        self.reflection = submission
            .reflection
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        self.timestamps.insert(Milestone::PosttestEnd, now);
        self.screen = next;
        Ok(self.milestone_record(
            Status::PosttestCompleted,
            Milestone::PosttestEnd,
            rules.record_policy,
        ))
    }

    /// One-shot final feedback. Returns `None` once either final action has
    /// already run.
    pub fn submit_feedback(
        &mut self,
        feedback: &FeedbackSubmission,
        now: DateTime<Local>,
    ) -> Result<Option<PartialRecord>, FlowError> {
        self.check(Action::SubmitFeedback)?;
        if self.feedback_submitted {
            return Ok(None);
        }

        self.feedback_submitted = true;
        self.timestamps.insert(Milestone::FeedbackSubmit, now);
        Ok(Some(
            PartialRecord::new(self.id.to_string())
                .with(Milestone::FeedbackSubmit.column(), format_timestamp(&now))
                .with("status", Status::FinishedWithFeedback.as_str())
                .with("feedback_final_positive", feedback.positive.trim())
                .with("feedback_final_negative", feedback.negative.trim()),
        ))
    }

    /// One-shot finish without feedback. Returns `None` once either final
    /// action has already run.
    pub fn finish_without_feedback(
        &mut self,
        now: DateTime<Local>,
    ) -> Result<Option<PartialRecord>, FlowError> {
        self.check(Action::FinishWithoutFeedback)?;
        if self.feedback_submitted {
            return Ok(None);
        }

        self.feedback_submitted = true;
        self.timestamps.insert(Milestone::StudyEndNoFeedback, now);
        Ok(Some(
            PartialRecord::new(self.id.to_string())
                .with(Milestone::StudyEndNoFeedback.column(), format_timestamp(&now))
                .with("status", Status::FinishedWithoutFeedback.as_str()),
        ))
    }

    /// `"<Speaker>: <text>"` lines.
    pub fn transcript(&self) -> String {
        self.conversation
            .iter()
            .map(|t| format!("{}: {}", t.speaker, t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn view(&self, unlock_after: Duration, now: Instant) -> SessionView {
        let chat = (self.screen == Screen::Chat)
            .then(|| self.chat_remaining(unlock_after, now))
            .flatten()
            .map(|remaining| ChatGate {
                remaining_secs: remaining.as_secs_f64().ceil() as u64,
                can_end_chat: remaining.is_zero(),
            });
        SessionView {
            id: self.id,
            screen: self.screen,
            group: self.group,
            instruction: (self.screen == Screen::ChatInstruction)
                .then(|| chat_instruction(self.group)),
            chat,
            conversation: self.conversation.clone(),
            finished: self.screen.is_terminal(),
            feedback_submitted: self.feedback_submitted,
        }
    }

    fn milestone_record(
        &self,
        status: Status,
        milestone: Milestone,
        policy: RecordPolicy,
    ) -> PartialRecord {
        let mut record = PartialRecord::new(self.id.to_string());
        record.set("status", status.as_str());
        match policy {
            RecordPolicy::Incremental => self.milestone_fields(milestone, &mut record),
            RecordPolicy::Cumulative => {
                for reached in self.timestamps.keys().copied() {
                    if reached <= Milestone::PosttestEnd {
                        self.milestone_fields(reached, &mut record);
                    }
                }
            }
        }
        record
    }

    fn milestone_fields(&self, milestone: Milestone, record: &mut PartialRecord) {
        if let Some(stamp) = self.timestamps.get(&milestone) {
            record.set(milestone.column(), format_timestamp(stamp));
        }
        match milestone {
            Milestone::Start => {
                if let Some(group) = self.group {
                    record.set("group", group);
                }
            }
            Milestone::PretestEnd => {
                if let Some(demographics) = &self.demographics {
                    for (column, value) in demographics.fields() {
                        record.set(column, value);
                    }
                }
                self.answer_fields(&PRETEST_SECTIONS, record);
            }
            Milestone::ChatEnd => record.set("conversation_log", self.transcript()),
            Milestone::PosttestEnd => {
                self.answer_fields(&POSTTEST_SECTIONS, record);
                record.set("post_reflection", self.reflection.as_deref().unwrap_or(""));
            }
            Milestone::FeedbackSubmit | Milestone::StudyEndNoFeedback => {}
        }
    }

    fn answer_fields(&self, sections: &[Section], record: &mut PartialRecord) {
        for section in sections {
            let Some(answers) = self.answers.get(section.key) else {
                continue;
            };
            for item in section.instrument.items {
                if let Some(answer) = answers.get(item.key) {
                    record.set(section.column(item), answer);
                }
            }
        }
    }
}

pub fn format_timestamp(stamp: &DateTime<Local>) -> String {
    stamp.format(TIMESTAMP_FORMAT).to_string()
}
