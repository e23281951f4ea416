//! Study state machine: which screen the participant is on.

use serde::{Deserialize, Serialize};

/// The screens of a study run.
///
/// Progresses linearly: Consent → Pretest → ChatInstruction → Chat →
/// Posttest → Thankyou.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Consent,
    Pretest,
    ChatInstruction,
    Chat,
    Posttest,
    Thankyou,
}

/// Confirmation actions a participant can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Consent,
    SubmitPretest,
    BeginChat,
    SendMessage,
    EndChat,
    SubmitPosttest,
    SubmitFeedback,
    FinishWithoutFeedback,
}

impl Screen {
    /// The transition table. `None` means the action is not offered here.
    pub fn apply(&self, action: Action) -> Option<Screen> {
        use Action as A;
        use Screen::*;
        match (self, action) {
            (Consent, A::Consent) => Some(Pretest),
            (Pretest, A::SubmitPretest) => Some(ChatInstruction),
            (ChatInstruction, A::BeginChat) => Some(Chat),
            (Chat, A::SendMessage) => Some(Chat),
            (Chat, A::EndChat) => Some(Posttest),
            (Posttest, A::SubmitPosttest) => Some(Thankyou),
            (Thankyou, A::SubmitFeedback | A::FinishWithoutFeedback) => Some(Thankyou),
            _ => None,
        }
    }

    /// Whether this screen is the last one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Thankyou)
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Consent => "consent",
            Self::Pretest => "pretest",
            Self::ChatInstruction => "chat_instruction",
            Self::Chat => "chat",
            Self::Posttest => "posttest",
            Self::Thankyou => "thankyou",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Consent => "consent",
            Self::SubmitPretest => "submit_pretest",
            Self::BeginChat => "begin_chat",
            Self::SendMessage => "send_message",
            Self::EndChat => "end_chat",
            Self::SubmitPosttest => "submit_posttest",
            Self::SubmitFeedback => "submit_feedback",
            Self::FinishWithoutFeedback => "finish_without_feedback",
        };
        write!(f, "{s}")
    }
}
