use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    common::{ChoiceId, Eligibility, QuestionId},
    db::{Choice, NewPoll, NewQuestion, Question},
    mongodb::serde_hex_id,
};

/// Maximum length, in characters, of question and choice text.
pub const MAX_TEXT_LEN: usize = 200;

/// A question specification, as written by whoever sets up a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    /// Question text.
    pub text: String,
    /// When the question becomes visible and votable.
    pub publish_at: DateTime<Utc>,
    /// When voting stops. Open-ended if absent.
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    /// Possible answers, in display order.
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Reasons a [`QuestionSpec`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("Question text must not be blank")]
    BlankQuestion,
    #[error("Question text is too long ({0} characters)")]
    QuestionTooLong(usize),
    #[error("Choice {0} must not be blank")]
    BlankChoice(usize),
    #[error("Choice {index} is too long ({len} characters)")]
    ChoiceTooLong { index: usize, len: usize },
    #[error("Question ends at {end_at} before it is published at {publish_at}")]
    EndsBeforePublished {
        publish_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
}

impl TryFrom<QuestionSpec> for NewPoll {
    type Error = SpecError;

    fn try_from(spec: QuestionSpec) -> Result<Self, Self::Error> {
        if spec.text.trim().is_empty() {
            return Err(SpecError::BlankQuestion);
        }
        let len = spec.text.chars().count();
        if len > MAX_TEXT_LEN {
            return Err(SpecError::QuestionTooLong(len));
        }
        if let Some(end_at) = spec.end_at {
            if end_at < spec.publish_at {
                return Err(SpecError::EndsBeforePublished {
                    publish_at: spec.publish_at,
                    end_at,
                });
            }
        }
        for (index, choice) in spec.choices.iter().enumerate() {
            if choice.trim().is_empty() {
                return Err(SpecError::BlankChoice(index));
            }
            let len = choice.chars().count();
            if len > MAX_TEXT_LEN {
                return Err(SpecError::ChoiceTooLong { index, len });
            }
        }

        Ok(Self {
            question: NewQuestion {
                text: spec.text,
                publish_at: spec.publish_at,
                end_at: spec.end_at,
            },
            choices: spec.choices,
        })
    }
}

/// A summary of a question, as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSummary {
    /// Question unique ID.
    #[serde(with = "serde_hex_id")]
    pub id: QuestionId,
    /// Question text.
    pub text: String,
    pub publish_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    /// Voting window state at the time of the request.
    pub eligibility: Eligibility,
    /// Published within the last day.
    pub published_recently: bool,
}

impl QuestionSummary {
    pub fn new(question: &Question, now: DateTime<Utc>) -> Self {
        Self {
            id: question.id,
            text: question.text.clone(),
            publish_at: question.publish_at,
            end_at: question.end_at,
            eligibility: question.eligibility(now),
            published_recently: question.was_published_recently(now),
        }
    }
}

/// A single choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceDescription {
    #[serde(with = "serde_hex_id")]
    pub id: ChoiceId,
    pub text: String,
}

impl From<Choice> for ChoiceDescription {
    fn from(choice: Choice) -> Self {
        Self {
            id: choice.id,
            text: choice.choice.text,
        }
    }
}

/// A question with everything needed to present a voting form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDescription {
    #[serde(flatten)]
    pub summary: QuestionSummary,
    /// Can the question be voted on right now?
    pub can_vote: bool,
    pub choices: Vec<ChoiceDescription>,
}

impl QuestionDescription {
    pub fn new(question: &Question, choices: Vec<Choice>, now: DateTime<Utc>) -> Self {
        Self {
            summary: QuestionSummary::new(question, now),
            can_vote: question.can_vote(now),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }
}
