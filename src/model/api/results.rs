use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{ChoiceId, QuestionId, Tally},
    db::{Choice, Question, Vote, VoteChange},
    mongodb::serde_hex_id,
};
use crate::recorder::VoteReceipt;

use super::question::QuestionSummary;

/// The live vote count for one choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceResult {
    #[serde(with = "serde_hex_id")]
    pub id: ChoiceId,
    pub text: String,
    pub votes: u64,
}

/// Results for a whole question, choices in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResults {
    #[serde(flatten)]
    pub summary: QuestionSummary,
    pub choices: Vec<ChoiceResult>,
    /// Total votes across all choices.
    pub total: u64,
}

impl QuestionResults {
    pub fn new(question: &Question, choices: Vec<Choice>, tally: &Tally, now: DateTime<Utc>) -> Self {
        let choices: Vec<_> = choices
            .into_iter()
            .map(|choice| ChoiceResult {
                id: choice.id,
                votes: tally.count(choice.id),
                text: choice.choice.text,
            })
            .collect();
        Self {
            summary: QuestionSummary::new(question, now),
            total: choices.iter().map(|c| c.votes).sum(),
            choices,
        }
    }
}

/// What a vote submission did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Reassigned,
    Unchanged,
}

/// Response to a successful vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    #[serde(with = "serde_hex_id")]
    pub question_id: QuestionId,
    #[serde(with = "serde_hex_id")]
    pub choice_id: ChoiceId,
    pub change: ChangeKind,
    /// The choice the vote was moved away from, if any.
    #[serde(with = "serde_hex_id::option")]
    pub previous_choice_id: Option<ChoiceId>,
    /// Votes now held by the chosen choice.
    pub votes: u64,
    /// Votes now held by the whole question.
    pub total: u64,
}

impl From<VoteReceipt> for VoteResponse {
    fn from(receipt: VoteReceipt) -> Self {
        let (change, previous_choice_id) = match receipt.change {
            VoteChange::Created => (ChangeKind::Created, None),
            VoteChange::Reassigned { from } => (ChangeKind::Reassigned, Some(from)),
            VoteChange::Unchanged => (ChangeKind::Unchanged, None),
        };
        Self {
            question_id: receipt.question_id,
            choice_id: receipt.choice_id,
            change,
            previous_choice_id,
            votes: receipt.votes,
            total: receipt.tally.total(),
        }
    }
}

/// The caller's current vote on a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentVote {
    #[serde(with = "serde_hex_id")]
    pub question_id: QuestionId,
    #[serde(with = "serde_hex_id")]
    pub choice_id: ChoiceId,
}

impl From<Vote> for CurrentVote {
    fn from(vote: Vote) -> Self {
        Self {
            question_id: vote.question_id,
            choice_id: vote.choice_id,
        }
    }
}
