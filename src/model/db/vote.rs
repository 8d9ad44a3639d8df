use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::{
    common::{ChoiceId, QuestionId, UserId},
    mongodb::Id,
};

/// Core vote data, as stored in the database.
///
/// `question_id` duplicates the owner of `choice_id` so that the
/// (user, question) pair can carry a unique index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    /// The voting user.
    pub user_id: UserId,
    /// Foreign Key question ID.
    pub question_id: QuestionId,
    /// Foreign Key choice ID. Reassigned when the user changes their vote.
    pub choice_id: ChoiceId,
}

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

/// The effect a single vote had on the stored vote for its (user, question).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoteChange {
    /// First vote by this user on this question.
    Created,
    /// The user moved their vote here from another choice.
    Reassigned { from: ChoiceId },
    /// The user re-submitted their existing choice.
    Unchanged,
}
