use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{eligibility, Eligibility, QuestionId},
    mongodb::optional_bson_datetime,
};

/// Core question data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCore {
    /// Question text.
    pub text: String,
    /// When the question becomes visible and votable.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub publish_at: DateTime<Utc>,
    /// When voting stops. Open-ended if absent.
    #[serde(default, with = "optional_bson_datetime")]
    pub end_at: Option<DateTime<Utc>>,
}

impl QuestionCore {
    /// Where this question sits in its voting window at `now`.
    pub fn eligibility(&self, now: DateTime<Utc>) -> Eligibility {
        eligibility::evaluate(self.publish_at, self.end_at, now)
    }

    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        eligibility::is_published(self.publish_at, now)
    }

    pub fn can_vote(&self, now: DateTime<Utc>) -> bool {
        self.eligibility(now).can_vote()
    }

    pub fn was_published_recently(&self, now: DateTime<Utc>) -> bool {
        eligibility::was_published_recently(self.publish_at, now)
    }
}

/// A question without an ID, ready for insertion.
///
/// Only constructed from a validated [`crate::model::api::QuestionSpec`].
pub type NewQuestion = QuestionCore;

/// A question from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    #[serde(flatten)]
    pub question: QuestionCore,
}

impl Deref for Question {
    type Target = QuestionCore;

    fn deref(&self) -> &Self::Target {
        &self.question
    }
}

/// A question together with the text of each of its choices, validated and
/// ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub question: NewQuestion,
    pub choices: Vec<String>,
}
