//! Persistence for questions, choices and votes.
//!
//! [`PollStore`] is the seam between the voting rules and the database.
//! [`MongoStore`] is the production backend; [`MemoryStore`] keeps
//! everything in process, for development and tests.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use thiserror::Error;

use crate::model::{
    common::{ChoiceId, QuestionId, Tally, UserId},
    db::{Choice, NewPoll, Question, Vote, VoteChange},
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Errors raised by a [`PollStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Bson(#[from] mongodb::bson::de::Error),
    /// Another write to the same (user, question) vote got in first.
    /// The operation had no effect and may be retried.
    #[error("Concurrent write to the same vote")]
    Contention,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage backend for polls.
///
/// Implementations must make [`PollStore::upsert_vote`] atomic per
/// (user, question): concurrent calls for the same pair leave exactly one
/// vote, while calls for different pairs never contend with each other.
#[rocket::async_trait]
pub trait PollStore: Send + Sync {
    /// Insert a question and its choices, returning the new question's ID.
    async fn insert_question(&self, poll: NewPoll) -> Result<QuestionId>;

    /// Delete a question along with its choices and their votes.
    /// Returns false if there was no such question.
    async fn delete_question(&self, id: QuestionId) -> Result<bool>;

    async fn question(&self, id: QuestionId) -> Result<Option<Question>>;

    /// Questions published at or before `now`, newest first, at most `limit`.
    async fn published_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>>;

    /// All choices of a question, in insertion order.
    async fn choices(&self, question_id: QuestionId) -> Result<Vec<Choice>>;

    async fn choice(&self, id: ChoiceId) -> Result<Option<Choice>>;

    /// The vote `user_id` holds on `question_id`, if any.
    async fn vote(&self, user_id: UserId, question_id: QuestionId) -> Result<Option<Vote>>;

    /// Point `user_id`'s vote on the choice's question at `choice`, creating
    /// the vote if this is their first.
    ///
    /// Returns `None`, leaving no vote behind, if the choice has been deleted
    /// by the time the write lands. Returns [`StoreError::Contention`]
    /// without writing anything if the write could not be serialised against
    /// a concurrent one.
    async fn upsert_vote(&self, user_id: UserId, choice: &Choice) -> Result<Option<VoteChange>>;

    /// Count the votes on each choice of a question.
    async fn tally(&self, question_id: QuestionId) -> Result<Tally>;
}

/// Shared handle on the managed [`PollStore`].
#[derive(Clone)]
pub struct Polls(Arc<dyn PollStore>);

impl Polls {
    pub fn new(store: impl PollStore + 'static) -> Self {
        Self(Arc::new(store))
    }

    /// Wrap a store the caller keeps its own handle on.
    pub fn shared<S: PollStore + 'static>(store: Arc<S>) -> Self {
        Self(store)
    }
}

impl Deref for Polls {
    type Target = dyn PollStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Polls {
    type Error = ();

    /// Get the store from the managed state.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Polls>() {
            Some(polls) => request::Outcome::Success(polls.clone()),
            None => {
                error!("No poll store is managed");
                request::Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}
