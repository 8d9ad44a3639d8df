use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::tokio::{
    sync::{Mutex, RwLock},
    time::timeout,
};

use crate::model::{
    common::{ChoiceId, QuestionId, Tally, UserId},
    db::{Choice, ChoiceCore, NewPoll, Question, Vote, VoteChange, VoteCore},
    mongodb::Id,
};

use super::{PollStore, Result, StoreError};

type VoteKey = (UserId, QuestionId);

/// An in-process [`PollStore`].
///
/// Each table sits behind its own async `RwLock`. Vote upserts take a
/// per-(user, question) lock for their whole read-check-write, and only that
/// lock is waited on with a timeout. The votes table itself is a single map,
/// so writes to different keys still queue briefly on its write lock; this is
/// the simple baseline, not a sharded store.
///
/// Locks are always taken in table order (questions, choices, votes).
pub struct MemoryStore {
    questions: RwLock<HashMap<QuestionId, Question>>,
    choices: RwLock<Vec<Choice>>,
    votes: RwLock<HashMap<VoteKey, Vote>>,
    key_locks: Mutex<HashMap<VoteKey, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            questions: RwLock::default(),
            choices: RwLock::default(),
            votes: RwLock::default(),
            key_locks: Mutex::default(),
            lock_timeout,
        }
    }

    /// Get (or create) the lock guarding one vote key.
    pub(crate) async fn key_lock(&self, key: VoteKey) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .await
            .entry(key)
            .or_default()
            .clone()
    }
}

#[rocket::async_trait]
impl PollStore for MemoryStore {
    async fn insert_question(&self, poll: NewPoll) -> Result<QuestionId> {
        let question = Question {
            id: Id::new(),
            question: poll.question,
        };
        let id = question.id;
        let new_choices = poll.choices.into_iter().map(|text| Choice {
            id: Id::new(),
            choice: ChoiceCore {
                question_id: id,
                text,
            },
        });

        // Take both locks so the question never appears without its choices.
        let mut questions = self.questions.write().await;
        let mut choices = self.choices.write().await;
        questions.insert(id, question);
        choices.extend(new_choices);
        Ok(id)
    }

    async fn delete_question(&self, id: QuestionId) -> Result<bool> {
        let mut questions = self.questions.write().await;
        let mut choices = self.choices.write().await;
        let mut votes = self.votes.write().await;
        if questions.remove(&id).is_none() {
            return Ok(false);
        }
        choices.retain(|choice| choice.question_id != id);
        votes.retain(|_, vote| vote.question_id != id);
        // A lock still referenced elsewhere may be held or about to be.
        self.key_locks
            .lock()
            .await
            .retain(|(_, question_id), lock| *question_id != id || Arc::strong_count(lock) > 1);
        Ok(true)
    }

    async fn question(&self, id: QuestionId) -> Result<Option<Question>> {
        Ok(self.questions.read().await.get(&id).cloned())
    }

    async fn published_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>> {
        let questions = self.questions.read().await;
        let mut published: Vec<_> = questions
            .values()
            .filter(|question| question.is_published(now))
            .cloned()
            .collect();
        published.sort_by(|a, b| b.publish_at.cmp(&a.publish_at));
        published.truncate(limit);
        Ok(published)
    }

    async fn choices(&self, question_id: QuestionId) -> Result<Vec<Choice>> {
        let choices = self.choices.read().await;
        Ok(choices
            .iter()
            .filter(|choice| choice.question_id == question_id)
            .cloned()
            .collect())
    }

    async fn choice(&self, id: ChoiceId) -> Result<Option<Choice>> {
        let choices = self.choices.read().await;
        Ok(choices.iter().find(|choice| choice.id == id).cloned())
    }

    async fn vote(&self, user_id: UserId, question_id: QuestionId) -> Result<Option<Vote>> {
        Ok(self
            .votes
            .read()
            .await
            .get(&(user_id, question_id))
            .cloned())
    }

    async fn upsert_vote(&self, user_id: UserId, choice: &Choice) -> Result<Option<VoteChange>> {
        let key = (user_id, choice.question_id);
        let lock = self.key_lock(key).await;
        let _guard = match timeout(self.lock_timeout, lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Timed out waiting for the vote lock of user {user_id}");
                return Err(StoreError::Contention);
            }
        };

        // Holding the choices table keeps a cascade delete out until the
        // vote is written, so it will see and remove it.
        let choices = self.choices.read().await;
        if !choices.iter().any(|existing| existing.id == choice.id) {
            debug!("Choice {} vanished before user {user_id}'s vote landed", choice.id);
            return Ok(None);
        }

        let mut votes = self.votes.write().await;
        let change = match votes.get_mut(&key) {
            Some(vote) if vote.choice_id == choice.id => VoteChange::Unchanged,
            Some(vote) => {
                let from = vote.choice_id;
                vote.vote.choice_id = choice.id;
                VoteChange::Reassigned { from }
            }
            None => {
                let vote = Vote {
                    id: Id::new(),
                    vote: VoteCore {
                        user_id,
                        question_id: choice.question_id,
                        choice_id: choice.id,
                    },
                };
                votes.insert(key, vote);
                VoteChange::Created
            }
        };
        Ok(Some(change))
    }

    async fn tally(&self, question_id: QuestionId) -> Result<Tally> {
        let votes = self.votes.read().await;
        Ok(votes
            .values()
            .filter(|vote| vote.question_id == question_id)
            .map(|vote| (vote.choice_id, 1))
            .collect())
    }
}
