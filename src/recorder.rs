//! Recording votes.
//!
//! A user holds at most one vote per question. Voting again on the same
//! question moves that vote to the new choice; tallies are always counted
//! from the stored votes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::tokio::time::sleep;
use thiserror::Error;

use crate::model::{
    common::{ChoiceId, Eligibility, QuestionId, Tally, UserId},
    db::{Choice, Question, VoteChange},
};
use crate::store::{Polls, StoreError};

/// Base delay between contended attempts; attempt `n` waits `n` times this.
const BACKOFF_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("No question with ID '{0}'")]
    QuestionNotFound(QuestionId),
    /// The choice does not exist, or its question no longer does.
    #[error("You must select a valid choice.")]
    ChoiceNotFound(ChoiceId),
    #[error("Voting for this question is not allowed.")]
    VotingClosed {
        question_id: QuestionId,
        eligibility: Eligibility,
    },
    #[error("Vote could not be recorded after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The outcome of a successful vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub question_id: QuestionId,
    pub choice_id: ChoiceId,
    pub change: VoteChange,
    /// Votes now held by the chosen choice.
    pub votes: u64,
    /// Votes now held by each choice of the question.
    pub tally: Tally,
}

/// Applies votes on behalf of users, enforcing the voting window and the
/// one-vote-per-question rule.
#[derive(Clone)]
pub struct VoteRecorder {
    polls: Polls,
    max_attempts: u32,
}

impl VoteRecorder {
    pub fn new(polls: Polls, max_attempts: u32) -> Self {
        Self {
            polls,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Record `user_id`'s vote for `choice_id`, as of `now`.
    ///
    /// Nothing is written unless the choice's question is open for voting at
    /// `now`. Store contention is retried with a linear backoff.
    pub async fn record_vote(
        &self,
        user_id: UserId,
        choice_id: ChoiceId,
        now: DateTime<Utc>,
    ) -> Result<VoteReceipt, RecordError> {
        let choice = self
            .polls
            .choice(choice_id)
            .await?
            .ok_or(RecordError::ChoiceNotFound(choice_id))?;
        let question = self
            .polls
            .question(choice.question_id)
            .await?
            .ok_or(RecordError::ChoiceNotFound(choice_id))?;
        ensure_open(&question, user_id, now)?;
        self.apply(user_id, &question, &choice).await
    }

    /// Record a vote submitted against `question_id`.
    ///
    /// The question is resolved and its window checked before the choice is
    /// looked at, and a choice belonging to any other question counts as not
    /// found.
    pub async fn record_vote_on(
        &self,
        user_id: UserId,
        question_id: QuestionId,
        choice_id: ChoiceId,
        now: DateTime<Utc>,
    ) -> Result<VoteReceipt, RecordError> {
        let question = self
            .polls
            .question(question_id)
            .await?
            .ok_or(RecordError::QuestionNotFound(question_id))?;
        ensure_open(&question, user_id, now)?;
        let choice = self
            .polls
            .choice(choice_id)
            .await?
            .filter(|choice| choice.question_id == question_id)
            .ok_or(RecordError::ChoiceNotFound(choice_id))?;
        self.apply(user_id, &question, &choice).await
    }

    /// Write the vote, retrying contention, and count the result.
    async fn apply(
        &self,
        user_id: UserId,
        question: &Question,
        choice: &Choice,
    ) -> Result<VoteReceipt, RecordError> {
        let mut attempt = 1;
        let change = loop {
            match self.polls.upsert_vote(user_id, choice).await {
                Ok(Some(change)) => break change,
                // Deleted since it was looked up.
                Ok(None) => return Err(RecordError::ChoiceNotFound(choice.id)),
                Err(StoreError::Contention) if attempt < self.max_attempts => {
                    debug!("Vote by user {user_id} contended, attempt {attempt}");
                    sleep(BACKOFF_STEP * attempt).await;
                    attempt += 1;
                }
                Err(StoreError::Contention) => {
                    warn!("Gave up recording vote by user {user_id} after {attempt} attempts");
                    return Err(RecordError::Contention { attempts: attempt });
                }
                Err(err) => return Err(err.into()),
            }
        };
        trace!("User {user_id} voted for {}: {change:?}", choice.id);

        let tally = self.polls.tally(question.id).await?;
        Ok(VoteReceipt {
            question_id: question.id,
            choice_id: choice.id,
            change,
            votes: tally.count(choice.id),
            tally,
        })
    }
}

fn ensure_open(question: &Question, user_id: UserId, now: DateTime<Utc>) -> Result<(), RecordError> {
    let eligibility = question.eligibility(now);
    if eligibility.can_vote() {
        return Ok(());
    }
    debug!("User {user_id} tried to vote on question {} while {eligibility:?}", question.id);
    Err(RecordError::VotingClosed {
        question_id: question.id,
        eligibility,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use log4rs_test_utils::test_logging::init_logging_once_for;
    use mongodb::{
        bson::{doc, Document},
        Database,
    };

    use super::*;
    use crate::model::{
        api::QuestionSpec,
        db::{Choice, NewPoll},
    };
    use crate::store::{MemoryStore, PollStore};

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn setup() -> (Arc<MemoryStore>, VoteRecorder) {
        init_logging_once_for(["polls_backend"], None, None);
        let store = Arc::new(MemoryStore::new(TIMEOUT));
        let recorder = VoteRecorder::new(Polls::shared(store.clone()), 3);
        (store, recorder)
    }

    async fn poll(store: &MemoryStore, poll: NewPoll) -> (QuestionId, Vec<Choice>) {
        let id = store.insert_question(poll).await.unwrap();
        (id, store.choices(id).await.unwrap())
    }

    #[rocket::async_test]
    async fn two_users_then_a_change_of_mind() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let (a, b) = (choices[0].id, choices[1].id);
        let (alice, bob) = (UserId::new(), UserId::new());
        let now = Utc::now();

        let receipt = recorder.record_vote(alice, a, now).await.unwrap();
        assert_eq!(receipt.change, VoteChange::Created);
        assert_eq!(receipt.question_id, id);
        assert_eq!(receipt.votes, 1);

        let receipt = recorder.record_vote(bob, a, now).await.unwrap();
        assert_eq!(receipt.votes, 2);
        assert_eq!(receipt.tally.count(b), 0);

        let receipt = recorder.record_vote(alice, b, now).await.unwrap();
        assert_eq!(receipt.change, VoteChange::Reassigned { from: a });
        assert_eq!(receipt.tally.count(a), 1);
        assert_eq!(receipt.tally.count(b), 1);
        assert_eq!(receipt.tally.total(), 2);
    }

    #[rocket::async_test]
    async fn same_vote_twice_changes_nothing() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        recorder.record_vote(user, choices[0].id, Utc::now()).await.unwrap();
        let before = store.vote(user, id).await.unwrap().unwrap();
        let receipt = recorder
            .record_vote(user, choices[0].id, Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.change, VoteChange::Unchanged);
        assert_eq!(receipt.votes, 1);
        assert_eq!(store.vote(user, id).await.unwrap().unwrap(), before);
    }

    #[rocket::async_test]
    async fn questions_are_independent() {
        let (store, recorder) = setup();
        let (first, first_choices) = poll(&store, NewPoll::open_example()).await;
        let (second, second_choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        recorder
            .record_vote(user, first_choices[0].id, Utc::now())
            .await
            .unwrap();
        let receipt = recorder
            .record_vote(user, second_choices[1].id, Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.change, VoteChange::Created);

        assert_eq!(store.tally(first).await.unwrap().count(first_choices[0].id), 1);
        assert_eq!(store.tally(second).await.unwrap().count(second_choices[1].id), 1);
    }

    #[rocket::async_test]
    async fn concurrent_voters_are_all_counted() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let choice = choices[0].id;

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let recorder = recorder.clone();
                rocket::tokio::spawn(async move {
                    recorder.record_vote(UserId::new(), choice, Utc::now()).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let tally = store.tally(id).await.unwrap();
        assert_eq!(tally.count(choice), 50);
        assert_eq!(tally.total(), 50);
    }

    #[rocket::async_test]
    async fn concurrent_revotes_leave_one_vote() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let recorder = recorder.clone();
                let choice = choices[i % 2].id;
                rocket::tokio::spawn(async move {
                    recorder.record_vote(user, choice, Utc::now()).await
                })
            })
            .collect();
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().change == VoteChange::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.tally(id).await.unwrap().total(), 1);
    }

    #[rocket::async_test]
    async fn closed_and_future_questions_reject_votes() {
        let (store, recorder) = setup();
        let user = UserId::new();

        for (example, expected) in [
            (NewPoll::closed_example(), Eligibility::Closed),
            (NewPoll::future_example(), Eligibility::NotYetPublished),
        ] {
            let (id, choices) = poll(&store, example).await;
            let err = recorder
                .record_vote(user, choices[0].id, Utc::now())
                .await
                .unwrap_err();
            match err {
                RecordError::VotingClosed {
                    question_id,
                    eligibility,
                } => {
                    assert_eq!(question_id, id);
                    assert_eq!(eligibility, expected);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(store.vote(user, id).await.unwrap().is_none());
            assert_eq!(store.tally(id).await.unwrap().total(), 0);
        }
    }

    #[rocket::async_test]
    async fn voting_window_is_inclusive() {
        let (store, recorder) = setup();
        let spec = QuestionSpec {
            end_at: Some(Utc::now() + ChronoDuration::days(1)),
            ..QuestionSpec::open_example()
        };
        let (_, choices) = poll(&store, spec.clone().try_into().unwrap()).await;
        let user = UserId::new();

        let at_start = spec.publish_at;
        let receipt = recorder.record_vote(user, choices[0].id, at_start).await.unwrap();
        assert_eq!(receipt.change, VoteChange::Created);

        let at_end = spec.end_at.unwrap();
        recorder.record_vote(user, choices[1].id, at_end).await.unwrap();

        let after = at_end + ChronoDuration::milliseconds(1);
        let err = recorder
            .record_vote(user, choices[0].id, after)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::VotingClosed { .. }));
    }

    #[rocket::async_test]
    async fn unknown_choice_is_rejected() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let missing = ChoiceId::new();
        let err = recorder
            .record_vote(UserId::new(), missing, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::ChoiceNotFound(c) if c == missing));

        // Choices of a deleted question are gone too.
        store.delete_question(id).await.unwrap();
        let err = recorder
            .record_vote(UserId::new(), choices[0].id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::ChoiceNotFound(_)));
    }

    #[rocket::async_test]
    async fn choice_of_another_question_is_rejected() {
        let (store, recorder) = setup();
        let (first, _) = poll(&store, NewPoll::open_example()).await;
        let (second, second_choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        let err = recorder
            .record_vote_on(user, first, second_choices[0].id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::ChoiceNotFound(_)));
        assert!(store.vote(user, second).await.unwrap().is_none());

        let receipt = recorder
            .record_vote_on(user, second, second_choices[0].id, Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.question_id, second);
    }

    #[rocket::async_test]
    async fn held_lock_exhausts_attempts() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        let lock = store.key_lock((user, id)).await;
        let held = lock.lock().await;
        let err = recorder
            .record_vote(user, choices[0].id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Contention { attempts: 3 }));
        assert!(store.vote(user, id).await.unwrap().is_none());

        // Once released, the same vote goes through.
        drop(held);
        let receipt = recorder
            .record_vote(user, choices[0].id, Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.change, VoteChange::Created);
    }

    #[rocket::async_test]
    async fn unknown_question_is_not_found() {
        let (store, recorder) = setup();
        let (_, choices) = poll(&store, NewPoll::open_example()).await;
        let missing = QuestionId::new();

        let err = recorder
            .record_vote_on(UserId::new(), missing, choices[0].id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::QuestionNotFound(q) if q == missing));
    }

    #[rocket::async_test]
    async fn closed_question_is_checked_before_the_choice() {
        let (store, recorder) = setup();
        let (id, _) = poll(&store, NewPoll::closed_example()).await;

        let err = recorder
            .record_vote_on(UserId::new(), id, ChoiceId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::VotingClosed { .. }));
    }

    #[rocket::async_test]
    async fn vote_waiting_out_a_delete_is_dropped() {
        let (store, recorder) = setup();
        let (id, choices) = poll(&store, NewPoll::open_example()).await;
        let user = UserId::new();

        // Park the vote on its key lock, then delete the question under it.
        let lock = store.key_lock((user, id)).await;
        let held = lock.lock().await;
        let choice = choices[0].id;
        let pending = {
            let recorder = recorder.clone();
            rocket::tokio::spawn(async move { recorder.record_vote(user, choice, Utc::now()).await })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(store.delete_question(id).await.unwrap());
        drop(held);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RecordError::ChoiceNotFound(c) if c == choice));
        assert!(store.vote(user, id).await.unwrap().is_none());
        assert_eq!(store.tally(id).await.unwrap().total(), 0);
    }

    #[backend_test]
    async fn racing_first_votes_leave_one_row(polls: Polls, db: Database) {
        init_logging_once_for(["polls_backend"], None, None);
        let recorder = VoteRecorder::new(polls.clone(), 5);
        let id = polls.insert_question(NewPoll::open_example()).await.unwrap();
        let choices = polls.choices(id).await.unwrap();
        let user = UserId::new();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let recorder = recorder.clone();
                let choice = choices[i % 2].id;
                rocket::tokio::spawn(async move {
                    recorder.record_vote(user, choice, Utc::now()).await
                })
            })
            .collect();
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().change == VoteChange::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(polls.tally(id).await.unwrap().total(), 1);
        let rows = db
            .collection::<Document>("votes")
            .count_documents(doc! { "user_id": *user }, None)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
