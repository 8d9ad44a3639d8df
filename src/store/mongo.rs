use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, from_bson, from_document, DateTime as BsonDateTime},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;
use serde::Deserialize;

use crate::model::{
    common::{ChoiceId, QuestionId, Tally, UserId},
    db::{Choice, NewChoice, NewPoll, NewQuestion, Question, Vote, VoteChange},
    mongodb::{is_duplicate_key_error, Coll},
};

use super::{PollStore, Result, StoreError};

/// The production [`PollStore`], backed by MongoDB.
///
/// Requires the indexes from [`crate::model::mongodb::ensure_indexes_exist`];
/// the unique (user, question) index on votes is what makes concurrent first
/// votes safe.
///
/// Deleting a question removes it and its choices in one transaction, and
/// only then sweeps its votes. A vote upsert re-reads its choice after
/// writing and withdraws the vote if the choice is gone. A vote racing a
/// delete is therefore removed by one side or the other.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    questions: Coll<Question>,
    new_questions: Coll<NewQuestion>,
    choices: Coll<Choice>,
    new_choices: Coll<NewChoice>,
    votes: Coll<Vote>,
}

impl MongoStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self {
            client,
            questions: Coll::from_db(&db),
            new_questions: Coll::from_db(&db),
            choices: Coll::from_db(&db),
            new_choices: Coll::from_db(&db),
            votes: Coll::from_db(&db),
        }
    }

    async fn insert_in_session(&self, poll: NewPoll, session: &mut ClientSession) -> Result<QuestionId> {
        let inserted = self
            .new_questions
            .insert_one_with_session(&poll.question, None, session)
            .await?;
        let question_id: QuestionId = from_bson(inserted.inserted_id)?;

        let choices: Vec<_> = poll
            .choices
            .into_iter()
            .map(|text| NewChoice { question_id, text })
            .collect();
        if !choices.is_empty() {
            self.new_choices
                .insert_many_with_session(choices, None, session)
                .await?;
        }
        Ok(question_id)
    }

    async fn delete_in_session(&self, id: QuestionId, session: &mut ClientSession) -> Result<bool> {
        let deleted = self
            .questions
            .delete_one_with_session(id.as_doc(), None, session)
            .await?;
        if deleted.deleted_count == 0 {
            return Ok(false);
        }
        self.choices
            .delete_many_with_session(doc! { "question_id": *id }, None, session)
            .await?;
        Ok(true)
    }
}

/// One row of the tally aggregation.
#[derive(Deserialize)]
struct ChoiceCount {
    #[serde(rename = "_id")]
    choice_id: ChoiceId,
    count: i64,
}

#[rocket::async_trait]
impl PollStore for MongoStore {
    async fn insert_question(&self, poll: NewPoll) -> Result<QuestionId> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        let id = self.insert_in_session(poll, &mut session).await?;
        session.commit_transaction().await?;
        debug!("Inserted question {id}");
        Ok(id)
    }

    async fn delete_question(&self, id: QuestionId) -> Result<bool> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        let deleted = self.delete_in_session(id, &mut session).await?;
        session.commit_transaction().await?;

        // Outside the transaction, so votes written up to the commit are
        // visible. Swept even if the question was already gone, which lets a
        // repeated delete finish an interrupted one.
        let swept = self
            .votes
            .delete_many(doc! { "question_id": *id }, None)
            .await?;
        if deleted {
            debug!(
                "Deleted question {id} with its choices and {} votes",
                swept.deleted_count
            );
        }
        Ok(deleted)
    }

    async fn question(&self, id: QuestionId) -> Result<Option<Question>> {
        Ok(self.questions.find_one(id.as_doc(), None).await?)
    }

    async fn published_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>> {
        let filter = doc! { "publish_at": { "$lte": BsonDateTime::from_chrono(now) } };
        let options = FindOptions::builder()
            .sort(doc! { "publish_at": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();
        let questions = self
            .questions
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(questions)
    }

    async fn choices(&self, question_id: QuestionId) -> Result<Vec<Choice>> {
        // ObjectIds grow with insertion, so `_id` order is insertion order.
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let choices = self
            .choices
            .find(doc! { "question_id": *question_id }, options)
            .await?
            .try_collect()
            .await?;
        Ok(choices)
    }

    async fn choice(&self, id: ChoiceId) -> Result<Option<Choice>> {
        Ok(self.choices.find_one(id.as_doc(), None).await?)
    }

    async fn vote(&self, user_id: UserId, question_id: QuestionId) -> Result<Option<Vote>> {
        let filter = doc! { "user_id": *user_id, "question_id": *question_id };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn upsert_vote(&self, user_id: UserId, choice: &Choice) -> Result<Option<VoteChange>> {
        let filter = doc! { "user_id": *user_id, "question_id": *choice.question_id };
        let update = doc! { "$set": { "choice_id": *choice.id } };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        let before = match self.votes.find_one_and_update(filter.clone(), update, options).await {
            Ok(before) => before,
            // Two first votes raced and this one lost the unique index.
            Err(err) if is_duplicate_key_error(&err) => {
                debug!("Duplicate key upserting vote of user {user_id}");
                return Err(StoreError::Contention);
            }
            Err(err) => return Err(err.into()),
        };

        if self.choice(choice.id).await?.is_none() {
            debug!("Choice {} vanished under user {user_id}'s vote, withdrawing it", choice.id);
            self.votes.delete_one(filter, None).await?;
            return Ok(None);
        }

        let change = match before {
            None => VoteChange::Created,
            Some(vote) if vote.choice_id == choice.id => VoteChange::Unchanged,
            Some(vote) => VoteChange::Reassigned {
                from: vote.choice_id,
            },
        };
        Ok(Some(change))
    }

    async fn tally(&self, question_id: QuestionId) -> Result<Tally> {
        let pipeline = [
            doc! { "$match": { "question_id": *question_id } },
            doc! { "$group": { "_id": "$choice_id", "count": { "$sum": 1_i64 } } },
        ];
        let rows: Vec<_> = self.votes.aggregate(pipeline, None).await?.try_collect().await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let row: ChoiceCount = from_document(row)?;
            counts.push((row.choice_id, u64::try_from(row.count).unwrap_or(0)));
        }
        Ok(counts.into_iter().collect())
    }
}
