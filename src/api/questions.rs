use chrono::Utc;
use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{QuestionDescription, QuestionResults, QuestionSummary},
    common::QuestionId,
};
use crate::store::Polls;
use crate::Config;

use super::published_question;

pub fn routes() -> Vec<Route> {
    routes![index, question_detail, question_results]
}

/// The most recently published questions, newest first.
#[get("/questions")]
async fn index(polls: Polls, config: &State<Config>) -> Result<Json<Vec<QuestionSummary>>> {
    let now = Utc::now();
    let questions = polls.published_questions(now, config.index_size()).await?;
    let summaries = questions
        .iter()
        .map(|question| QuestionSummary::new(question, now))
        .collect();
    Ok(Json(summaries))
}

#[get("/questions/<question_id>")]
async fn question_detail(question_id: QuestionId, polls: Polls) -> Result<Json<QuestionDescription>> {
    let now = Utc::now();
    let question = published_question(&polls, question_id, now).await?;
    let choices = polls.choices(question.id).await?;
    Ok(Json(QuestionDescription::new(&question, choices, now)))
}

#[get("/questions/<question_id>/results")]
async fn question_results(question_id: QuestionId, polls: Polls) -> Result<Json<QuestionResults>> {
    let now = Utc::now();
    let question = published_question(&polls, question_id, now).await?;
    let choices = polls.choices(question.id).await?;
    let tally = polls.tally(question.id).await?;
    Ok(Json(QuestionResults::new(&question, choices, &tally, now)))
}
