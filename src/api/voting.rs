use chrono::Utc;
use rocket::{form::Form, http::Status, serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::logging::RequestId;
use crate::model::{
    api::{AuthToken, CurrentVote, VoteResponse},
    common::{ChoiceId, QuestionId},
};
use crate::recorder::VoteRecorder;
use crate::store::Polls;
use crate::Config;

pub fn routes() -> Vec<Route> {
    routes![current_vote, vote]
}

/// The caller's vote on a question, if they have cast one.
#[get("/questions/<question_id>/vote")]
async fn current_vote(
    token: AuthToken,
    question_id: QuestionId,
    polls: Polls,
) -> Result<Json<CurrentVote>> {
    let vote = polls
        .vote(token.id, question_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("No vote on question '{question_id}'")))?;
    Ok(Json(vote.into()))
}

/// A vote submission. Unparseable choices arrive as `None`.
#[derive(FromForm)]
struct VoteForm {
    choice: Option<ChoiceId>,
}

#[post("/questions/<question_id>/vote", data = "<form>")]
async fn vote(
    token: AuthToken,
    question_id: QuestionId,
    form: Form<VoteForm>,
    polls: Polls,
    config: &State<Config>,
    request_id: &RequestId,
) -> Result<Json<VoteResponse>> {
    let choice_id = form.choice.ok_or_else(|| {
        Error::Status(
            Status::BadRequest,
            "You must select a valid choice.".to_string(),
        )
    })?;

    let recorder = VoteRecorder::new(polls, config.vote_attempts());
    let receipt = recorder
        .record_vote_on(token.id, question_id, choice_id, Utc::now())
        .await?;
    info!(
        "req{request_id} user {} voted for choice {} on question {question_id} ({:?})",
        token.id, receipt.choice_id, receipt.change
    );
    Ok(Json(receipt.into()))
}
