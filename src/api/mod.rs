use chrono::{DateTime, Utc};
use rocket::{
    http::Status,
    response::status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

use crate::error::{Error, Result};
use crate::model::{common::QuestionId, db::Question};
use crate::store::Polls;

mod questions;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(questions::routes());
    routes.extend(voting::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![unauthorized, default_catcher]
}

/// Requests without a valid auth token.
#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({ "error": "You must be signed in to vote." }))
}

/// Keep error bodies JSON for anything that never reached a route, such as
/// unmatched paths and unparseable forms.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> status::Custom<Json<Value>> {
    let reason = status.reason().unwrap_or("Unknown error");
    status::Custom(status, Json(json!({ "error": reason })))
}

/// Fetch a question, treating one that is not yet published as missing.
async fn published_question(polls: &Polls, id: QuestionId, now: DateTime<Utc>) -> Result<Question> {
    polls
        .question(id)
        .await?
        .filter(|question| question.is_published(now))
        .ok_or_else(|| Error::not_found(format!("No question with ID '{id}'")))
}
