use jsonwebtoken::errors::Error as JwtError;
use rocket::{
    http::Status,
    response::{status, Responder},
    serde::json::{json, Json},
    Request,
};
use thiserror::Error;

use crate::logging::RequestId;
use crate::recorder::RecordError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned from API routes.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vote(#[from] RecordError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Status(Status::NotFound, what.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Store(StoreError::Contention) => Status::ServiceUnavailable,
            Self::Store(_) => Status::InternalServerError,
            Self::Vote(err) => match err {
                RecordError::QuestionNotFound(_) => Status::NotFound,
                RecordError::ChoiceNotFound(_) => Status::BadRequest,
                RecordError::VotingClosed { .. } => Status::Forbidden,
                RecordError::Contention { .. } | RecordError::Store(StoreError::Contention) => {
                    Status::ServiceUnavailable
                }
                RecordError::Store(_) => Status::InternalServerError,
            },
            Self::Jwt(_) => Status::Unauthorized,
            Self::Status(status, _) => *status,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let id = req.local_cache(RequestId::next);
        let status = self.status();
        let message = if status.code >= 500 {
            error!("req{id} {self}");
            // Server-side details stay in the log.
            if status == Status::ServiceUnavailable {
                "The server is busy, please try again.".to_string()
            } else {
                "Internal server error.".to_string()
            }
        } else {
            warn!("req{id} {self}");
            self.to_string()
        };
        status::Custom(status, Json(json!({ "error": message }))).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{common::Eligibility, mongodb::Id};

    #[test]
    fn vote_errors_map_to_statuses() {
        let cases = [
            (RecordError::ChoiceNotFound(Id::new()), Status::BadRequest),
            (
                RecordError::VotingClosed {
                    question_id: Id::new(),
                    eligibility: Eligibility::Closed,
                },
                Status::Forbidden,
            ),
            (RecordError::Contention { attempts: 3 }, Status::ServiceUnavailable),
            (RecordError::QuestionNotFound(Id::new()), Status::NotFound),
        ];
        for (err, status) in cases {
            assert_eq!(Error::from(err).status(), status);
        }
    }

    #[test]
    fn user_facing_messages() {
        let err = Error::from(RecordError::ChoiceNotFound(Id::new()));
        assert_eq!(err.to_string(), "You must select a valid choice.");
        let err = Error::from(RecordError::VotingClosed {
            question_id: Id::new(),
            eligibility: Eligibility::NotYetPublished,
        });
        assert_eq!(err.to_string(), "Voting for this question is not allowed.");
        assert_eq!(Error::not_found("Question").status(), Status::NotFound);
    }
}
