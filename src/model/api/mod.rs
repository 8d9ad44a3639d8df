//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.

pub mod auth;
pub mod question;
pub mod results;

pub use auth::{AuthToken, AUTH_TOKEN_COOKIE};
pub use question::{ChoiceDescription, QuestionDescription, QuestionSpec, QuestionSummary, SpecError};
pub use results::{ChangeKind, ChoiceResult, CurrentVote, QuestionResults, VoteResponse};
