//! Types shared between the API and DB representations.

pub mod eligibility;
mod tally;

pub use eligibility::{evaluate, Eligibility};
pub use tally::Tally;

/// Our question IDs are [`mongodb::bson::oid::ObjectId`]s.
pub type QuestionId = crate::model::mongodb::Id;
/// Our choice IDs are [`mongodb::bson::oid::ObjectId`]s.
pub type ChoiceId = crate::model::mongodb::Id;
/// User identities come from the verified auth token, and are also
/// [`mongodb::bson::oid::ObjectId`]s.
pub type UserId = crate::model::mongodb::Id;
