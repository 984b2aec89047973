//! Domain operations built on the transaction runner, each answering with an [`Envelope`](crate::response::Envelope).

pub mod model;
mod projects;
mod tasks;
mod users;
mod validation;

pub use projects::*;
pub use tasks::*;
pub use users::*;
pub use validation::{RequestValidator, RuleSet, ValidationRule};
