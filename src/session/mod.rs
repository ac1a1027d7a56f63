//! Session pairing and lifecycle

mod store;

pub use store::{AnswerResult, JoinResult, Session, SessionId, SessionStore};
