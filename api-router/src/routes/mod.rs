pub mod chats;
pub mod documents;
pub mod liveness;
pub mod readiness;
pub mod search;
