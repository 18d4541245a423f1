pub mod common;
pub mod history;
pub mod member;
pub mod profile;
pub mod queue;
pub mod reconcile;
