//! Application services layer.

pub mod dispatch;
pub mod documents;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod render;
pub mod repos;
pub mod retry;
