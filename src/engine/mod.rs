//! Application services: betting, the keeper loop, and chat glue.

pub mod betting;
pub mod chat;
pub mod keeper;
