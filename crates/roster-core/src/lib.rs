//! Core roster library (identity, session, Graph client, attendance).

pub mod attendance;
pub mod config;
pub mod graph;
pub mod identity;
pub mod page;
pub mod session;
