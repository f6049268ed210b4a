//! Domain model module declarations.

pub mod activity;
pub mod message;
pub mod state;
