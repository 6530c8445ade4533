//! HTTP layer over the boundary operations

pub mod handlers;
pub mod serve;
pub mod state;
