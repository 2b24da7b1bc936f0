//! tracewired library — the daemon's front-ends and decode pipeline,
//! exposed for the binary and the integration harness.

pub mod control;
pub mod data;
pub mod pipeline;
