//! Control-plane HTTP API: admin context, guard-then-produce routes and job
//! status lookup.

pub mod app;
pub mod context;
pub mod middleware;
pub mod seed;
