//! Async shell around [`SessionController`](crate::session::SessionController):
//! one task owns the controller and everything reaches it through channels.

mod client;
mod loop_worker;

pub use client::InspectionClient;
