//! Viewer drivers
//!
//! A driver owns one [`crate::session::Session`] and a
//! [`crate::follow::Follower`] on a single task and wires them to a surface.
//! The [`terminal`] driver redraws a character chart and reads key commands.
//! The [`web`] driver serves a browser dashboard.

pub mod terminal;
pub mod web;
