//! HTTP route handlers

pub mod classify;
pub mod status;
pub mod video;
