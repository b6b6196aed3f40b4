//! HTTP route handlers

pub mod chat;
pub mod debug;
pub mod embeddings;
