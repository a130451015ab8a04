//! stowage media store library
//!
//! Ingests media from uploads, URLs/DOIs/handles and archive entries,
//! classifies it, checks it against a retention policy and keeps it in a
//! temporary blob store until it expires.

pub mod cli;
pub mod config;
pub mod links;
pub mod logging;
pub mod media;
pub mod policy;
pub mod profiler;
pub mod registry;
