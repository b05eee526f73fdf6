#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
//! # tweakhook
//!
//! Loaded into a running game, locates code by signature, resolves engine globals and console
//! variables, and patches or hooks the located instructions according to `tweakhook.toml`.
//!
//! The building blocks are usable on their own:
//! [`scan`] finds landmarks, [`resolve`] turns them into addresses, [`directory`] looks up named
//! engine objects, and [`hook`] redirects execution into Rust callbacks with full register access.

pub mod alloc;
pub mod code;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod hook;
#[cfg(windows)]
mod host;
pub mod logging;
pub mod patcher;
pub mod resolve;
pub mod scan;
pub mod tweaks;
