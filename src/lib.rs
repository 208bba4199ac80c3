//! `mboximport` — bulk-import mbox exports into Gmail mailboxes.
//!
//! This crate provides the core library for discovering per-account mbox
//! files under a directory tree, streaming their messages in a
//! deterministic global order, and submitting each one to the Gmail API
//! with resume and retry semantics suited to multi-gigabyte, multi-user
//! migrations.

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod gmail;
pub mod importer;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod retry;
