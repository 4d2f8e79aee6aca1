//! # Newsreel Core
//!
//! Core library for the Newsreel media automation pipeline.
//!
//! ## Overview
//!
//! Newsreel watches a Usenet binary indexer for new movie releases,
//! identifies each release against TMDB, keeps a "best version" pointer
//! per title, derives per-account download targets, verifies article
//! availability over NNTP, and drives a local NZBGet instance to fetch
//! what each account asked for.
//!
//! ## Architecture
//!
//! - PostgreSQL is the single source of truth: releases, cached content
//!   metadata, account targets, durable cursors, and the retry queue all
//!   live there. Workers are stateless between invocations.
//! - External boundaries (indexer, TMDB, NZBGet, NNTP) each get a typed
//!   client that decodes responses into model types or returns a
//!   structured error.
//! - The workers in [`workers`] implement the pipeline stages; the
//!   `newsreel-daemon` binary wires them to a runtime.

pub mod config;
pub mod error;
pub mod indexer;
pub mod nntp;
pub mod nzbget;
pub mod providers;
pub mod store;
pub mod workers;

pub use error::{CoreError, Result};
