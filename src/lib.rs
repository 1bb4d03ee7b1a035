//! # pachub
//!
//! A hub-and-spoke caching HTTP redirector for a package repository.
//!
//! Clients (package managers) request repository files from the hub. The hub
//! never serves file bytes itself: it probes a configured set of peer mirrors
//! with pipelined `HEAD` requests and replies with a `307 Temporary Redirect`
//! to the best peer that already holds the file, falling back to a canonical
//! upstream mirror. Mutable database files additionally go through a
//! freshness check driven by `Last-Modified` / `If-Modified-Since`, so a
//! stale peer copy is never preferred over upstream.
//!
//! The hub is single-threaded: it runs on a current-thread tokio
//! runtime inside a [`tokio::task::LocalSet`], and all cross-task state is
//! `Rc`/`Cell` based. See [`Server`] for the entry point.

#[macro_use]
extern crate tracing;

pub mod config;
mod error;
mod hub;
mod peer;
mod proto;
mod resolve;
mod server;
mod stats;
mod status;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::server::Server;
