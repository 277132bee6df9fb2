//! quietkey: presence-gated access control for ephemeral content.
//!
//! Content is only readable while its expiry has not passed, no security
//! seal is engaged, the reader's presence satisfies the resource, and every
//! shard of its content key can be reassembled. The [`policy`] module ties
//! the components together; the rest are usable on their own.
//!
//! See `DESIGN.md` for how the pieces fit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod logging;
pub mod types;

pub mod lockdown;
pub mod presence;
pub mod ritual;
pub mod signals;
pub mod temporal;
pub mod vault;

pub mod policy;
pub mod repository;
pub mod sweeper;
