//! Bedtime shield: decides when device restriction applies and hands the
//! decision to an OS-level restrictor.
//!
//! The same engine runs in two independently scheduled contexts (a
//! long-running foreground process and a periodically triggered monitor)
//! that share nothing but a durable key-value store.

pub mod bedtime;
pub mod config;
pub mod platform;
pub mod store;
