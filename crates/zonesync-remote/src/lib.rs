//! Source-zone access for ZoneSync.
//!
//! This crate provides the two outward-facing seams of the replication
//! engine:
//!
//! - [`SourceZoneClient`]: the HTTP admin/REST client consuming the source
//!   zone's data log, bucket-index logs, bucket-instance metadata, and
//!   versioned bucket listings.
//! - [`ObjectTransfer`]: the primitive that copies or removes a single
//!   object replica locally.
//!
//! Both are trait objects so the engine can be driven against mocks in
//! tests and against real gateways in the daemon.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod transfer;
pub mod types;

pub use client::{HttpSourceClient, RemoteError, SourceEndpoint, SourceZoneClient};
pub use transfer::{NoOpTransfer, ObjectTransfer, TransferError};
