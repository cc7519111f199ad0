//! The shared definitions of the `twinsync` desired/actual state protocol.
//!
//! This crate provides APIs to:
//!
//! - Bound, step, and update the two reconciled counters.
//!   A desired value is validated against the counter bounds, and the
//!   sentinel `-1` means that no change is requested.
//! - Decode the desired document received from the cloud. The document can
//!   be laid out either as a single map or as a path for each counter,
//!   and both layouts sit behind the same interface.
//! - Build the documents that reset a desired path to the sentinel once it
//!   has been processed.
//! - Validate remote settings which drive the device main loop.
//!
//! All documents are encoded as JSON.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Counter bounds, snapshots, and update rules.
pub mod counter;
/// Desired document layouts and their decoders.
pub mod desired;
/// Remote settings of a device.
pub mod settings;
