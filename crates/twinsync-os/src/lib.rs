//! The `twinsync-os` library crate runs the `twinsync` desired/actual state
//! reconciliation on devices with an operating system.
//!
//! A device keeps two counters synchronized with a cloud state service:
//!
//! - The cloud writes a desired document, which the device observes
//! - The device validates the desired values and applies them to its
//!   counters
//! - The device publishes its actual state whenever a counter changes
//! - The device resets the desired document to the sentinel once it has
//!   processed it
//!
//! The cloud service is reached through the [`transport::Transport`] trait,
//! and an `MQTT` implementation is provided out of the box.
//!
//! To optimize system resource usage, `twinsync-os` leverages `tokio` as an
//! asynchronous executor. The main loop, the desired observations, and the
//! broker connection each run on their own task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Node configuration.
pub mod config;
/// The reconciliation engine.
pub mod engine;
/// Error management.
pub mod error;
/// An `MQTT` transport.
pub mod mqtt;
/// The device main loop and its remote settings.
pub mod node;
/// Publishers of the actual state and of the desired resets.
pub mod publisher;
/// The owner of the live counters.
pub mod store;
/// The interface towards the cloud state service.
pub mod transport;
