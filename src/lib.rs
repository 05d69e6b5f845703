//! Process-variable mediation between producers and control-system records.
//!
//! This crate sits between two populations: *producers*, a streaming
//! application or a polled register device exposing typed, versioned values
//! under process-variable names, and *consumers*, record instances that
//! read, write, and subscribe to those variables.
//!
//! The heart of the crate is the mediation engine: a [`PvProvider`] resolves
//! a variable name and element type to a [`PvSupport`] handle, and per
//! variable one shared coordinator fans a single producer stream out to any
//! number of subscribed consumers with exact-once delivery and ack-based
//! back-pressure. Two providers are built in:
//!
//! - [`providers::ApplicationPvProvider`] mediates the streams of a
//!   [`stream::PvManager`]: one notification dispatcher thread waits on all
//!   streams at once and drives subscriber callbacks in version order.
//! - [`providers::DevicePvProvider`] wraps a blocking register
//!   [`device::Device`], running I/O on a thread pool or, with zero pool
//!   threads, synchronously in the calling thread.
//!
//! Around the engine live the pieces a consumer integration needs: the
//! [`registry`] mapping application/device ids to providers with its
//! one-shot initialisation barrier, the [`address`] parser for record link
//! strings, the opt-in [`convert`] wrapper casting between element types,
//! and the [`output`] channel reconciling local writes with values echoed
//! back by the producer.

pub mod address;
pub mod convert;
pub mod device;
pub mod error;
pub mod executor;
pub mod output;
pub mod providers;
pub mod registry;
pub mod stream;
pub mod support;
pub mod timer;
pub mod value;
pub mod version;

pub use address::RecordAddress;
pub use error::Error;
pub use registry::ProviderRegistry;
pub use support::{AnyPvSupport, PvProvider, PvProviderExt, PvSupport};
pub use value::{Element, ElementType, SharedValue};
pub use version::Version;
