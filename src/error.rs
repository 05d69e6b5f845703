//! Error types shared across the crate.

use thiserror::Error;

use crate::value::ElementType;

/// Errors produced by providers, supports, the registry, and the address
/// parser.
///
/// Factory and registry failures are returned synchronously from the call
/// that caused them. I/O failures on the polled-device path travel through
/// the error callback of the operation instead, together with the
/// `immediate` flag telling whether the callback ran in the calling thread.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// The named process variable does not exist in the backing application
    /// or device.
    #[error("no process variable named '{0}'")]
    NoSuchVariable(String),

    /// No provider has been registered under the given id.
    #[error("the name '{0}' does not reference a registered application or device")]
    NoSuchProvider(String),

    /// The requested element type is not compatible with the variable.
    #[error("the element type '{requested}' is not supported for the process variable '{name}'")]
    TypeMismatch {
        name: String,
        requested: ElementType,
    },

    /// The operation is not supported by this process variable (for example
    /// `notify` on a variable without change notifications, or `write` on a
    /// read-only variable).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A provider id is already taken.
    #[error("the name '{0}' is already in use")]
    NameInUse(String),

    /// `register_*` was called after the registry was finalised, or
    /// `finalize` was called twice.
    #[error("the provider registry has already been finalised")]
    AlreadyFinalised,

    /// The record-link address string is malformed. `at` is the zero-based
    /// byte index of the offending character.
    #[error("error at character {at} of the record address: {message}")]
    AddressParse { at: usize, message: String },

    /// No initial value could be produced for the variable.
    #[error("no initial value available: {0}")]
    InitialValueUnavailable(String),

    /// A device register read or write failed.
    #[error("device i/o error: {0}")]
    IoError(String),
}
