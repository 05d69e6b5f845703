//! The per-consumer support contract and the provider factory trait.
//!
//! A [`PvSupport`] is one consumer's handle onto one process variable. It
//! carries the typed read/write/notify contract with asynchronous
//! completion: operations report back through callbacks, and the boolean
//! they return (and receive) tells whether completion happened in the
//! calling thread before the operation returned (*immediate*) or later from
//! another thread (*deferred*).
//!
//! A [`PvProvider`] resolves a variable name plus requested element type to
//! a support handle. At this boundary the element type is erased into
//! [`AnyPvSupport`]; matching the tag back out recovers the typed handle.

use std::sync::Arc;

use crate::error::Error;
use crate::value::{Element, ElementType, SharedValue, canonical_pv_name, for_each_element};
use crate::version::Version;

/// Callback invoked for every delivered value update. Kept by the support
/// until replaced or unregistered, so it is shared and reinvocable.
pub type NotifyFn<T> = Arc<dyn Fn(SharedValue<T>, Version) + Send + Sync>;

/// Callback invoked when a notification subscription observes an error.
pub type NotifyErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;

/// Completion callback of [`PvSupport::read`]. The first argument is the
/// immediate flag.
pub type ReadFn<T> = Box<dyn FnOnce(bool, SharedValue<T>, Version) + Send>;

/// Completion callback of [`PvSupport::write`].
pub type WriteFn = Box<dyn FnOnce(bool) + Send>;

/// Failure callback of [`PvSupport::read`] and [`PvSupport::write`].
pub type FailFn = Box<dyn FnOnce(bool, Error) + Send>;

/// One consumer's handle onto one process variable.
///
/// A handle is internally synchronised, but the operation contract is not:
/// at most one read or write may be outstanding per handle at any time.
/// After `read` or `write` returns false, neither may be called again until
/// the completion callback has run.
pub trait PvSupport<T: Element>: Send + Sync {
    /// Whether this variable delivers change notifications. When this is
    /// false, [`notify`](Self::notify) fails.
    fn can_notify(&self) -> bool {
        false
    }

    /// Whether this variable can be read.
    fn can_read(&self) -> bool;

    /// Whether this variable can be written.
    fn can_write(&self) -> bool;

    /// Element count of every value of this variable, fixed for the
    /// variable's lifetime.
    fn number_of_elements(&self) -> usize;

    /// Synchronous snapshot used to initialise output records. Unlike
    /// [`read`](Self::read) this may be called on non-readable variables and
    /// does not count against the one-in-flight rule.
    fn initial_value(&self) -> Result<(Vec<T>, Version), Error>;

    /// Registers (or, with `None`, unregisters) the notification callback.
    /// At most one callback is held per handle; registering replaces it.
    ///
    /// After every delivery the subscriber must call
    /// [`notify_finished`](Self::notify_finished), or no further value will
    /// be delivered to any subscriber of the variable. Upon registration the
    /// current value is delivered once before any subsequent update.
    fn notify(
        &self,
        on_value: Option<NotifyFn<T>>,
        on_error: Option<NotifyErrorFn>,
    ) -> Result<(), Error> {
        let _ = (on_value, on_error);
        Err(Error::UnsupportedOperation(
            "this process variable does not support change notifications",
        ))
    }

    /// Acknowledges the in-flight delivery. Idempotent: calling it again, or
    /// after [`cancel_notify`](Self::cancel_notify), has no effect.
    fn notify_finished(&self) {}

    /// Unregisters the callback and clears a stale in-flight acknowledgement
    /// so that delivery can proceed to other subscribers. One more delivery
    /// may still arrive if it was already being dispatched.
    fn cancel_notify(&self) {
        let _ = self.notify(None, None);
    }

    /// Declares that this handle is going to perform the initial write
    /// during startup, suppressing the automatic one.
    fn will_write(&self) {}

    /// Begins a read. Returns true iff the callback ran before the return
    /// (in which case no operation is outstanding afterwards).
    fn read(&self, on_value: ReadFn<T>, on_error: FailFn) -> Result<bool, Error>;

    /// Begins a write of `value` stamped with `version`. Return value as for
    /// [`read`](Self::read).
    fn write(
        &self,
        value: Vec<T>,
        version: Version,
        on_done: WriteFn,
        on_error: FailFn,
    ) -> Result<bool, Error>;
}

macro_rules! declare_any_support {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        /// Type-erased support handle, one arm per element type. Produced by
        /// [`PvProvider::create_any_pv_support`]; the typed handle is
        /// recovered by matching the arm for the requested type.
        pub enum AnyPvSupport {
            $($variant(Arc<dyn PvSupport<$ty>>),)+
        }

        impl AnyPvSupport {
            pub fn element_type(&self) -> ElementType {
                match self {
                    $(AnyPvSupport::$variant(_) => ElementType::$variant,)+
                }
            }

            pub fn number_of_elements(&self) -> usize {
                match self {
                    $(AnyPvSupport::$variant(support) => support.number_of_elements(),)+
                }
            }
        }
    };
}
for_each_element!(declare_any_support);

/// Factory resolving process-variable names to support handles.
pub trait PvProvider: Send + Sync {
    /// The provider's native element type for the variable, or `None` when
    /// the provider cannot infer one. Fails when the name is unknown.
    fn default_type(&self, pv_name: &str) -> Result<Option<ElementType>, Error>;

    /// Creates a support handle for the variable using the given element
    /// type. Fails with [`Error::NoSuchVariable`] when the name is unknown
    /// and [`Error::TypeMismatch`] when the type is incompatible.
    fn create_any_pv_support(
        &self,
        pv_name: &str,
        element_type: ElementType,
    ) -> Result<AnyPvSupport, Error>;

    /// Drives the provider's part of the registry's initialisation barrier.
    fn finalize_initialization(&self) {}
}

/// Typed convenience over [`PvProvider::create_any_pv_support`].
pub trait PvProviderExt {
    fn create_pv_support<T: Element>(&self, pv_name: &str) -> Result<Arc<dyn PvSupport<T>>, Error>;
}

impl<P: PvProvider + ?Sized> PvProviderExt for P {
    fn create_pv_support<T: Element>(&self, pv_name: &str) -> Result<Arc<dyn PvSupport<T>>, Error> {
        let any = self.create_any_pv_support(pv_name, T::TYPE)?;
        T::support_from_any(any).map_err(|_| Error::TypeMismatch {
            name: canonical_pv_name(pv_name),
            requested: T::TYPE,
        })
    }
}

/// Extracts a printable message from a caught callback panic.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
