//! Reconciliation of bidirectional output variables.
//!
//! An output consumer owns a local value it writes towards the producer,
//! but on a bidirectional variable the producer may echo values back or
//! originate its own. [`OutputChannel`] keeps the local cache and the
//! version baseline, and decides for every inbound update whether it
//! supersedes what was written locally:
//!
//! - no baseline recorded yet: accept;
//! - inbound version strictly newer than the baseline: accept;
//! - inbound version equal to the baseline but the payload differs (the
//!   producer transformed the value we wrote): accept;
//! - otherwise: drop, it is our own write coming back or an older value.
//!
//! Every local write mints a fresh version before the stream write is
//! issued, so the baseline always reflects the newest locally originated
//! value. Under this policy the cache converges on the producer's value
//! without echo storms.
//!
//! The channel never processes work by itself. Whenever something needs the
//! consumer's attention (an accepted update, a deferred completion, a write
//! failure) it invokes the *process request* callback given at
//! construction, and the consumer then calls [`OutputChannel::process`]
//! from its own context. An update that arrives while a write is in flight
//! is parked; the request fires only after the write's outcome has been
//! surfaced, so completions and notifications never interleave.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Error;
use crate::support::{FailFn, NotifyErrorFn, NotifyFn, PvSupport, WriteFn};
use crate::value::Element;
use crate::version::Version;

/// Invoked whenever [`OutputChannel::process`] should be called.
pub type ProcessRequestFn = Arc<dyn Fn() + Send + Sync>;

/// Construction options for an [`OutputChannel`].
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    /// Accept updates arriving from the producer side. Disabled by the
    /// `nobidirectional` address option.
    pub bidirectional: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            bidirectional: true,
        }
    }
}

struct OutputState<T> {
    value: Vec<T>,
    version: Option<Version>,
    /// An accepted update is waiting for [`OutputChannel::process`].
    notify_pending: bool,
    /// A write has been issued and has not surfaced its outcome yet.
    write_pending: bool,
    write_error: Option<Error>,
}

/// The per-consumer state machine for one bidirectional output variable.
pub struct OutputChannel<T: Element> {
    support: Arc<dyn PvSupport<T>>,
    state: Arc<Mutex<OutputState<T>>>,
    request_process: ProcessRequestFn,
    notifying: bool,
}

impl<T: Element> OutputChannel<T> {
    /// Wraps a support handle. The local cache is seeded from the
    /// variable's initial value; when none is available the baseline stays
    /// empty and the first inbound update is accepted unconditionally.
    pub fn new(
        support: Arc<dyn PvSupport<T>>,
        options: OutputOptions,
        request_process: ProcessRequestFn,
    ) -> Result<OutputChannel<T>, Error> {
        let (value, version) = match support.initial_value() {
            Ok((value, version)) => (value, Some(version)),
            Err(e) => {
                debug!("no initial value for output variable: {e}");
                (
                    vec![T::default(); support.number_of_elements()],
                    None,
                )
            }
        };
        let state = Arc::new(Mutex::new(OutputState {
            value,
            version,
            notify_pending: false,
            write_pending: false,
            write_error: None,
        }));
        let notifying = options.bidirectional && support.can_notify();
        if notifying {
            let callback_state = Arc::clone(&state);
            let request = Arc::clone(&request_process);
            let ack = Arc::clone(&support);
            let on_value: NotifyFn<T> = Arc::new(move |value, version| {
                {
                    let mut state = callback_state.lock().unwrap();
                    let accept = match state.version {
                        None => true,
                        Some(current) => {
                            version > current
                                || (version == current && *value != state.value)
                        }
                    };
                    if accept {
                        let was_pending = state.notify_pending;
                        state.value = (*value).clone();
                        state.version = Some(version);
                        state.notify_pending = true;
                        // While a write or an unprocessed update is pending,
                        // the next process pass is already scheduled.
                        if !was_pending && !state.write_pending {
                            drop(state);
                            request();
                        }
                    }
                }
                // Output consumers need no strict every-value guarantee, so
                // the delivery is acknowledged right away and never holds up
                // other subscribers.
                ack.notify_finished();
            });
            // An error notification carries no version, so there is no way
            // to tell whether it precedes the last write; it is ignored.
            let on_error: NotifyErrorFn = Arc::new(|error| {
                debug!("ignoring error notification on an output variable: {error}");
            });
            support.notify(Some(on_value), Some(on_error))?;
        }
        Ok(OutputChannel {
            support,
            state,
            request_process,
            notifying,
        })
    }

    /// The cached local value and its version baseline.
    pub fn value(&self) -> (Vec<T>, Option<Version>) {
        let state = self.state.lock().unwrap();
        (state.value.clone(), state.version)
    }

    /// Writes a value towards the producer, minting a new version that
    /// becomes the comparison baseline. Returns the immediate flag of the
    /// underlying write; when false, a process request signals completion.
    pub fn write(&self, value: Vec<T>) -> Result<bool, Error> {
        let version = Version::new();
        {
            let mut state = self.state.lock().unwrap();
            state.value = value.clone();
            state.version = Some(version);
            state.write_pending = true;
            state.write_error = None;
        }
        let done_state = Arc::clone(&self.state);
        let done_request = Arc::clone(&self.request_process);
        let on_done: WriteFn = Box::new(move |immediate| {
            let mut state = done_state.lock().unwrap();
            state.write_pending = false;
            let reenter = state.notify_pending || !immediate;
            drop(state);
            if reenter {
                done_request();
            }
        });
        let error_state = Arc::clone(&self.state);
        let error_request = Arc::clone(&self.request_process);
        let on_error: FailFn = Box::new(move |_immediate, error| {
            let mut state = error_state.lock().unwrap();
            state.write_pending = false;
            state.write_error = Some(error);
            drop(state);
            error_request();
        });
        self.support.write(value, version, on_done, on_error)
    }

    /// Handles whatever triggered the last process request: surfaces a
    /// write failure as an error, or applies a parked update and returns
    /// its `(value, version)`. Returns `Ok(None)` when there is nothing to
    /// do (for example the request merely signalled a successful deferred
    /// write, or a write is still in flight).
    pub fn process(&self) -> Result<Option<(Vec<T>, Version)>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.write_pending {
            return Ok(None);
        }
        if let Some(error) = state.write_error.take() {
            // A parked update is handled on the next pass, after the
            // failure has been surfaced.
            let parked = state.notify_pending;
            drop(state);
            if parked {
                (self.request_process)();
            }
            return Err(error);
        }
        if state.notify_pending {
            state.notify_pending = false;
            let version = state
                .version
                .expect("an accepted update always records its version");
            return Ok(Some((state.value.clone(), version)));
        }
        Ok(None)
    }
}

impl<T: Element> Drop for OutputChannel<T> {
    fn drop(&mut self) {
        if self.notifying {
            self.support.cancel_notify();
        }
    }
}
