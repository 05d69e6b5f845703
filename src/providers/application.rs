//! Provider backed by a streaming producer application.
//!
//! One [`ApplicationPvProvider`] mediates between the streams of a
//! [`PvManager`] and any number of consumer handles. Per variable there is
//! at most one shared support, which owns the stream, caches the latest
//! `(value, version)` and coordinates fan-out so that every subscriber sees
//! every update exactly once. Handles onto the same variable share that
//! support; the provider map holds it weakly so it disappears with its last
//! handle.
//!
//! A single notification dispatcher thread waits on all asynchronous
//! streams at once. A stream value is only pulled when every subscriber has
//! acknowledged the previous delivery of that variable, which gives the
//! producer side ack-based back-pressure. Subscriber callbacks always run on
//! the dispatcher thread with no lock held; the internal task FIFO is how
//! any other code (currently the initial notification of a freshly
//! registered callback) gets onto that thread without racing the streams.
//!
//! Lock order, outermost first: provider dispatch state, shared-support
//! state, subscriber slot, stream internals.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::stream::{
    AccessModeFlags, AnyProcessArray, ProcessArray, ProducerHandle, PvDirection, PvManager,
    ReadAnyGroup, synchronized_pair,
};
use crate::support::{
    AnyPvSupport, FailFn, NotifyErrorFn, NotifyFn, PvProvider, PvSupport, ReadFn, WriteFn,
    panic_message,
};
use crate::value::{Element, ElementType, SharedValue, canonical_pv_name, for_each_element};
use crate::version::Version;

type Task = Box<dyn FnOnce() + Send>;
type FanOut = Box<dyn FnOnce() + Send>;

/// Outcome of asking a shared support to process the next stream value.
enum PollNotify {
    /// A previous delivery has unacknowledged subscribers; ask again after
    /// the next wake-up.
    NotReady,
    /// Nothing to deliver: no queued value, or no subscriber holds a
    /// callback.
    Idle,
    /// A value was pulled; run the returned closure without holding any
    /// lock to invoke the collected callbacks.
    Deliver(FanOut),
}

/// Element-type-independent face of a shared support, used by the provider
/// maps and the dispatcher.
trait SharedAny: Send + Sync {
    fn poll_notify(&self) -> PollNotify;
    fn initial_write_if_needed(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct DispatchState {
    shutdown: bool,
    tasks: VecDeque<Task>,
    by_name: HashMap<String, Weak<dyn SharedAny>>,
    /// Parallel to `ProviderInner::arrays_by_index`; the wake-up slot at the
    /// last index is never occupied.
    by_index: Vec<Option<Weak<dyn SharedAny>>>,
}

struct ProviderInner {
    state: Mutex<DispatchState>,
    wake: Condvar,
    manager: PvManager,
    wake_producer: ProducerHandle<i32>,
    arrays_by_index: Vec<AnyProcessArray>,
    /// Names of the notifying streams, excluding the wake-up stream.
    names_by_index: Vec<String>,
}

impl ProviderInner {
    /// Wakes the dispatcher out of either suspension point. The condition
    /// variable covers the ack wait; the wake-up stream covers the wait on
    /// the streams themselves. The state lock is taken before notifying so
    /// the dispatcher cannot park between its predicate check and the
    /// signal.
    fn wake_dispatcher(&self) {
        drop(self.state.lock().unwrap());
        self.wake.notify_all();
        let _ = self.wake_producer.send(vec![0], Version::new());
    }
}

// ---------------------------------------------------------------------------
// Shared support
// ---------------------------------------------------------------------------

/// Per-subscriber state reachable both from the handle and, weakly, from
/// the shared support's fan-out.
struct Slot<T: Element> {
    callback: Option<NotifyFn<T>>,
    /// True between a delivery to this subscriber and its acknowledgement.
    pending: bool,
}

struct SharedState<T: Element> {
    last_value: SharedValue<T>,
    last_version: Version,
    subscribers: Vec<Weak<Mutex<Slot<T>>>>,
    pending_ack_count: u32,
    notify_callback_count: u32,
    will_write_called: bool,
}

/// Per-variable coordinator shared by all handles onto one variable.
struct SharedPvSupport<T: Element> {
    provider: Arc<ProviderInner>,
    name: String,
    array: ProcessArray<T>,
    state: Mutex<SharedState<T>>,
}

impl<T: Element> SharedPvSupport<T> {
    fn new(provider: Arc<ProviderInner>, name: String, array: ProcessArray<T>) -> SharedPvSupport<T> {
        // The initial value is copied rather than swapped out: the
        // initialisation barrier may still have to write it to the producer
        // side.
        let last_value = Arc::new(array.peek_channel());
        let last_version = array.version_number();
        SharedPvSupport {
            provider,
            name,
            array,
            state: Mutex::new(SharedState {
                last_value,
                last_version,
                subscribers: Vec::new(),
                pending_ack_count: 0,
                notify_callback_count: 0,
                will_write_called: false,
            }),
        }
    }

    fn can_notify(&self) -> bool {
        self.array.is_readable() && self.array.access_mode_flags().has_wait_for_new_data()
    }

    fn create_handle(self: Arc<Self>) -> Arc<ApplicationPvSupport<T>> {
        let slot = Arc::new(Mutex::new(Slot {
            callback: None,
            pending: false,
        }));
        self.state
            .lock()
            .unwrap()
            .subscribers
            .push(Arc::downgrade(&slot));
        Arc::new(ApplicationPvSupport { shared: self, slot })
    }

    fn initial_value(&self) -> (Vec<T>, Version) {
        let state = self.state.lock().unwrap();
        ((*state.last_value).clone(), state.last_version)
    }

    fn read(&self, on_value: ReadFn<T>) -> Result<bool, Error> {
        let (value, version) = {
            let mut state = self.state.lock().unwrap();
            // A notifying stream is read by the dispatcher only; the cached
            // value is whatever the last notification (or write) left
            // behind. A polled stream is refreshed here.
            if !self.array.access_mode_flags().has_wait_for_new_data() && self.array.read_latest() {
                state.last_value = Arc::new(self.array.peek_channel());
                state.last_version = self.array.version_number();
            }
            (Arc::clone(&state.last_value), state.last_version)
        };
        on_value(true, value, version);
        Ok(true)
    }

    fn write(&self, mut value: Vec<T>, version: Version, on_done: WriteFn) -> Result<bool, Error> {
        if value.len() != self.array.number_of_samples() {
            return Err(Error::UnsupportedOperation(
                "value length does not match the variable's element count",
            ));
        }
        {
            let mut state = self.state.lock().unwrap();
            self.array.swap_channel(&mut value);
            self.array.write(version)?;
            // Swap the written value back out so the cache takes it without
            // a copy; the channel keeps the previous buffer.
            self.array.swap_channel(&mut value);
            state.last_value = Arc::new(value);
            state.last_version = version;
        }
        on_done(true);
        Ok(true)
    }

    fn will_write(&self) {
        self.state.lock().unwrap().will_write_called = true;
    }

    /// Acknowledges the delivery tracked by `slot`, waking the dispatcher
    /// when this was the last outstanding acknowledgement.
    fn ack_from_slot(&self, slot: &Mutex<Slot<T>>) {
        let need_wake = {
            let mut state = self.state.lock().unwrap();
            let mut slot = slot.lock().unwrap();
            if !slot.pending {
                return;
            }
            slot.pending = false;
            state.pending_ack_count -= 1;
            state.pending_ack_count == 0
        };
        if need_wake {
            self.provider.wake_dispatcher();
        }
    }
}

impl<T: Element> SharedAny for SharedPvSupport<T> {
    fn poll_notify(&self) -> PollNotify {
        let mut state = self.state.lock().unwrap();
        if state.pending_ack_count > 0 {
            return PollNotify::NotReady;
        }
        if !self.array.read_nonblocking() {
            return PollNotify::Idle;
        }
        // Swap the fresh value out of the staging buffer instead of copying
        // it; the buffer gets a same-sized replacement.
        let mut fresh = vec![T::default(); self.array.number_of_samples()];
        self.array.swap_channel(&mut fresh);
        state.last_value = Arc::new(fresh);
        state.last_version = self.array.version_number();
        if state.notify_callback_count == 0 {
            return PollNotify::Idle;
        }
        let mut callbacks: Vec<NotifyFn<T>> = Vec::new();
        state.subscribers.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                let mut slot = slot.lock().unwrap();
                if let Some(callback) = &slot.callback {
                    callbacks.push(Arc::clone(callback));
                    slot.pending = true;
                }
                true
            }
            None => false,
        });
        if callbacks.is_empty() {
            return PollNotify::Idle;
        }
        state.pending_ack_count = callbacks.len() as u32;
        let value = Arc::clone(&state.last_value);
        let version = state.last_version;
        PollNotify::Deliver(Box::new(move || {
            for callback in callbacks {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| {
                    callback(Arc::clone(&value), version)
                })) {
                    error!(
                        "a notification callback panicked: {}; continuing with the remaining subscribers",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }))
    }

    fn initial_write_if_needed(&self) {
        let mut state = self.state.lock().unwrap();
        if state.will_write_called || !self.array.is_writeable() {
            return;
        }
        state.will_write_called = true;
        let mut value = (*state.last_value).clone();
        self.array.swap_channel(&mut value);
        if let Err(e) = self.array.write(state.last_version) {
            warn!(pv = %self.name, "initial write failed: {e}");
        }
        self.array.swap_channel(&mut value);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Consumer handle
// ---------------------------------------------------------------------------

/// Handle implementation backed by a [`SharedPvSupport`].
struct ApplicationPvSupport<T: Element> {
    shared: Arc<SharedPvSupport<T>>,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Element> PvSupport<T> for ApplicationPvSupport<T> {
    fn can_notify(&self) -> bool {
        self.shared.can_notify()
    }

    fn can_read(&self) -> bool {
        self.shared.array.is_readable()
    }

    fn can_write(&self) -> bool {
        self.shared.array.is_writeable()
    }

    fn number_of_elements(&self) -> usize {
        self.shared.array.number_of_samples()
    }

    fn initial_value(&self) -> Result<(Vec<T>, Version), Error> {
        Ok(self.shared.initial_value())
    }

    // The error callback is accepted but never fired: the stream delivery
    // path has no failure source.
    fn notify(
        &self,
        on_value: Option<NotifyFn<T>>,
        _on_error: Option<NotifyErrorFn>,
    ) -> Result<(), Error> {
        if !self.can_notify() {
            return Err(Error::UnsupportedOperation(
                "this process variable does not deliver change notifications",
            ));
        }
        let inner = &self.shared.provider;
        let mut provider_state = inner.state.lock().unwrap();
        if on_value.is_some() && provider_state.shutdown {
            return Err(Error::UnsupportedOperation(
                "the provider's notification dispatcher has shut down",
            ));
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            let mut slot = self.slot.lock().unwrap();
            match (&slot.callback, &on_value) {
                (None, Some(_)) => state.notify_callback_count += 1,
                (Some(_), None) => state.notify_callback_count -= 1,
                _ => {}
            }
            slot.callback = on_value.clone();
            // Cancelling while a delivery is unacknowledged must not hold up
            // the other subscribers; the stale ack is cleared here.
            if on_value.is_none() && slot.pending {
                slot.pending = false;
                state.pending_ack_count -= 1;
            }
            // A fresh registration is told the current value right away, on
            // the dispatcher thread, before any subsequent fan-out reaches
            // it. It counts as an in-flight delivery until acknowledged.
            if let Some(callback) = on_value
                && !slot.pending
            {
                slot.pending = true;
                state.pending_ack_count += 1;
                let value = Arc::clone(&state.last_value);
                let version = state.last_version;
                provider_state.tasks.push_back(Box::new(move || {
                    if let Err(panic) =
                        catch_unwind(AssertUnwindSafe(|| callback(value, version)))
                    {
                        error!(
                            "a notification callback panicked during the initial notification: {}",
                            panic_message(panic.as_ref())
                        );
                    }
                }));
            }
        }
        drop(provider_state);
        inner.wake_dispatcher();
        Ok(())
    }

    fn notify_finished(&self) {
        self.shared.ack_from_slot(&self.slot);
    }

    fn will_write(&self) {
        self.shared.will_write();
    }

    fn read(&self, on_value: ReadFn<T>, _on_error: FailFn) -> Result<bool, Error> {
        if !self.can_read() {
            return Err(Error::UnsupportedOperation(
                "this process variable is not readable",
            ));
        }
        self.shared.read(on_value)
    }

    fn write(
        &self,
        value: Vec<T>,
        version: Version,
        on_done: WriteFn,
        _on_error: FailFn,
    ) -> Result<bool, Error> {
        if !self.can_write() {
            return Err(Error::UnsupportedOperation(
                "this process variable is not writeable",
            ));
        }
        self.shared.write(value, version, on_done)
    }
}

impl<T: Element> Drop for ApplicationPvSupport<T> {
    fn drop(&mut self) {
        let need_wake = {
            let mut state = self.shared.state.lock().unwrap();
            let mut slot = self.slot.lock().unwrap();
            let mut need_wake = false;
            if slot.pending {
                slot.pending = false;
                state.pending_ack_count -= 1;
                need_wake = state.pending_ack_count == 0;
            }
            if slot.callback.take().is_some() {
                state.notify_callback_count -= 1;
            }
            let slot_ptr = Arc::as_ptr(&self.slot);
            state.subscribers.retain(|weak| weak.as_ptr() != slot_ptr);
            need_wake
        };
        if need_wake {
            self.shared.provider.wake_dispatcher();
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Provider mediating between a producer application's streams and consumer
/// handles.
///
/// Dropping the provider shuts the dispatcher down and joins it. Handles
/// created earlier stay alive but can no longer register callbacks.
pub struct ApplicationPvProvider {
    inner: Arc<ProviderInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ApplicationPvProvider {
    /// Takes ownership of the manager, enumerates its notifying streams and
    /// starts the notification dispatcher.
    pub fn new(manager: PvManager) -> ApplicationPvProvider {
        let (wake_producer, wake_consumer) = synchronized_pair::<i32>(
            "/__dispatcher_wake_up__",
            1,
            PvDirection::ProducerToConsumer,
            AccessModeFlags::wait_for_new_data(),
            vec![0],
        )
        .expect("wake-up stream construction never fails");
        let mut arrays_by_index: Vec<AnyProcessArray> = manager
            .arrays()
            .iter()
            .filter(|array| {
                array.is_readable() && array.access_mode_flags().has_wait_for_new_data()
            })
            .cloned()
            .collect();
        let names_by_index: Vec<String> =
            arrays_by_index.iter().map(AnyProcessArray::name).collect();
        arrays_by_index.push(<i32 as Element>::array_into_any(wake_consumer));
        let by_index = vec![None; arrays_by_index.len()];
        let inner = Arc::new(ProviderInner {
            state: Mutex::new(DispatchState {
                shutdown: false,
                tasks: VecDeque::new(),
                by_name: HashMap::new(),
                by_index,
            }),
            wake: Condvar::new(),
            manager,
            wake_producer,
            arrays_by_index,
            names_by_index,
        });
        let group = ReadAnyGroup::new(inner.arrays_by_index.clone());
        let dispatcher_inner = Arc::clone(&inner);
        let dispatcher = std::thread::Builder::new()
            .name("pv-dispatch".into())
            .spawn(move || run_dispatcher(&dispatcher_inner, group))
            .expect("failed to spawn the notification dispatcher");
        ApplicationPvProvider {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    fn create_typed<T: Element>(&self, pv_name: &str) -> Result<Arc<dyn PvSupport<T>>, Error> {
        let name = canonical_pv_name(pv_name);
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        let existing = state.by_name.get(&name).and_then(Weak::upgrade);
        let shared: Arc<SharedPvSupport<T>> = match existing {
            Some(shared) => shared
                .as_any()
                .downcast::<SharedPvSupport<T>>()
                .map_err(|_| Error::TypeMismatch {
                    name: name.clone(),
                    requested: T::TYPE,
                })?,
            None => {
                state.by_name.remove(&name);
                let array = inner.manager.get_process_array::<T>(&name)?;
                let index = inner.names_by_index.iter().position(|n| n == &name);
                let shared = Arc::new(SharedPvSupport::new(
                    Arc::clone(inner),
                    name.clone(),
                    array,
                ));
                let erased: Arc<dyn SharedAny> = shared.clone();
                state.by_name.insert(name.clone(), Arc::downgrade(&erased));
                if let Some(index) = index {
                    state.by_index[index] = Some(Arc::downgrade(&erased));
                }
                debug!(pv = %name, "created shared PV support");
                shared
            }
        };
        Ok(shared.create_handle())
    }
}

macro_rules! application_create_any {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        fn create_any(
            provider: &ApplicationPvProvider,
            pv_name: &str,
            element_type: ElementType,
        ) -> Result<AnyPvSupport, Error> {
            match element_type {
                $(ElementType::$variant => Ok(<$ty as Element>::support_into_any(
                    provider.create_typed::<$ty>(pv_name)?,
                )),)+
            }
        }
    };
}
for_each_element!(application_create_any);

impl PvProvider for ApplicationPvProvider {
    fn default_type(&self, pv_name: &str) -> Result<Option<ElementType>, Error> {
        self.inner.manager.element_type(pv_name).map(Some)
    }

    fn create_any_pv_support(
        &self,
        pv_name: &str,
        element_type: ElementType,
    ) -> Result<AnyPvSupport, Error> {
        create_any(self, pv_name, element_type)
    }

    /// Writes the initial value of every live shared support to the
    /// producer side, unless a handle has declared its own initial write.
    fn finalize_initialization(&self) {
        let shared_supports: Vec<Arc<dyn SharedAny>> = {
            let state = self.inner.state.lock().unwrap();
            state.by_name.values().filter_map(Weak::upgrade).collect()
        };
        for shared in shared_supports {
            shared.initial_write_if_needed();
        }
    }
}

impl Drop for ApplicationPvProvider {
    fn drop(&mut self) {
        self.inner.state.lock().unwrap().shutdown = true;
        self.inner.wake.notify_all();
        let _ = self.inner.wake_producer.send(vec![0], Version::new());
        if let Some(dispatcher) = self.dispatcher.lock().unwrap().take() {
            let _ = dispatcher.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn drain_tasks<'a>(
    inner: &'a ProviderInner,
    mut state: MutexGuard<'a, DispatchState>,
) -> Option<MutexGuard<'a, DispatchState>> {
    loop {
        let Some(task) = state.tasks.pop_front() else {
            break;
        };
        drop(state);
        task();
        state = inner.state.lock().unwrap();
    }
    if state.shutdown { None } else { Some(state) }
}

fn run_dispatcher(inner: &Arc<ProviderInner>, group: ReadAnyGroup) {
    let wake_index = group.len() - 1;
    loop {
        // Block on the streams without any lock held; the wake-up stream is
        // how other code interrupts this wait.
        let notification = group.wait_any();
        let state = inner.state.lock().unwrap();
        let Some(mut state) = drain_tasks(inner, state) else {
            return;
        };
        let index = notification.index();
        if index == wake_index {
            notification.accept();
            continue;
        }
        let shared = state.by_index[index].as_ref().and_then(Weak::upgrade);
        let Some(shared) = shared else {
            drop(state);
            trace!(index, "dropping update for a PV without a live support");
            notification.accept();
            continue;
        };
        let fan_out = loop {
            match shared.poll_notify() {
                PollNotify::NotReady => {
                    // Sleep until a subscriber acknowledges; tasks queued in
                    // the meantime still have to run here.
                    state = inner.wake.wait(state).unwrap();
                    match drain_tasks(inner, state) {
                        Some(guard) => state = guard,
                        None => return,
                    }
                }
                PollNotify::Idle => break None,
                PollNotify::Deliver(fan_out) => break Some(fan_out),
            }
        };
        drop(state);
        if let Some(fan_out) = fan_out {
            fan_out();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::PvProviderExt;
    use std::sync::mpsc;
    use std::time::Duration;

    fn provider_with_pv() -> (ProducerHandle<i32>, ApplicationPvProvider) {
        let mut manager = PvManager::new();
        let producer = manager
            .create_array::<i32>(
                "plant/temperature",
                PvDirection::Bidirectional,
                AccessModeFlags::wait_for_new_data(),
                vec![20],
            )
            .unwrap();
        (producer, ApplicationPvProvider::new(manager))
    }

    #[test]
    fn default_type_and_factory_errors() {
        let (_producer, provider) = provider_with_pv();
        assert_eq!(
            provider.default_type("plant/temperature").unwrap(),
            Some(ElementType::Int32)
        );
        assert!(matches!(
            provider.default_type("plant/nothing"),
            Err(Error::NoSuchVariable(_))
        ));
        assert!(matches!(
            provider.create_pv_support::<String>("plant/temperature"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn handles_share_one_support_and_names_canonicalise() {
        let (_producer, provider) = provider_with_pv();
        let a = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        let b = provider
            .create_pv_support::<i32>("//plant//temperature/")
            .unwrap();
        assert_eq!(a.number_of_elements(), 1);
        assert_eq!(b.number_of_elements(), 1);
        let (value, version) = a.initial_value().unwrap();
        assert_eq!(value, vec![20]);
        assert_eq!(b.initial_value().unwrap().1, version);
    }

    #[test]
    fn a_second_handle_with_the_wrong_type_is_rejected() {
        let (_producer, provider) = provider_with_pv();
        let _keep = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        assert!(matches!(
            provider.create_pv_support::<f64>("plant/temperature"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn write_updates_the_cache_and_reaches_the_producer() {
        let (producer, provider) = provider_with_pv();
        let support = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        let version = Version::new();
        let (tx, rx) = mpsc::channel();
        let immediate = support
            .write(
                vec![23],
                version,
                Box::new(move |immediate| tx.send(immediate).unwrap()),
                Box::new(|_, e| panic!("unexpected write error: {e}")),
            )
            .unwrap();
        assert!(immediate);
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        let (written, written_version) = producer.take_written().unwrap();
        assert_eq!(written, vec![23]);
        assert_eq!(written_version, version);
        assert_eq!(support.initial_value().unwrap(), (vec![23], version));
    }

    #[test]
    fn read_returns_the_cached_value_immediately() {
        let (_producer, provider) = provider_with_pv();
        let support = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let immediate = support
            .read(
                Box::new(move |immediate, value, _| tx.send((immediate, (*value).clone())).unwrap()),
                Box::new(|_, e| panic!("unexpected read error: {e}")),
            )
            .unwrap();
        assert!(immediate);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            (true, vec![20])
        );
    }

    #[test]
    fn polled_variables_refuse_notify_registration() {
        let mut manager = PvManager::new();
        manager
            .create_array::<i32>(
                "polled",
                PvDirection::ProducerToConsumer,
                AccessModeFlags::polled(),
                vec![1],
            )
            .unwrap();
        let provider = ApplicationPvProvider::new(manager);
        let support = provider.create_pv_support::<i32>("polled").unwrap();
        assert!(!support.can_notify());
        assert!(matches!(
            support.notify(Some(Arc::new(|_, _| {})), None),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn finalize_writes_each_writable_pv_once() {
        let (producer, provider) = provider_with_pv();
        let support = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        provider.finalize_initialization();
        let (written, _) = producer.take_written().unwrap();
        assert_eq!(written, vec![20]);
        assert!(producer.take_written().is_none());
        // The barrier fires at most once per shared support.
        provider.finalize_initialization();
        assert!(producer.take_written().is_none());
        drop(support);
    }

    #[test]
    fn will_write_suppresses_the_automatic_initial_write() {
        let (producer, provider) = provider_with_pv();
        let support = provider
            .create_pv_support::<i32>("plant/temperature")
            .unwrap();
        support.will_write();
        provider.finalize_initialization();
        assert!(producer.take_written().is_none());
    }
}
