//! Typed process-variable streams and the producer-side bundle.
//!
//! A stream is a single-producer, single-consumer channel carrying
//! `(value, version)` tuples in production order. The producer side holds a
//! [`ProducerHandle`]; the consumer side is a [`ProcessArray`], whose
//! interface (non-blocking reads into an internal staging buffer, buffer
//! swaps instead of references, `write` for the reverse direction) is what
//! the streaming provider consumes. A [`PvManager`] bundles the consumer
//! ends of one application's variables under canonical names.
//!
//! [`ReadAnyGroup`] is the selective multi-stream wait: every attached
//! stream pushes its index onto one shared FIFO when a value arrives, and a
//! condition variable wakes the single waiter. The provider's internal
//! wake-up stream is just one more index in the group.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Error;
use crate::value::{Element, ElementType, canonical_pv_name, for_each_element};
use crate::version::Version;

/// Access-mode flags of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessModeFlags {
    wait_for_new_data: bool,
}

impl AccessModeFlags {
    /// Flags for a stream that queues every produced value and supports
    /// asynchronous delivery through a [`ReadAnyGroup`].
    pub fn wait_for_new_data() -> AccessModeFlags {
        AccessModeFlags {
            wait_for_new_data: true,
        }
    }

    /// Flags for a polled stream: only the most recent value is retained and
    /// reads never block.
    pub fn polled() -> AccessModeFlags {
        AccessModeFlags {
            wait_for_new_data: false,
        }
    }

    /// Whether the stream supports asynchronous delivery.
    pub fn has_wait_for_new_data(&self) -> bool {
        self.wait_for_new_data
    }
}

/// Direction of a process variable, seen from the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvDirection {
    /// The producer pushes values; consumers read and subscribe.
    ProducerToConsumer,
    /// Consumers write values; the producer receives them.
    ConsumerToProducer,
    /// Both of the above. Written values may be echoed back by the producer.
    Bidirectional,
}

impl PvDirection {
    fn readable(&self) -> bool {
        matches!(
            self,
            PvDirection::ProducerToConsumer | PvDirection::Bidirectional
        )
    }

    fn writeable(&self) -> bool {
        matches!(
            self,
            PvDirection::ConsumerToProducer | PvDirection::Bidirectional
        )
    }
}

/// Index FIFO shared by all streams of a [`ReadAnyGroup`].
pub(crate) struct ReadyQueue {
    indices: Mutex<VecDeque<usize>>,
    available: Condvar,
}

impl ReadyQueue {
    fn new() -> Arc<ReadyQueue> {
        Arc::new(ReadyQueue {
            indices: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        })
    }

    fn push(&self, index: usize) {
        self.indices.lock().unwrap().push_back(index);
        self.available.notify_one();
    }

    fn pop_blocking(&self) -> usize {
        let mut indices = self.indices.lock().unwrap();
        loop {
            if let Some(index) = indices.pop_front() {
                return index;
            }
            indices = self.available.wait(indices).unwrap();
        }
    }
}

struct ArrayCore<T> {
    name: String,
    number_of_samples: usize,
    direction: PvDirection,
    flags: AccessModeFlags,
    /// Values produced but not yet transferred into the staging buffer.
    inbound: VecDeque<(Vec<T>, Version)>,
    /// Values written by the consumer side, awaiting the producer.
    outbound: VecDeque<(Vec<T>, Version)>,
    /// Staging buffer holding the most recently transferred value.
    buffer: Vec<T>,
    version: Version,
    ready: Option<(Arc<ReadyQueue>, usize)>,
}

/// Consumer end of a stream. Cheaply cloneable; all clones refer to the same
/// underlying channel.
pub struct ProcessArray<T: Element> {
    core: Arc<Mutex<ArrayCore<T>>>,
}

impl<T: Element> Clone for ProcessArray<T> {
    fn clone(&self) -> Self {
        ProcessArray {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Element> ProcessArray<T> {
    /// Canonical name of the variable.
    pub fn name(&self) -> String {
        self.core.lock().unwrap().name.clone()
    }

    /// Fixed element count of every value on this stream.
    pub fn number_of_samples(&self) -> usize {
        self.core.lock().unwrap().number_of_samples
    }

    pub fn is_readable(&self) -> bool {
        self.core.lock().unwrap().direction.readable()
    }

    pub fn is_writeable(&self) -> bool {
        self.core.lock().unwrap().direction.writeable()
    }

    pub fn access_mode_flags(&self) -> AccessModeFlags {
        self.core.lock().unwrap().flags
    }

    /// Transfers the next queued value into the staging buffer. Returns
    /// false when no value is queued.
    pub fn read_nonblocking(&self) -> bool {
        let mut core = self.core.lock().unwrap();
        match core.inbound.pop_front() {
            Some((mut value, version)) => {
                std::mem::swap(&mut core.buffer, &mut value);
                core.version = version;
                true
            }
            None => false,
        }
    }

    /// Discards all queued values but the newest and transfers that one into
    /// the staging buffer. For a polled stream the staging buffer always
    /// holds the latest value, so this returns true even when nothing was
    /// queued.
    pub fn read_latest(&self) -> bool {
        let mut core = self.core.lock().unwrap();
        let mut transferred = false;
        while let Some((mut value, version)) = core.inbound.pop_front() {
            std::mem::swap(&mut core.buffer, &mut value);
            core.version = version;
            transferred = true;
        }
        transferred || !core.flags.wait_for_new_data
    }

    /// Sends the staging buffer's content to the producer side, stamped with
    /// the given version.
    pub fn write(&self, version: Version) -> Result<(), Error> {
        let mut core = self.core.lock().unwrap();
        if !core.direction.writeable() {
            return Err(Error::UnsupportedOperation(
                "this process variable is not writeable",
            ));
        }
        let value = core.buffer.clone();
        core.outbound.push_back((value, version));
        core.version = version;
        Ok(())
    }

    /// Version of the value currently in the staging buffer.
    pub fn version_number(&self) -> Version {
        self.core.lock().unwrap().version
    }

    /// Exchanges the staging buffer with the given vector. This is the
    /// move-based access to the channel data; the exchanged vector must keep
    /// the fixed element count when it is swapped back in before a write.
    pub fn swap_channel(&self, value: &mut Vec<T>) {
        std::mem::swap(&mut self.core.lock().unwrap().buffer, value);
    }

    /// Copy of the staging buffer.
    pub fn peek_channel(&self) -> Vec<T> {
        self.core.lock().unwrap().buffer.clone()
    }

    pub(crate) fn attach_ready(&self, ready: Arc<ReadyQueue>, index: usize) {
        let mut core = self.core.lock().unwrap();
        // Values queued before the group existed must still wake the waiter.
        for _ in 0..core.inbound.len() {
            ready.push(index);
        }
        core.ready = Some((ready, index));
    }
}

/// Producer end of a stream.
pub struct ProducerHandle<T: Element> {
    core: Arc<Mutex<ArrayCore<T>>>,
}

impl<T: Element> ProducerHandle<T> {
    /// Canonical name of the variable.
    pub fn name(&self) -> String {
        self.core.lock().unwrap().name.clone()
    }

    /// Queues a value for delivery to the consumer side and wakes any group
    /// waiting on this stream. On a polled stream the new value replaces
    /// whatever was still queued.
    pub fn send(&self, value: Vec<T>, version: Version) -> Result<(), Error> {
        let mut core = self.core.lock().unwrap();
        if !core.direction.readable() {
            return Err(Error::UnsupportedOperation(
                "the consumer side of this process variable is not readable",
            ));
        }
        if value.len() != core.number_of_samples {
            return Err(Error::UnsupportedOperation(
                "value length does not match the stream's element count",
            ));
        }
        if !core.flags.wait_for_new_data {
            core.inbound.clear();
        }
        core.inbound.push_back((value, version));
        if let Some((ready, index)) = &core.ready {
            ready.push(*index);
        }
        Ok(())
    }

    /// Takes the oldest value written by the consumer side, if any.
    pub fn take_written(&self) -> Option<(Vec<T>, Version)> {
        self.core.lock().unwrap().outbound.pop_front()
    }
}

/// Creates a connected producer/consumer pair for one process variable.
pub fn synchronized_pair<T: Element>(
    name: &str,
    number_of_samples: usize,
    direction: PvDirection,
    flags: AccessModeFlags,
    initial: Vec<T>,
) -> Result<(ProducerHandle<T>, ProcessArray<T>), Error> {
    if initial.len() != number_of_samples {
        return Err(Error::UnsupportedOperation(
            "initial value length does not match the stream's element count",
        ));
    }
    let core = Arc::new(Mutex::new(ArrayCore {
        name: canonical_pv_name(name),
        number_of_samples,
        direction,
        flags,
        inbound: VecDeque::new(),
        outbound: VecDeque::new(),
        buffer: initial,
        version: Version::new(),
        ready: None,
    }));
    Ok((
        ProducerHandle {
            core: Arc::clone(&core),
        },
        ProcessArray { core },
    ))
}

macro_rules! declare_any_array {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        /// Type-erased consumer end, one arm per element type.
        #[derive(Clone)]
        pub enum AnyProcessArray {
            $($variant(ProcessArray<$ty>),)+
        }

        impl AnyProcessArray {
            pub fn element_type(&self) -> ElementType {
                match self {
                    $(AnyProcessArray::$variant(_) => ElementType::$variant,)+
                }
            }

            pub fn name(&self) -> String {
                match self {
                    $(AnyProcessArray::$variant(array) => array.name(),)+
                }
            }

            pub fn is_readable(&self) -> bool {
                match self {
                    $(AnyProcessArray::$variant(array) => array.is_readable(),)+
                }
            }

            pub fn is_writeable(&self) -> bool {
                match self {
                    $(AnyProcessArray::$variant(array) => array.is_writeable(),)+
                }
            }

            pub fn access_mode_flags(&self) -> AccessModeFlags {
                match self {
                    $(AnyProcessArray::$variant(array) => array.access_mode_flags(),)+
                }
            }

            /// Transfers the next queued value into the staging buffer,
            /// discarding whatever the buffer held.
            pub fn read_nonblocking(&self) -> bool {
                match self {
                    $(AnyProcessArray::$variant(array) => array.read_nonblocking(),)+
                }
            }

            pub(crate) fn attach_ready(&self, ready: Arc<ReadyQueue>, index: usize) {
                match self {
                    $(AnyProcessArray::$variant(array) => array.attach_ready(ready, index),)+
                }
            }
        }
    };
}
for_each_element!(declare_any_array);

/// Bundle of the consumer ends of one producer application's variables.
#[derive(Default)]
pub struct PvManager {
    arrays: Vec<AnyProcessArray>,
}

impl PvManager {
    pub fn new() -> PvManager {
        PvManager { arrays: Vec::new() }
    }

    /// Creates a stream under the given name and returns its producer end;
    /// the consumer end is kept in the manager. Names are canonicalised, and
    /// two names that canonicalise equal collide.
    pub fn create_array<T: Element>(
        &mut self,
        name: &str,
        direction: PvDirection,
        flags: AccessModeFlags,
        initial: Vec<T>,
    ) -> Result<ProducerHandle<T>, Error> {
        let canonical = canonical_pv_name(name);
        if self.lookup(&canonical).is_some() {
            return Err(Error::NameInUse(canonical));
        }
        let (producer, consumer) =
            synchronized_pair(&canonical, initial.len(), direction, flags, initial)?;
        self.arrays.push(T::array_into_any(consumer));
        Ok(producer)
    }

    fn lookup(&self, canonical: &str) -> Option<&AnyProcessArray> {
        self.arrays.iter().find(|array| array.name() == canonical)
    }

    /// The typed consumer end for a variable.
    pub fn get_process_array<T: Element>(&self, name: &str) -> Result<ProcessArray<T>, Error> {
        let canonical = canonical_pv_name(name);
        let array = self
            .lookup(&canonical)
            .ok_or_else(|| Error::NoSuchVariable(canonical.clone()))?;
        T::array_from_any(array.clone()).map_err(|_| Error::TypeMismatch {
            name: canonical,
            requested: T::TYPE,
        })
    }

    /// The native element type of a variable.
    pub fn element_type(&self, name: &str) -> Result<ElementType, Error> {
        let canonical = canonical_pv_name(name);
        self.lookup(&canonical)
            .map(AnyProcessArray::element_type)
            .ok_or(Error::NoSuchVariable(canonical))
    }

    /// All consumer ends, in creation order.
    pub fn arrays(&self) -> &[AnyProcessArray] {
        &self.arrays
    }
}

/// Blocks until any of a set of streams has a queued value.
pub struct ReadAnyGroup {
    arrays: Vec<AnyProcessArray>,
    ready: Arc<ReadyQueue>,
}

/// A wake-up from a [`ReadAnyGroup`]: one stream has (or had) a queued
/// value. Accepting transfers that value into the stream's staging buffer.
pub struct Notification {
    index: usize,
    array: AnyProcessArray,
}

impl Notification {
    /// Index of the originating stream within the group.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Transfers the pending value into the stream's staging buffer,
    /// discarding the buffer's previous content. Returns false when another
    /// path already transferred it.
    pub fn accept(self) -> bool {
        self.array.read_nonblocking()
    }
}

impl ReadAnyGroup {
    /// Builds a group over the given streams. Stream indices within the
    /// group follow the argument order.
    pub fn new(arrays: Vec<AnyProcessArray>) -> ReadAnyGroup {
        let ready = ReadyQueue::new();
        for (index, array) in arrays.iter().enumerate() {
            array.attach_ready(Arc::clone(&ready), index);
        }
        ReadAnyGroup { arrays, ready }
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Blocks until any stream in the group has a value queued.
    pub fn wait_any(&self) -> Notification {
        let index = self.ready.pop_blocking();
        Notification {
            index,
            array: self.arrays[index].clone(),
        }
    }
}
