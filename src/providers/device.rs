//! Provider backed by a blocking register device.
//!
//! Reads and writes are submitted to a fixed-size I/O pool so that record
//! processing never blocks on device I/O; with a pool size of zero the
//! provider runs synchronously and completes every operation in the calling
//! thread. Each register accessor is confined to one task at a time: the
//! submitting thread stages data by swap and does not touch the accessor
//! again until the completion callback has run.
//!
//! Polled devices do not deliver change notifications, so `can_notify` is
//! false on every handle.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::device::{Device, RegisterAccessor, RegisterClass};
use crate::error::Error;
use crate::executor::ThreadPoolExecutor;
use crate::support::{
    AnyPvSupport, FailFn, PvProvider, PvSupport, ReadFn, WriteFn, panic_message,
};
use crate::value::{Element, ElementType, SharedValue, for_each_element};
use crate::version::Version;

struct DeviceInner {
    device: Arc<dyn Device>,
    executor: ThreadPoolExecutor,
    synchronous: bool,
}

impl DeviceInner {
    /// Runs the task inline in synchronous mode, otherwise queues it on the
    /// pool. The returned flag tells which of the two happened.
    fn submit<F: FnOnce() + Send + 'static>(&self, task: F) -> Result<bool, Error> {
        if self.synchronous {
            task();
            Ok(true)
        } else {
            self.executor
                .submit(task)
                .map_err(|_| Error::UnsupportedOperation("the I/O pool has been shut down"))?;
            Ok(false)
        }
    }
}

/// Provider wrapping a blocking [`Device`].
pub struct DevicePvProvider {
    inner: Arc<DeviceInner>,
}

impl DevicePvProvider {
    /// Wraps the device with a pool of `io_threads` workers. Zero workers
    /// selects synchronous mode.
    pub fn new(device: Arc<dyn Device>, io_threads: usize) -> DevicePvProvider {
        DevicePvProvider {
            inner: Arc::new(DeviceInner {
                device,
                executor: ThreadPoolExecutor::new(io_threads),
                synchronous: io_threads == 0,
            }),
        }
    }

    /// Whether operations complete in the calling thread.
    pub fn is_synchronous(&self) -> bool {
        self.inner.synchronous
    }

    fn create_typed<T: Element>(&self, pv_name: &str) -> Result<Arc<dyn PvSupport<T>>, Error> {
        let any = self.inner.device.open_accessor(pv_name, T::TYPE)?;
        let accessor = T::accessor_from_any(any).map_err(|_| Error::TypeMismatch {
            name: pv_name.to_string(),
            requested: T::TYPE,
        })?;
        Ok(Arc::new(DevicePvSupport {
            inner: Arc::clone(&self.inner),
            element_count: accessor.element_count(),
            readable: accessor.is_readable(),
            writeable: accessor.is_writeable(),
            accessor: Arc::new(Mutex::new(accessor)),
        }))
    }
}

macro_rules! device_create_any {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        fn create_any(
            provider: &DevicePvProvider,
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
for_each_element!(device_create_any);

impl PvProvider for DevicePvProvider {
    fn default_type(&self, pv_name: &str) -> Result<Option<ElementType>, Error> {
        let info = self.inner.device.register_info(pv_name)?;
        Ok(match info.class {
            RegisterClass::IntegerSigned => Some(ElementType::Int32),
            RegisterClass::IntegerUnsigned | RegisterClass::Boolean => Some(ElementType::UInt32),
            RegisterClass::FloatingPoint => Some(ElementType::Float64),
            RegisterClass::Other => None,
        })
    }

    fn create_any_pv_support(
        &self,
        pv_name: &str,
        element_type: ElementType,
    ) -> Result<AnyPvSupport, Error> {
        create_any(self, pv_name, element_type)
    }
}

/// Handle backed by a register accessor.
struct DevicePvSupport<T: Element> {
    inner: Arc<DeviceInner>,
    accessor: Arc<Mutex<Box<dyn RegisterAccessor<T>>>>,
    element_count: usize,
    readable: bool,
    writeable: bool,
}

impl<T: Element> PvSupport<T> for DevicePvSupport<T> {
    fn can_read(&self) -> bool {
        self.readable
    }

    fn can_write(&self) -> bool {
        self.writeable
    }

    fn number_of_elements(&self) -> usize {
        self.element_count
    }

    fn initial_value(&self) -> Result<(Vec<T>, Version), Error> {
        let mut accessor = self.accessor.lock().unwrap();
        accessor
            .read()
            .map_err(|e| Error::InitialValueUnavailable(e.to_string()))?;
        let mut value = vec![T::default(); self.element_count];
        accessor.swap(&mut value);
        Ok((value, Version::new()))
    }

    fn read(&self, on_value: ReadFn<T>, on_error: FailFn) -> Result<bool, Error> {
        if !self.readable {
            return Err(Error::UnsupportedOperation(
                "this process variable is not readable",
            ));
        }
        let accessor = Arc::clone(&self.accessor);
        let element_count = self.element_count;
        let immediate = self.inner.synchronous;
        self.inner.submit(move || {
            let mut locked = accessor.lock().unwrap();
            match locked.read() {
                Err(e) => {
                    drop(locked);
                    run_failure(on_error, immediate, e);
                }
                Ok(()) => {
                    let mut value = vec![T::default(); element_count];
                    locked.swap(&mut value);
                    drop(locked);
                    run_callback("read", move || {
                        on_value(immediate, Arc::new(value) as SharedValue<T>, Version::new())
                    });
                }
            }
        })
    }

    fn write(
        &self,
        mut value: Vec<T>,
        version: Version,
        on_done: WriteFn,
        on_error: FailFn,
    ) -> Result<bool, Error> {
        if !self.writeable {
            return Err(Error::UnsupportedOperation(
                "this process variable is not writeable",
            ));
        }
        if value.len() != self.element_count {
            return Err(Error::UnsupportedOperation(
                "value length does not match the register's element count",
            ));
        }
        // Stage the value in the calling thread; the accessor is not
        // touched again by this thread until the task completes.
        self.accessor.lock().unwrap().swap(&mut value);
        let accessor = Arc::clone(&self.accessor);
        let immediate = self.inner.synchronous;
        self.inner.submit(move || {
            let mut locked = accessor.lock().unwrap();
            match locked.write(&version) {
                Err(e) => {
                    drop(locked);
                    run_failure(on_error, immediate, e);
                }
                Ok(()) => {
                    drop(locked);
                    run_callback("write", move || on_done(immediate));
                }
            }
        })
    }
}

fn run_failure(on_error: FailFn, immediate: bool, error: Error) {
    run_callback("error", move || on_error(immediate, error));
}

fn run_callback(kind: &'static str, callback: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            "a {kind} callback panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::support::PvProviderExt;
    use std::sync::mpsc;
    use std::time::Duration;

    fn memory_device() -> Arc<MemoryDevice> {
        let device = MemoryDevice::new();
        device.add_register::<i32>("adc/0", vec![17]).unwrap();
        device.add_register::<f64>("dac/0", vec![0.5]).unwrap();
        device
            .add_register_with::<u32>("status", vec![1], true, false)
            .unwrap();
        Arc::new(device)
    }

    #[test]
    fn synchronous_reads_complete_before_returning() {
        let provider = DevicePvProvider::new(memory_device(), 0);
        assert!(provider.is_synchronous());
        let support = provider.create_pv_support::<i32>("adc/0").unwrap();
        let (tx, rx) = mpsc::channel();
        let immediate = support
            .read(
                Box::new(move |immediate, value, _| {
                    tx.send((immediate, (*value).clone())).unwrap()
                }),
                Box::new(|_, e| panic!("unexpected read error: {e}")),
            )
            .unwrap();
        assert!(immediate);
        // The callback already ran; no waiting is needed.
        assert_eq!(rx.try_recv().unwrap(), (true, vec![17]));
    }

    #[test]
    fn asynchronous_operations_complete_on_the_pool() {
        let device = memory_device();
        let provider = DevicePvProvider::new(Arc::clone(&device) as Arc<dyn Device>, 2);
        assert!(!provider.is_synchronous());
        let support = provider.create_pv_support::<f64>("dac/0").unwrap();

        let (tx, rx) = mpsc::channel();
        let immediate = support
            .write(
                vec![2.25],
                Version::new(),
                Box::new(move |immediate| tx.send(immediate).unwrap()),
                Box::new(|_, e| panic!("unexpected write error: {e}")),
            )
            .unwrap();
        assert!(!immediate);
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(device.value_of::<f64>("dac/0").unwrap(), vec![2.25]);

        let (tx, rx) = mpsc::channel();
        let immediate = support
            .read(
                Box::new(move |immediate, value, _| {
                    tx.send((immediate, (*value).clone())).unwrap()
                }),
                Box::new(|_, e| panic!("unexpected read error: {e}")),
            )
            .unwrap();
        assert!(!immediate);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (false, vec![2.25])
        );
    }

    #[test]
    fn io_failures_reach_the_error_callback() {
        let device = memory_device();
        device.set_faulty("adc/0", true).unwrap();
        let provider = DevicePvProvider::new(Arc::clone(&device) as Arc<dyn Device>, 0);
        let support = provider.create_pv_support::<i32>("adc/0").unwrap();
        let (tx, rx) = mpsc::channel();
        let immediate = support
            .read(
                Box::new(|_, _, _| panic!("the read must not succeed")),
                Box::new(move |immediate, error| tx.send((immediate, error)).unwrap()),
            )
            .unwrap();
        assert!(immediate);
        let (immediate, error) = rx.try_recv().unwrap();
        assert!(immediate);
        assert!(matches!(error, Error::IoError(_)));
    }

    #[test]
    fn default_types_follow_the_register_class() {
        let provider = DevicePvProvider::new(memory_device(), 0);
        assert_eq!(
            provider.default_type("adc/0").unwrap(),
            Some(ElementType::Int32)
        );
        assert_eq!(
            provider.default_type("dac/0").unwrap(),
            Some(ElementType::Float64)
        );
        assert_eq!(
            provider.default_type("status").unwrap(),
            Some(ElementType::UInt32)
        );
        assert!(matches!(
            provider.default_type("missing"),
            Err(Error::NoSuchVariable(_))
        ));
    }

    #[test]
    fn capabilities_and_unsupported_operations() {
        let provider = DevicePvProvider::new(memory_device(), 0);
        let status = provider.create_pv_support::<u32>("status").unwrap();
        assert!(status.can_read());
        assert!(!status.can_write());
        assert!(!status.can_notify());
        assert!(matches!(
            status.write(
                vec![2],
                Version::new(),
                Box::new(|_| {}),
                Box::new(|_, _| {}),
            ),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            status.notify(Some(Arc::new(|_, _| {})), None),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn initial_value_does_a_synchronous_read() {
        let provider = DevicePvProvider::new(memory_device(), 4);
        let support = provider.create_pv_support::<i32>("adc/0").unwrap();
        let (value, _) = support.initial_value().unwrap();
        assert_eq!(value, vec![17]);
    }

    #[test]
    fn factory_errors() {
        let provider = DevicePvProvider::new(memory_device(), 0);
        assert!(matches!(
            provider.create_pv_support::<String>("adc/0"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            provider.create_pv_support::<i32>("nothing"),
            Err(Error::NoSuchVariable(_))
        ));
    }
}
