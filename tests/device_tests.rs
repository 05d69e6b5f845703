//! Polled-device provider: immediate completion in synchronous mode,
//! deferred completion on the I/O pool, and factory type checking.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use pvbridge::device::{Device, MemoryDevice};
use pvbridge::providers::DevicePvProvider;
use pvbridge::support::PvProviderExt;
use pvbridge::{ElementType, Error, PvProvider, PvSupport, Version};
use tracing::level_filters::LevelFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}

fn plant_device() -> Arc<MemoryDevice> {
    let device = MemoryDevice::new();
    device.add_register::<i32>("motor/position", vec![120]).unwrap();
    device.add_register::<f64>("motor/speed", vec![0.25]).unwrap();
    Arc::new(device)
}

#[test]
fn requesting_an_incompatible_type_fails() {
    init_tracing();
    let provider = DevicePvProvider::new(plant_device(), 0);
    assert_eq!(
        provider.default_type("motor/position").unwrap(),
        Some(ElementType::Int32)
    );
    assert!(matches!(
        provider.create_pv_support::<String>("motor/position"),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn synchronous_reads_complete_in_the_calling_thread() {
    init_tracing();
    let provider = DevicePvProvider::new(plant_device(), 0);
    let support = provider.create_pv_support::<i32>("motor/position").unwrap();

    let (tx, rx) = mpsc::channel();
    let immediate = support
        .read(
            Box::new(move |immediate, value, _| tx.send((immediate, (*value).clone())).unwrap()),
            Box::new(|_, e| panic!("unexpected read error: {e}")),
        )
        .unwrap();
    assert!(immediate);
    // Synchronous mode: the callback has already run.
    assert_eq!(rx.try_recv().unwrap(), (true, vec![120]));
}

#[test]
fn synchronous_writes_complete_in_the_calling_thread() {
    init_tracing();
    let device = plant_device();
    let provider = DevicePvProvider::new(Arc::clone(&device) as Arc<dyn Device>, 0);
    let support = provider.create_pv_support::<i32>("motor/position").unwrap();

    let (tx, rx) = mpsc::channel();
    let immediate = support
        .write(
            vec![480],
            Version::new(),
            Box::new(move |immediate| tx.send(immediate).unwrap()),
            Box::new(|_, e| panic!("unexpected write error: {e}")),
        )
        .unwrap();
    assert!(immediate);
    assert!(rx.try_recv().unwrap());
    assert_eq!(device.value_of::<i32>("motor/position").unwrap(), vec![480]);
}

#[test]
fn asynchronous_mode_defers_completion_to_the_pool() {
    init_tracing();
    let device = plant_device();
    let provider = DevicePvProvider::new(Arc::clone(&device) as Arc<dyn Device>, 2);
    let support = provider.create_pv_support::<f64>("motor/speed").unwrap();

    let (tx, rx) = mpsc::channel();
    let immediate = support
        .read(
            Box::new(move |immediate, value, _| tx.send((immediate, (*value).clone())).unwrap()),
            Box::new(|_, e| panic!("unexpected read error: {e}")),
        )
        .unwrap();
    assert!(!immediate);
    let (callback_immediate, value) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!callback_immediate);
    assert_eq!(value, vec![0.25]);

    let (tx, rx) = mpsc::channel();
    let immediate = support
        .write(
            vec![1.5],
            Version::new(),
            Box::new(move |immediate| tx.send(immediate).unwrap()),
            Box::new(|_, e| panic!("unexpected write error: {e}")),
        )
        .unwrap();
    assert!(!immediate);
    assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(device.value_of::<f64>("motor/speed").unwrap(), vec![1.5]);
}

#[test]
fn io_failures_surface_through_the_error_callback() {
    init_tracing();
    let device = plant_device();
    device.set_faulty("motor/speed", true).unwrap();
    let provider = DevicePvProvider::new(Arc::clone(&device) as Arc<dyn Device>, 1);
    let support = provider.create_pv_support::<f64>("motor/speed").unwrap();

    let (tx, rx) = mpsc::channel();
    support
        .read(
            Box::new(|_, _, _| panic!("the read must fail")),
            Box::new(move |immediate, error| tx.send((immediate, error)).unwrap()),
        )
        .unwrap();
    let (immediate, error) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!immediate);
    assert!(matches!(error, Error::IoError(_)));

    assert!(matches!(
        support.initial_value(),
        Err(Error::InitialValueUnavailable(_))
    ));
}
