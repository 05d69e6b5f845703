//! Output reconciliation: a local write and values arriving back from the
//! producer converge on one value without echo storms.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use pvbridge::output::{OutputChannel, OutputOptions};
use pvbridge::providers::ApplicationPvProvider;
use pvbridge::stream::{AccessModeFlags, ProducerHandle, PvDirection, PvManager};
use pvbridge::support::PvProviderExt;
use pvbridge::Version;
use tracing::level_filters::LevelFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}

struct Rig {
    producer: ProducerHandle<i32>,
    channel: OutputChannel<i32>,
    process_requests: mpsc::Receiver<()>,
    _provider: ApplicationPvProvider,
}

fn rig(bidirectional: bool) -> Rig {
    let mut manager = PvManager::new();
    let producer = manager
        .create_array::<i32>(
            "setpoint",
            PvDirection::Bidirectional,
            AccessModeFlags::wait_for_new_data(),
            vec![0],
        )
        .unwrap();
    let provider = ApplicationPvProvider::new(manager);
    let support = provider.create_pv_support::<i32>("setpoint").unwrap();
    let (tx, process_requests) = mpsc::channel();
    let channel = OutputChannel::new(
        support,
        OutputOptions { bidirectional },
        Arc::new(move || {
            let _ = tx.send(());
        }),
    )
    .unwrap();
    Rig {
        producer,
        channel,
        process_requests,
        _provider: provider,
    }
}

impl Rig {
    /// Waits for a process request and runs one process pass.
    fn pump(&self) -> Option<(Vec<i32>, Version)> {
        self.process_requests
            .recv_timeout(Duration::from_secs(5))
            .expect("expected a process request");
        self.channel.process().unwrap()
    }

    fn expect_no_request(&self) {
        assert!(
            self.process_requests
                .recv_timeout(Duration::from_millis(200))
                .is_err(),
            "no process request expected"
        );
    }
}

#[test]
fn reconciliation_accepts_and_drops_by_version_and_payload() {
    init_tracing();
    let rig = rig(true);
    // An older version minted before our write, sent later by the producer.
    let stale = Version::new();

    // Local write of [10].
    assert!(rig.channel.write(vec![10]).unwrap());
    let (written, written_version) = rig.producer.take_written().unwrap();
    assert_eq!(written, vec![10]);

    // The producer echoes exactly what we wrote: same version, same
    // payload. Dropped.
    rig.producer.send(vec![10], written_version).unwrap();
    rig.expect_no_request();
    assert_eq!(rig.channel.value().0, vec![10]);

    // Same version but a transformed payload: the producer has seen our
    // write and answered with a different value. Accepted.
    rig.producer.send(vec![11], written_version).unwrap();
    assert_eq!(rig.pump(), Some((vec![11], written_version)));
    assert_eq!(rig.channel.value().0, vec![11]);

    // An older version. Dropped.
    rig.producer.send(vec![12], stale).unwrap();
    rig.expect_no_request();
    assert_eq!(rig.channel.value().0, vec![11]);

    // A newer version. Accepted.
    let newer = Version::new();
    rig.producer.send(vec![13], newer).unwrap();
    assert_eq!(rig.pump(), Some((vec![13], newer)));
    assert_eq!(rig.channel.value().0, vec![13]);
}

#[test]
fn a_remote_update_newer_than_the_written_version_wins() {
    init_tracing();
    let rig = rig(true);
    rig.channel.write(vec![5]).unwrap();
    rig.producer.take_written().unwrap();

    let newer = Version::new();
    rig.producer.send(vec![6], newer).unwrap();
    assert_eq!(rig.pump(), Some((vec![6], newer)));
    assert_eq!(rig.channel.value(), (vec![6], Some(newer)));
}

#[test]
fn an_accepted_update_is_applied_by_the_next_process_pass() {
    init_tracing();
    let rig = rig(true);
    rig.channel.write(vec![20]).unwrap();
    rig.producer.take_written().unwrap();

    // Whether the update lands while the write is still in flight or after
    // it completed, a process request arrives once the write has surfaced
    // and the pass applies the accepted value.
    let newer = Version::new();
    rig.producer.send(vec![21], newer).unwrap();
    assert_eq!(rig.pump(), Some((vec![21], newer)));
    assert_eq!(rig.channel.value(), (vec![21], Some(newer)));
}

#[test]
fn nobidirectional_outputs_ignore_remote_updates() {
    init_tracing();
    let rig = rig(false);
    rig.channel.write(vec![7]).unwrap();
    rig.producer.take_written().unwrap();

    rig.producer.send(vec![8], Version::new()).unwrap();
    rig.expect_no_request();
    assert_eq!(rig.channel.value().0, vec![7]);
}

#[test]
fn the_initial_value_becomes_the_first_baseline() {
    init_tracing();
    let rig = rig(true);
    let (value, version) = rig.channel.value();
    assert_eq!(value, vec![0]);
    assert!(version.is_some());
    // The initial notification repeats the baseline and must not trigger a
    // process pass.
    rig.expect_no_request();
}
