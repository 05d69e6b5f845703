//! Element-wise type conversion over an existing support.

use std::marker::PhantomData;
use std::sync::Arc;

use num::cast::AsPrimitive;

use crate::error::Error;
use crate::support::{FailFn, NotifyErrorFn, NotifyFn, PvSupport, ReadFn, WriteFn};
use crate::value::{Element, SharedValue};
use crate::version::Version;

/// Presents a `PvSupport<U>` over a `PvSupport<O>` by casting every element
/// in both directions, with the semantics of an `as` cast (saturating float
/// to int, truncating int narrowing).
///
/// Each delivered or written value is converted into a freshly allocated
/// buffer, which is a real cost for large arrays. This wrapper is an
/// explicit opt-in for consumers whose native type differs from the
/// variable's; code sharing the native type must use the support directly.
pub struct ConvertingPvSupport<O, U> {
    inner: Arc<dyn PvSupport<O>>,
    _target: PhantomData<U>,
}

impl<O, U> ConvertingPvSupport<O, U>
where
    O: Element + Copy + AsPrimitive<U>,
    U: Element + Copy + AsPrimitive<O>,
{
    pub fn new(inner: Arc<dyn PvSupport<O>>) -> ConvertingPvSupport<O, U> {
        ConvertingPvSupport {
            inner,
            _target: PhantomData,
        }
    }
}

fn convert_vec<F: Copy + AsPrimitive<T>, T: Copy + 'static>(value: &[F]) -> Vec<T> {
    value.iter().map(|element| element.as_()).collect()
}

fn convert_shared<F: Copy + AsPrimitive<T>, T: Copy + 'static>(
    value: &SharedValue<F>,
) -> SharedValue<T> {
    Arc::new(convert_vec(value))
}

impl<O, U> PvSupport<U> for ConvertingPvSupport<O, U>
where
    O: Element + Copy + AsPrimitive<U>,
    U: Element + Copy + AsPrimitive<O>,
{
    fn can_notify(&self) -> bool {
        self.inner.can_notify()
    }

    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn can_write(&self) -> bool {
        self.inner.can_write()
    }

    fn number_of_elements(&self) -> usize {
        self.inner.number_of_elements()
    }

    fn initial_value(&self) -> Result<(Vec<U>, Version), Error> {
        let (value, version) = self.inner.initial_value()?;
        Ok((convert_vec(&value), version))
    }

    fn notify(
        &self,
        on_value: Option<NotifyFn<U>>,
        on_error: Option<NotifyErrorFn>,
    ) -> Result<(), Error> {
        let wrapped = on_value.map(|callback| {
            Arc::new(move |value: SharedValue<O>, version: Version| {
                callback(convert_shared(&value), version)
            }) as NotifyFn<O>
        });
        self.inner.notify(wrapped, on_error)
    }

    fn notify_finished(&self) {
        self.inner.notify_finished();
    }

    fn will_write(&self) {
        self.inner.will_write();
    }

    fn read(&self, on_value: ReadFn<U>, on_error: FailFn) -> Result<bool, Error> {
        self.inner.read(
            Box::new(move |immediate, value, version| {
                on_value(immediate, convert_shared(&value), version)
            }),
            on_error,
        )
    }

    fn write(
        &self,
        value: Vec<U>,
        version: Version,
        on_done: WriteFn,
        on_error: FailFn,
    ) -> Result<bool, Error> {
        self.inner
            .write(convert_vec(&value), version, on_done, on_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ApplicationPvProvider;
    use crate::stream::{AccessModeFlags, PvDirection, PvManager};
    use crate::support::PvProviderExt;
    use std::sync::mpsc;

    fn wrapped_support() -> (
        crate::stream::ProducerHandle<i32>,
        ConvertingPvSupport<i32, f64>,
        ApplicationPvProvider,
    ) {
        let mut manager = PvManager::new();
        let producer = manager
            .create_array::<i32>(
                "raw",
                PvDirection::Bidirectional,
                AccessModeFlags::wait_for_new_data(),
                vec![5, 6],
            )
            .unwrap();
        let provider = ApplicationPvProvider::new(manager);
        let inner = provider.create_pv_support::<i32>("raw").unwrap();
        (producer, ConvertingPvSupport::new(inner), provider)
    }

    #[test]
    fn reads_cast_to_the_target_type() {
        let (_producer, support, _provider) = wrapped_support();
        assert_eq!(support.number_of_elements(), 2);
        let (tx, rx) = mpsc::channel();
        support
            .read(
                Box::new(move |_, value, _| tx.send((*value).clone()).unwrap()),
                Box::new(|_, e| panic!("unexpected read error: {e}")),
            )
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn writes_cast_back_to_the_original_type() {
        let (producer, support, _provider) = wrapped_support();
        support
            .write(
                vec![7.9, -3.2],
                Version::new(),
                Box::new(|_| {}),
                Box::new(|_, e| panic!("unexpected write error: {e}")),
            )
            .unwrap();
        let (written, _) = producer.take_written().unwrap();
        assert_eq!(written, vec![7, -3]);
    }

    #[test]
    fn initial_value_is_converted() {
        let (_producer, support, _provider) = wrapped_support();
        let (value, _) = support.initial_value().unwrap();
        assert_eq!(value, vec![5.0, 6.0]);
    }
}
