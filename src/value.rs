//! The closed element-type taxonomy and the value currency built on it.
//!
//! Every process variable carries an ordered sequence of elements of one
//! type out of a closed, finite set: signed and unsigned integers of 8 to 64
//! bits, both float widths, strings, booleans, and a zero-size "void" marker
//! for variables that carry an event but no payload. The set is encoded
//! twice: at runtime as [`ElementType`] (the tag that crosses type-erased
//! provider boundaries) and at compile time as the sealed [`Element`] trait
//! (the strongly typed code paths). The two are linked by a dispatch table:
//! matching an [`ElementType`] selects exactly one [`Element`]
//! instantiation, and each [`Element`] impl knows how to pull its own arm
//! out of the type-erased `Any*` enums.
//!
//! Values are delivered as [`SharedValue`], a reference-shared immutable
//! buffer, so that producer staging, the shared-support cache, and any
//! number of consumer callbacks can hold the same data without copying.

use std::sync::Arc;

use crate::device::{AnyAccessor, RegisterAccessor};
use crate::stream::{AnyProcessArray, ProcessArray};
use crate::support::{AnyPvSupport, PvSupport};

/// A shared, immutable reference to a value buffer. This is the currency of
/// delivery: callbacks receive clones of the `Arc`, never copies of the data.
pub type SharedValue<T> = Arc<Vec<T>>;

/// Invokes `$mac!` with the full element-type table:
/// `(Variant, rust type, address keyword)` per entry.
macro_rules! for_each_element {
    ($mac:ident) => {
        $mac! {
            (Int8, i8, "int8"),
            (UInt8, u8, "uint8"),
            (Int16, i16, "int16"),
            (UInt16, u16, "uint16"),
            (Int32, i32, "int32"),
            (UInt32, u32, "uint32"),
            (Int64, i64, "int64"),
            (UInt64, u64, "uint64"),
            (Float32, f32, "float"),
            (Float64, f64, "double"),
            (String, String, "string"),
            (Bool, bool, "bool"),
            (Void, (), "void"),
        }
    };
}
pub(crate) use for_each_element;

macro_rules! declare_element_type {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        /// Runtime tag for the closed set of element types.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ElementType {
            $($variant,)+
        }

        impl ElementType {
            /// Every member of the closed set, in declaration order.
            pub const ALL: &'static [ElementType] = &[$(ElementType::$variant,)+];

            /// The keyword used for this type in record-link addresses.
            pub fn keyword(&self) -> &'static str {
                match self {
                    $(ElementType::$variant => $kw,)+
                }
            }

            /// Parses an address keyword back into a type tag.
            pub fn from_keyword(keyword: &str) -> Option<ElementType> {
                match keyword {
                    $($kw => Some(ElementType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}
for_each_element!(declare_element_type);

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Compile-time side of the element-type dispatch table.
///
/// Implemented for exactly the types listed in [`ElementType`]; the trait is
/// sealed so the set stays closed. The hidden associated functions are the
/// per-type arms used to move strongly typed handles in and out of the
/// type-erased enums at provider boundaries.
pub trait Element:
    sealed::Sealed + Clone + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// The runtime tag matching this type.
    const TYPE: ElementType;

    #[doc(hidden)]
    fn support_from_any(any: AnyPvSupport) -> Result<Arc<dyn PvSupport<Self>>, AnyPvSupport>;
    #[doc(hidden)]
    fn support_into_any(support: Arc<dyn PvSupport<Self>>) -> AnyPvSupport;
    #[doc(hidden)]
    fn array_from_any(any: AnyProcessArray) -> Result<ProcessArray<Self>, AnyProcessArray>;
    #[doc(hidden)]
    fn array_into_any(array: ProcessArray<Self>) -> AnyProcessArray;
    #[doc(hidden)]
    fn accessor_from_any(any: AnyAccessor) -> Result<Box<dyn RegisterAccessor<Self>>, AnyAccessor>;
    #[doc(hidden)]
    fn accessor_into_any(accessor: Box<dyn RegisterAccessor<Self>>) -> AnyAccessor;
}

macro_rules! impl_element {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {$(
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn support_from_any(any: AnyPvSupport) -> Result<Arc<dyn PvSupport<Self>>, AnyPvSupport> {
                match any {
                    AnyPvSupport::$variant(support) => Ok(support),
                    other => Err(other),
                }
            }

            fn support_into_any(support: Arc<dyn PvSupport<Self>>) -> AnyPvSupport {
                AnyPvSupport::$variant(support)
            }

            fn array_from_any(any: AnyProcessArray) -> Result<ProcessArray<Self>, AnyProcessArray> {
                match any {
                    AnyProcessArray::$variant(array) => Ok(array),
                    other => Err(other),
                }
            }

            fn array_into_any(array: ProcessArray<Self>) -> AnyProcessArray {
                AnyProcessArray::$variant(array)
            }

            fn accessor_from_any(any: AnyAccessor) -> Result<Box<dyn RegisterAccessor<Self>>, AnyAccessor> {
                match any {
                    AnyAccessor::$variant(accessor) => Ok(accessor),
                    other => Err(other),
                }
            }

            fn accessor_into_any(accessor: Box<dyn RegisterAccessor<Self>>) -> AnyAccessor {
                AnyAccessor::$variant(accessor)
            }
        }
    )+};
}
for_each_element!(impl_element);

/// Canonicalises a process-variable name.
///
/// Separators are collapsed and a single leading slash is enforced, so that
/// `temperature/setpoint`, `/temperature//setpoint` and
/// `//temperature/setpoint/` all resolve to the same shared support.
pub fn canonical_pv_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len() + 1);
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() {
        canonical.push('/');
    }
    canonical
}
