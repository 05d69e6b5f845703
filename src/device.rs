//! Blocking register devices backing the polled provider.
//!
//! A [`Device`] exposes a catalogue of named registers and typed, blocking
//! accessors onto them. Accessors stage data in an internal buffer that is
//! exchanged by swap, so a value never has to be copied between the I/O
//! layer and the support handle.
//!
//! Devices are located by alias: aliases registered programmatically take
//! precedence, otherwise the alias is looked up in the device map file (one
//! `alias uri` pair per line) and the uri's scheme selects a registered
//! backend constructor. [`MemoryDevice`] is the in-memory reference backend.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use tracing::debug;

use crate::error::Error;
use crate::value::{Element, ElementType, canonical_pv_name, for_each_element};
use crate::version::Version;

/// Broad classification of a register's stored data, used to derive the
/// provider's default element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    IntegerSigned,
    IntegerUnsigned,
    FloatingPoint,
    Boolean,
    Other,
}

/// Catalogue entry for one register.
#[derive(Debug, Clone)]
pub struct RegisterInfo {
    pub element_count: usize,
    pub readable: bool,
    pub writeable: bool,
    pub class: RegisterClass,
}

/// The register class natively stored by an element type.
pub fn register_class_of(element_type: ElementType) -> RegisterClass {
    use ElementType::*;
    match element_type {
        Int8 | Int16 | Int32 | Int64 => RegisterClass::IntegerSigned,
        UInt8 | UInt16 | UInt32 | UInt64 => RegisterClass::IntegerUnsigned,
        Float32 | Float64 => RegisterClass::FloatingPoint,
        Bool => RegisterClass::Boolean,
        String | Void => RegisterClass::Other,
    }
}

/// Typed, blocking access to one register. Confined to one thread at a time;
/// the polled provider keeps each accessor on its I/O pool.
pub trait RegisterAccessor<T: Element>: Send {
    fn element_count(&self) -> usize;
    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;

    /// Transfers the register's current value into the staging buffer.
    fn read(&mut self) -> Result<(), Error>;

    /// Transfers the staging buffer into the register.
    fn write(&mut self, version: &Version) -> Result<(), Error>;

    /// Exchanges the staging buffer with the given vector.
    fn swap(&mut self, value: &mut Vec<T>);
}

macro_rules! declare_any_accessor {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        /// Type-erased register accessor, one arm per element type.
        pub enum AnyAccessor {
            $($variant(Box<dyn RegisterAccessor<$ty>>),)+
        }

        impl AnyAccessor {
            pub fn element_type(&self) -> ElementType {
                match self {
                    $(AnyAccessor::$variant(_) => ElementType::$variant,)+
                }
            }
        }
    };
}
for_each_element!(declare_any_accessor);

/// A blocking register device.
pub trait Device: Send + Sync {
    /// Catalogue information for a register. Fails with
    /// [`Error::NoSuchVariable`] for unknown names.
    fn register_info(&self, name: &str) -> Result<RegisterInfo, Error>;

    /// Opens a typed accessor. Fails with [`Error::NoSuchVariable`] for
    /// unknown names and [`Error::TypeMismatch`] when the register does not
    /// store the requested element type.
    fn open_accessor(&self, name: &str, element_type: ElementType) -> Result<AnyAccessor, Error>;
}

// ---------------------------------------------------------------------------
// In-memory device
// ---------------------------------------------------------------------------

struct RegisterCell<T> {
    value: Mutex<Vec<T>>,
}

struct MemoryRegister {
    info: RegisterInfo,
    stored_type: ElementType,
    cell: Arc<dyn Any + Send + Sync>,
    faulty: AtomicBool,
}

/// An in-memory register device. Registers are added up front with an
/// initial value; their element count and stored type are fixed from then
/// on. A register can be marked faulty to make its accessors fail, which is
/// how I/O error paths are exercised.
#[derive(Default)]
pub struct MemoryDevice {
    registers: Mutex<HashMap<String, Arc<MemoryRegister>>>,
}

impl MemoryDevice {
    pub fn new() -> MemoryDevice {
        MemoryDevice::default()
    }

    /// Adds a readable and writeable register.
    pub fn add_register<T: Element>(&self, name: &str, initial: Vec<T>) -> Result<(), Error> {
        self.add_register_with(name, initial, true, true)
    }

    /// Adds a register with explicit capabilities.
    pub fn add_register_with<T: Element>(
        &self,
        name: &str,
        initial: Vec<T>,
        readable: bool,
        writeable: bool,
    ) -> Result<(), Error> {
        let canonical = canonical_pv_name(name);
        let mut registers = self.registers.lock().unwrap();
        if registers.contains_key(&canonical) {
            return Err(Error::NameInUse(canonical));
        }
        let register = MemoryRegister {
            info: RegisterInfo {
                element_count: initial.len(),
                readable,
                writeable,
                class: register_class_of(T::TYPE),
            },
            stored_type: T::TYPE,
            cell: Arc::new(RegisterCell {
                value: Mutex::new(initial),
            }),
            faulty: AtomicBool::new(false),
        };
        registers.insert(canonical, Arc::new(register));
        Ok(())
    }

    /// Makes every subsequent read and write of the register fail.
    pub fn set_faulty(&self, name: &str, faulty: bool) -> Result<(), Error> {
        self.register(name)?.faulty.store(faulty, Ordering::SeqCst);
        Ok(())
    }

    /// Current stored value of a register.
    pub fn value_of<T: Element>(&self, name: &str) -> Result<Vec<T>, Error> {
        let register = self.register(name)?;
        let cell = cell_of::<T>(&register, name)?;
        Ok(cell.value.lock().unwrap().clone())
    }

    /// Replaces the stored value of a register, keeping the element count.
    pub fn set_value<T: Element>(&self, name: &str, value: Vec<T>) -> Result<(), Error> {
        let register = self.register(name)?;
        if value.len() != register.info.element_count {
            return Err(Error::UnsupportedOperation(
                "value length does not match the register's element count",
            ));
        }
        let cell = cell_of::<T>(&register, name)?;
        *cell.value.lock().unwrap() = value;
        Ok(())
    }

    fn register(&self, name: &str) -> Result<Arc<MemoryRegister>, Error> {
        let canonical = canonical_pv_name(name);
        self.registers
            .lock()
            .unwrap()
            .get(&canonical)
            .cloned()
            .ok_or(Error::NoSuchVariable(canonical))
    }
}

fn cell_of<T: Element>(
    register: &Arc<MemoryRegister>,
    name: &str,
) -> Result<Arc<RegisterCell<T>>, Error> {
    Arc::clone(&register.cell)
        .downcast::<RegisterCell<T>>()
        .map_err(|_| Error::TypeMismatch {
            name: canonical_pv_name(name),
            requested: T::TYPE,
        })
}

struct MemoryAccessor<T: Element> {
    register: Arc<MemoryRegister>,
    cell: Arc<RegisterCell<T>>,
    buffer: Vec<T>,
}

impl<T: Element> RegisterAccessor<T> for MemoryAccessor<T> {
    fn element_count(&self) -> usize {
        self.register.info.element_count
    }

    fn is_readable(&self) -> bool {
        self.register.info.readable
    }

    fn is_writeable(&self) -> bool {
        self.register.info.writeable
    }

    fn read(&mut self) -> Result<(), Error> {
        if !self.register.info.readable {
            return Err(Error::UnsupportedOperation("this register is not readable"));
        }
        if self.register.faulty.load(Ordering::SeqCst) {
            return Err(Error::IoError("register read failed".into()));
        }
        self.buffer.clone_from(&self.cell.value.lock().unwrap());
        Ok(())
    }

    fn write(&mut self, _version: &Version) -> Result<(), Error> {
        if !self.register.info.writeable {
            return Err(Error::UnsupportedOperation(
                "this register is not writeable",
            ));
        }
        if self.register.faulty.load(Ordering::SeqCst) {
            return Err(Error::IoError("register write failed".into()));
        }
        self.cell.value.lock().unwrap().clone_from(&self.buffer);
        Ok(())
    }

    fn swap(&mut self, value: &mut Vec<T>) {
        std::mem::swap(&mut self.buffer, value);
    }
}

macro_rules! memory_open_accessor {
    ($(($variant:ident, $ty:ty, $kw:literal)),+ $(,)?) => {
        fn open_memory_accessor(
            register: &Arc<MemoryRegister>,
            name: &str,
            element_type: ElementType,
        ) -> Result<AnyAccessor, Error> {
            match element_type {
                $(ElementType::$variant => {
                    let cell = cell_of::<$ty>(register, name)?;
                    let element_count = register.info.element_count;
                    Ok(<$ty as Element>::accessor_into_any(Box::new(
                        MemoryAccessor::<$ty> {
                            register: Arc::clone(register),
                            cell,
                            buffer: vec![<$ty>::default(); element_count],
                        },
                    )))
                })+
            }
        }
    };
}
for_each_element!(memory_open_accessor);

impl Device for MemoryDevice {
    fn register_info(&self, name: &str) -> Result<RegisterInfo, Error> {
        Ok(self.register(name)?.info.clone())
    }

    fn open_accessor(&self, name: &str, element_type: ElementType) -> Result<AnyAccessor, Error> {
        let register = self.register(name)?;
        if register.stored_type != element_type {
            return Err(Error::TypeMismatch {
                name: canonical_pv_name(name),
                requested: element_type,
            });
        }
        open_memory_accessor(&register, name, element_type)
    }
}

// ---------------------------------------------------------------------------
// Alias resolution
// ---------------------------------------------------------------------------

/// Constructor for a device backend, selected by uri scheme.
pub type BackendFactory = fn(&str) -> Result<Arc<dyn Device>, Error>;

static ALIASES: LazyLock<Mutex<HashMap<String, Arc<dyn Device>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static BACKENDS: LazyLock<Mutex<HashMap<String, BackendFactory>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Registers a device directly under an alias, bypassing the device map
/// file. A later registration under the same alias replaces the earlier one.
pub fn register_device_alias(alias: &str, device: Arc<dyn Device>) {
    debug!(alias, "registering device alias");
    ALIASES.lock().unwrap().insert(alias.to_string(), device);
}

/// Registers a backend constructor for a uri scheme (the part before
/// `://` in device map uris).
pub fn register_backend(scheme: &str, factory: BackendFactory) {
    BACKENDS.lock().unwrap().insert(scheme.to_string(), factory);
}

/// Resolves an alias to a device: programmatic aliases first, then the
/// device map file.
pub fn open_device(alias: &str, dmap_path: Option<&Path>) -> Result<Arc<dyn Device>, Error> {
    if let Some(device) = ALIASES.lock().unwrap().get(alias) {
        return Ok(Arc::clone(device));
    }
    let Some(path) = dmap_path else {
        return Err(Error::IoError(format!(
            "unknown device alias '{alias}' and no device map file configured"
        )));
    };
    let uri = parse_dmap(path)?
        .into_iter()
        .find(|(entry_alias, _)| entry_alias == alias)
        .map(|(_, uri)| uri)
        .ok_or_else(|| {
            Error::IoError(format!(
                "device alias '{alias}' not found in '{}'",
                path.display()
            ))
        })?;
    let scheme = uri.split("://").next().unwrap_or("");
    let factory = *BACKENDS.lock().unwrap().get(scheme).ok_or_else(|| {
        Error::IoError(format!("no device backend registered for scheme '{scheme}'"))
    })?;
    factory(&uri)
}

/// Parses a device map file into `(alias, uri)` pairs. Blank lines and lines
/// starting with `#` are skipped; extra fields on a line are ignored.
pub fn parse_dmap(path: &Path) -> Result<Vec<(String, String)>, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("cannot read '{}': {e}", path.display())))?;
    let mut entries = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(alias), Some(uri)) = (fields.next(), fields.next()) else {
            return Err(Error::IoError(format!(
                "malformed device map entry at line {} of '{}'",
                line_number + 1,
                path.display()
            )));
        };
        entries.push((alias.to_string(), uri.to_string()));
    }
    Ok(entries)
}
