//! The name→provider registry and its one-shot initialisation barrier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};

use tracing::debug;

use crate::device;
use crate::error::Error;
use crate::providers::{ApplicationPvProvider, DevicePvProvider};
use crate::stream::PvManager;
use crate::support::PvProvider;

struct RegistryState {
    providers: HashMap<String, Arc<dyn PvProvider>>,
    finalised: bool,
    dmap_path: Option<PathBuf>,
}

/// Maps application and device ids to providers.
///
/// Registration is only possible until [`finalize`](Self::finalize) has been
/// called; finalisation then runs every provider's initial-write phase
/// exactly once. A process-wide instance is available through
/// [`global`](Self::global); independent instances can be created for
/// embedding and tests.
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL: LazyLock<ProviderRegistry> = LazyLock::new(ProviderRegistry::new);

impl ProviderRegistry {
    pub fn new() -> ProviderRegistry {
        ProviderRegistry {
            state: Mutex::new(RegistryState {
                providers: HashMap::new(),
                finalised: false,
                dmap_path: None,
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static ProviderRegistry {
        &GLOBAL
    }

    /// Registers a streaming provider for the application's variables under
    /// the given id.
    pub fn register_application(&self, name: &str, manager: PvManager) -> Result<(), Error> {
        // The provider (and its dispatcher thread) is only created once the
        // name is known to be free.
        let mut state = self.state.lock().unwrap();
        Self::check_registration(&state, name)?;
        let provider = Arc::new(ApplicationPvProvider::new(manager));
        state.providers.insert(name.to_string(), provider);
        debug!(name, "registered application provider");
        Ok(())
    }

    /// Registers a polled provider for the device behind `device_alias`.
    /// `io_threads == 0` selects synchronous mode.
    pub fn register_device(
        &self,
        name: &str,
        device_alias: &str,
        io_threads: usize,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        Self::check_registration(&state, name)?;
        let backing = device::open_device(device_alias, state.dmap_path.as_deref())?;
        let provider = Arc::new(DevicePvProvider::new(backing, io_threads));
        state.providers.insert(name.to_string(), provider);
        debug!(name, device_alias, io_threads, "registered device provider");
        Ok(())
    }

    /// Sets the device map file used to resolve device aliases.
    pub fn set_dmap_file_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().dmap_path = Some(path.into());
    }

    /// The provider registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn PvProvider>, Error> {
        self.state
            .lock()
            .unwrap()
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchProvider(name.to_string()))
    }

    /// One-shot barrier ending the registration phase. Every registered
    /// provider runs its initialisation finalisation; for streaming
    /// providers this performs the initial write of every variable that no
    /// handle claimed via `will_write`.
    pub fn finalize(&self) -> Result<(), Error> {
        let providers: Vec<Arc<dyn PvProvider>> = {
            let mut state = self.state.lock().unwrap();
            if state.finalised {
                return Err(Error::AlreadyFinalised);
            }
            state.finalised = true;
            state.providers.values().cloned().collect()
        };
        // The lock is not held while calling into the providers; their
        // finalisation may take locks of their own.
        for provider in providers {
            provider.finalize_initialization();
        }
        Ok(())
    }

    fn check_registration(state: &RegistryState, name: &str) -> Result<(), Error> {
        if state.finalised {
            return Err(Error::AlreadyFinalised);
        }
        if state.providers.contains_key(name) {
            return Err(Error::NameInUse(name.to_string()));
        }
        Ok(())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        ProviderRegistry::new()
    }
}
