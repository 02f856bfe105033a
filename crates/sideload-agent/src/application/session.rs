//! The process-wide current session.
//!
//! A [`SessionSlot`] holds at most one current [`SessionHandle`].  Installing
//! a new handle swaps it in atomically and retires the previous one; callers
//! still holding the old handle can finish what they are doing, but every
//! attempt to open a new channel on it fails with
//! [`ServiceError::SessionRetired`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::application::ports::{
    ConnectionError, FileTransferChannel, HeartbeatChannel, InstallChannel, ServiceError,
    ServiceProvider, SessionFactory,
};

/// One established session plus its retirement flag.
pub struct SessionHandle {
    generation: u64,
    provider: Arc<dyn ServiceProvider>,
    retired: AtomicBool,
}

impl SessionHandle {
    fn new(generation: u64, provider: Arc<dyn ServiceProvider>) -> Self {
        Self {
            generation,
            provider,
            retired: AtomicBool::new(false),
        }
    }

    /// Monotonic number of this session within its slot, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    fn ensure_live(&self) -> Result<(), ServiceError> {
        if self.is_retired() {
            return Err(ServiceError::SessionRetired);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`ServiceError::SessionRetired`] once this session has been replaced.
    pub fn open_heartbeat(&self) -> Result<Box<dyn HeartbeatChannel>, ServiceError> {
        self.ensure_live()?;
        self.provider.open_heartbeat()
    }

    /// # Errors
    ///
    /// [`ServiceError::SessionRetired`] once this session has been replaced.
    pub fn open_file_transfer(&self) -> Result<Box<dyn FileTransferChannel>, ServiceError> {
        self.ensure_live()?;
        self.provider.open_file_transfer()
    }

    /// # Errors
    ///
    /// [`ServiceError::SessionRetired`] once this session has been replaced.
    pub fn open_installer(&self) -> Result<Box<dyn InstallChannel>, ServiceError> {
        self.ensure_live()?;
        self.provider.open_installer()
    }

    pub fn describe(&self) -> String {
        self.provider.describe()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Holder of the current session.
#[derive(Default)]
pub struct SessionSlot {
    current: RwLock<Option<Arc<SessionHandle>>>,
    generation: AtomicU64,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if any.
    pub fn current(&self) -> Option<Arc<SessionHandle>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes `provider` the current session and retires the previous one.
    ///
    /// Generations are numbered under the write lock, so the current session
    /// always carries the highest generation handed out.
    pub fn install(&self, provider: Arc<dyn ServiceProvider>) -> Arc<SessionHandle> {
        let (handle, previous) = {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let handle = Arc::new(SessionHandle::new(generation, provider));
            let previous = guard.replace(Arc::clone(&handle));
            (handle, previous)
        };

        if let Some(old) = previous {
            old.retire();
            debug!("retired session generation {}", old.generation());
        }
        info!(
            "session generation {} is current: {}",
            handle.generation(),
            handle.describe()
        );
        handle
    }

    /// Establishes a fresh session through `factory` and installs it.
    ///
    /// On failure the slot is left untouched.
    ///
    /// # Errors
    ///
    /// Whatever [`SessionFactory::establish`] reports.
    pub fn establish(
        &self,
        factory: &dyn SessionFactory,
    ) -> Result<Arc<SessionHandle>, ConnectionError> {
        let provider = factory.establish()?;
        Ok(self.install(provider))
    }

    /// Retires and removes the current session.
    pub fn clear(&self) {
        let previous = match self.current.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(old) = previous {
            old.retire();
            info!("session generation {} cleared", old.generation());
        }
    }
}
