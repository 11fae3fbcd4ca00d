//! Reference-counted power control for UVC devices.

use crate::uvc::{ExtensionUnit, UvcDevice};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Device power state as understood by the UVC driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Fully powered.
    D0,
    /// Suspended.
    D3,
}

/// Power bookkeeping for one UVC device.
///
/// The device is powered exactly while `users > 0`. The 0→1 and 1→0 edges
/// run under `transition`, so racing acquirers never power on twice and a
/// release never powers off under another holder.
pub struct PowerDomain {
    device: Arc<dyn UvcDevice>,
    xus: RwLock<Vec<ExtensionUnit>>,
    users: AtomicUsize,
    transition: Mutex<()>,
}

impl PowerDomain {
    pub(crate) fn new(device: Arc<dyn UvcDevice>) -> Self {
        Self {
            device,
            xus: RwLock::new(Vec::new()),
            users: AtomicUsize::new(0),
            transition: Mutex::new(()),
        }
    }

    pub fn device(&self) -> &dyn UvcDevice {
        self.device.as_ref()
    }

    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    pub fn is_powered(&self) -> bool {
        self.user_count() > 0
    }

    /// Extension units are initialised on every power-on.
    pub(crate) fn register_xu(&self, xu: ExtensionUnit) {
        self.xus.write().push(xu);
    }

    fn acquire(&self) -> Result<()> {
        let _transition = self.transition.lock();
        if self.users.load(Ordering::Acquire) == 0 {
            self.device.set_power_state(PowerState::D0)?;
            for xu in self.xus.read().iter() {
                if let Err(e) = self.device.init_xu(xu) {
                    log::warn!("Extension unit {} init failed: {}", xu.unit, e);
                    if let Err(off) = self.device.set_power_state(PowerState::D3) {
                        log::warn!("Power-off after failed init also failed: {}", off);
                    }
                    return Err(e);
                }
            }
            log::debug!("UVC device powered on");
        }
        self.users.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self) {
        let _transition = self.transition.lock();
        match self.users.load(Ordering::Acquire) {
            0 => {
                log::error!("Power released more often than acquired");
                return;
            }
            1 => {
                if let Err(e) = self.device.set_power_state(PowerState::D3) {
                    log::warn!("UVC power-off failed: {}", e);
                } else {
                    log::debug!("UVC device powered off");
                }
            }
            _ => {}
        }
        self.users.fetch_sub(1, Ordering::AcqRel);
    }

    /// Run `action` against the device while holding a power reference.
    pub fn invoke_powered<T, F>(self: &Arc<Self>, action: F) -> Result<T>
    where
        F: FnOnce(&dyn UvcDevice) -> Result<T>,
    {
        let _on = PowerGuard::acquire(self)?;
        action(self.device())
    }
}

/// Scoped power reference. Powers the device while alive.
///
/// Holds only a weak reference, so it never keeps its domain alive; once the
/// owning endpoint is gone, dropping the guard is a no-op.
#[must_use = "power is released as soon as the guard is dropped"]
pub struct PowerGuard {
    owner: Weak<PowerDomain>,
}

impl PowerGuard {
    pub fn acquire(owner: &Arc<PowerDomain>) -> Result<Self> {
        owner.acquire()?;
        Ok(Self {
            owner: Arc::downgrade(owner),
        })
    }
}

impl Drop for PowerGuard {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.release();
        }
    }
}
