//! Option and info registries shared by every endpoint variant.

use crate::types::{CameraInfo, OptionId, OptionRange};
use crate::{EndpointError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A configurable parameter exposed by an endpoint.
pub trait CameraOption: Send + Sync {
    fn query(&self) -> Result<f32>;

    fn set(&self, value: f32) -> Result<()>;

    fn range(&self) -> Result<OptionRange>;
}

#[derive(Default)]
pub struct OptionRegistry {
    options: RwLock<HashMap<OptionId, Arc<dyn CameraOption>>>,
}

impl OptionRegistry {
    /// Register `option` under `id`, replacing any earlier registration.
    pub fn register(&self, id: OptionId, option: Arc<dyn CameraOption>) {
        if self.options.write().insert(id, option).is_some() {
            log::debug!("Option {:?} re-registered", id);
        }
    }

    pub fn get(&self, id: OptionId) -> Result<Arc<dyn CameraOption>> {
        self.options
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EndpointError::NotSupported(format!("option {:?}", id)))
    }

    pub fn supports(&self, id: OptionId) -> bool {
        self.options.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<OptionId> {
        self.options.read().keys().copied().collect()
    }
}

#[derive(Default)]
pub struct InfoRegistry {
    info: RwLock<HashMap<CameraInfo, String>>,
}

impl InfoRegistry {
    /// Register a descriptive string. Re-registering the same value is a no-op;
    /// a different value is rejected.
    pub fn register(&self, id: CameraInfo, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        let mut info = self.info.write();
        match info.get(&id) {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(EndpointError::DuplicateInfo(id)),
            None => {
                info.insert(id, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: CameraInfo) -> Result<String> {
        self.info
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EndpointError::NotSupported(format!("camera info {:?}", id)))
    }

    pub fn supports(&self, id: CameraInfo) -> bool {
        self.info.read().contains_key(&id)
    }
}
