//! # camera-endpoint - device endpoint layer for camera and motion sensors
//!
//! An endpoint is one streaming capability of a physical device. This crate
//! provides:
//! - Format negotiation from logical stream requests to device profiles
//! - A video endpoint over a UVC driver, with reference-counted power control
//!   and rolling hardware timestamps
//! - A motion endpoint over HID/IIO inertial sensors
//! - Option and info registries, and frame dispatch through a bounded archive
//!
//! ## Quick Start
//! ```no_run
//! use camera_endpoint::{
//!     Endpoint, EndpointConfig, Frame, StreamKind, StreamProfile, UvcDevice, UvcEndpoint,
//! };
//! use std::sync::Arc;
//!
//! fn run(device: Arc<dyn UvcDevice>) -> camera_endpoint::Result<()> {
//!     let endpoint = UvcEndpoint::new(device, EndpointConfig::from_env());
//!     endpoint.open(&[StreamProfile::any(StreamKind::Depth)])?;
//!     endpoint.start_streaming(Arc::new(|frame: Frame| {
//!         println!("frame #{}", frame.metadata().frame_counter);
//!     }))?;
//!     endpoint.stop_streaming()?;
//!     endpoint.close()
//! }
//! ```

pub mod archive;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod hid;
pub mod power;
pub mod profile;
pub mod registry;
pub mod timestamp;
pub mod types;
pub mod uvc;

#[cfg(test)]
mod testing;

pub use archive::{BoundedArchive, Frame, FrameArchive, FrameMetadata};
pub use config::EndpointConfig;
pub use endpoint::{Endpoint, EndpointCore, FrameCallback};
pub use error::EndpointError;
pub use hid::{HidDevice, HidEndpoint, HidSensor};
pub use power::{PowerGuard, PowerState};
pub use profile::{DeviceProfile, NativeFormat, RequestMapping};
pub use registry::CameraOption;
pub use types::*;
pub use uvc::{ExtensionUnit, UvcDevice, UvcEndpoint};

/// Result type alias for endpoint operations.
pub type Result<T> = std::result::Result<T, EndpointError>;
