//! Video endpoint backed by a UVC device.

use crate::archive::{FrameArchive, FrameMetadata};
use crate::config::EndpointConfig;
use crate::endpoint::{ensure, Endpoint, EndpointCore, FrameCallback};
use crate::power::{PowerDomain, PowerGuard, PowerState};
use crate::profile::{DeviceProfile, RequestMapping};
use crate::registry::CameraOption;
use crate::timestamp::{FrameTimestampReader, RollingTimestampReader};
use crate::types::{OptionId, OptionRange, StreamProfile};
use crate::{EndpointError, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

/// Receives raw buffers for one committed profile.
pub type RawFrameCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Vendor extension unit addressed by interface, unit and node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionUnit {
    pub subdevice: u8,
    pub unit: u8,
    pub node: u8,
    pub guid: [u8; 16],
}

impl ExtensionUnit {
    pub fn new(subdevice: u8, unit: u8, node: u8, guid: [u8; 16]) -> Self {
        Self {
            subdevice,
            unit,
            node,
            guid,
        }
    }
}

/// Range of an integer UVC control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

impl From<ControlRange> for OptionRange {
    fn from(r: ControlRange) -> Self {
        OptionRange {
            min: r.min as f32,
            max: r.max as f32,
            step: r.step as f32,
            default: r.default as f32,
        }
    }
}

/// Operations the UVC driver provides. Control and streaming calls expect the
/// device to be powered.
pub trait UvcDevice: Send + Sync {
    fn set_power_state(&self, state: PowerState) -> Result<()>;

    fn get_profiles(&self) -> Result<Vec<DeviceProfile>>;

    /// Negotiate `profile` and route its buffers to `callback`.
    fn probe_and_commit(&self, profile: &DeviceProfile, callback: RawFrameCallback) -> Result<()>;

    /// Start delivering buffers for every committed profile.
    fn stream_on(&self) -> Result<()>;

    /// Stop delivery for `profile` and drop its callback.
    fn close(&self, profile: &DeviceProfile) -> Result<()>;

    fn init_xu(&self, xu: &ExtensionUnit) -> Result<()>;

    fn get_xu(&self, xu: &ExtensionUnit, control: u8, len: usize) -> Result<Vec<u8>>;

    fn set_xu(&self, xu: &ExtensionUnit, control: u8, data: &[u8]) -> Result<()>;

    fn get_xu_range(&self, xu: &ExtensionUnit, control: u8) -> Result<ControlRange>;

    fn get_pu(&self, option: OptionId) -> Result<i32>;

    fn set_pu(&self, option: OptionId, value: i32) -> Result<()>;

    fn get_pu_range(&self, option: OptionId) -> Result<ControlRange>;
}

type SharedReader = Arc<Mutex<Box<dyn FrameTimestampReader>>>;

struct ConfiguredStream {
    mapping: RequestMapping,
    reader: SharedReader,
}

#[derive(Default)]
struct Configuration {
    streams: Vec<ConfiguredStream>,
    power: Option<PowerGuard>,
}

/// Video endpoint: one UVC streaming interface of a physical device.
pub struct UvcEndpoint {
    core: Arc<EndpointCore>,
    power: Arc<PowerDomain>,
    configuration: Mutex<Configuration>,
}

impl UvcEndpoint {
    pub fn new(device: Arc<dyn UvcDevice>, config: EndpointConfig) -> Self {
        Self::from_core(device, EndpointCore::new(config))
    }

    pub fn with_archive(
        device: Arc<dyn UvcDevice>,
        config: EndpointConfig,
        archive: Arc<dyn FrameArchive>,
    ) -> Self {
        Self::from_core(device, EndpointCore::with_archive(config, archive))
    }

    fn from_core(device: Arc<dyn UvcDevice>, core: EndpointCore) -> Self {
        Self {
            core: Arc::new(core),
            power: Arc::new(PowerDomain::new(device)),
            configuration: Mutex::new(Configuration::default()),
        }
    }

    /// Run a device operation with the device powered for its duration.
    pub fn invoke_powered<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce(&dyn UvcDevice) -> Result<T>,
    {
        self.power.invoke_powered(action)
    }

    pub fn is_powered(&self) -> bool {
        self.power.is_powered()
    }

    pub fn power_user_count(&self) -> usize {
        self.power.user_count()
    }

    /// Register an extension unit, initialised whenever the device powers on.
    pub fn register_xu(&self, xu: ExtensionUnit) {
        self.power.register_xu(xu);
    }

    /// Expose a processing-unit control as option `id`.
    pub fn register_pu(&self, id: OptionId) {
        let option = UvcPuOption {
            power: Arc::downgrade(&self.power),
            id,
        };
        self.core.options().register(id, Arc::new(option));
    }

    /// Expose a 32-bit extension-unit control as option `id`.
    pub fn register_xu_option(&self, id: OptionId, xu: ExtensionUnit, control: u8) {
        let option = UvcXuOption {
            power: Arc::downgrade(&self.power),
            xu,
            control,
        };
        self.core.options().register(id, Arc::new(option));
    }

    /// One fresh timestamp reader per configured stream, in configuration order.
    pub fn create_frame_timestamp_readers(&self) -> Vec<Box<dyn FrameTimestampReader>> {
        let count = self.configuration.lock().streams.len();
        self.new_readers(count)
    }

    /// Resolved configuration stored by the last `open`.
    pub fn configuration(&self) -> Vec<RequestMapping> {
        self.configuration
            .lock()
            .streams
            .iter()
            .map(|s| s.mapping.clone())
            .collect()
    }

    fn new_readers(&self, count: usize) -> Vec<Box<dyn FrameTimestampReader>> {
        let scale = self.core.config().timestamp_scale;
        (0..count)
            .map(|_| Box::new(RollingTimestampReader::new(scale)) as Box<dyn FrameTimestampReader>)
            .collect()
    }

    /// Commit every configured profile and start the stream, undoing partial
    /// commits on failure.
    fn commit(&self, streams: &[ConfiguredStream]) -> Result<()> {
        let device = self.power.device();
        let mut committed: Vec<DeviceProfile> = Vec::with_capacity(streams.len());

        let mut result = Ok(());
        for stream in streams {
            let callback = raw_frame_callback(
                Arc::downgrade(&self.core),
                stream.mapping.clone(),
                stream.reader.clone(),
            );
            if let Err(e) = device.probe_and_commit(&stream.mapping.profile, callback) {
                result = Err(e);
                break;
            }
            committed.push(stream.mapping.profile);
        }
        if result.is_ok() {
            result = device.stream_on();
        }

        if let Err(e) = &result {
            log::warn!("Starting UVC stream failed: {}", e);
            for profile in &committed {
                if let Err(e) = device.close(profile) {
                    log::warn!("Rollback close of {:?} failed: {}", profile, e);
                }
            }
        }
        result
    }

    fn stop_locked(&self, configuration: &mut Configuration) -> Result<()> {
        ensure(self.core.is_streaming(), EndpointError::NotStreaming)?;
        self.core.set_streaming(false);

        let device = self.power.device();
        for stream in &configuration.streams {
            if let Err(e) = device.close(&stream.mapping.profile) {
                log::warn!("Closing {:?} failed: {}", stream.mapping.profile, e);
            }
        }

        self.core.clear_callback();
        self.core.flush();
        configuration.power = None;
        log::info!("UVC endpoint stopped streaming");
        Ok(())
    }
}

fn raw_frame_callback(
    core: Weak<EndpointCore>,
    mapping: RequestMapping,
    reader: SharedReader,
) -> RawFrameCallback {
    Box::new(move |raw: &[u8]| {
        let Some(core) = core.upgrade() else {
            return;
        };
        if !core.is_streaming() {
            return;
        }

        let (timestamp, frame_counter) = {
            let mut reader = reader.lock();
            if !reader.validate_frame(&mapping, raw) {
                return;
            }
            (
                reader.get_frame_timestamp(&mapping, raw),
                reader.get_frame_counter(&mapping, raw),
            )
        };

        let metadata = FrameMetadata {
            stream: mapping.request.stream,
            format: mapping.format.format,
            width: mapping.profile.width,
            height: mapping.profile.height,
            fps: mapping.profile.fps,
            timestamp,
            frame_counter,
            system_time: SystemTime::now(),
        };
        core.publish_frame(metadata, mapping.image_size(), raw);
    })
}

impl Endpoint for UvcEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn init_stream_profiles(&self) -> Result<Vec<DeviceProfile>> {
        self.invoke_powered(|dev| dev.get_profiles())
    }

    fn get_principal_requests(&self) -> Result<Vec<StreamProfile>> {
        let profiles = self.get_stream_profiles()?;
        Ok(self.core.principal_requests(profiles))
    }

    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let mut configuration = self.configuration.lock();
        ensure(!self.core.is_opened(), EndpointError::AlreadyOpened)?;

        let mapping = self.resolve_requests(requests)?;
        let readers = self.new_readers(mapping.len());
        configuration.streams = mapping
            .into_iter()
            .zip(readers)
            .map(|(mapping, reader)| ConfiguredStream {
                mapping,
                reader: Arc::new(Mutex::new(reader)),
            })
            .collect();
        self.core.set_opened(true);

        log::info!(
            "UVC endpoint opened with {} stream(s)",
            configuration.streams.len()
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut configuration = self.configuration.lock();
        if !self.core.is_opened() {
            return Ok(());
        }
        if self.core.is_streaming() {
            self.stop_locked(&mut configuration)?;
        }

        configuration.streams.clear();
        self.core.set_opened(false);
        log::info!("UVC endpoint closed");
        Ok(())
    }

    fn start_streaming(&self, callback: FrameCallback) -> Result<()> {
        let mut configuration = self.configuration.lock();
        ensure(!self.core.is_streaming(), EndpointError::AlreadyStreaming)?;
        ensure(self.core.is_opened(), EndpointError::NotOpened)?;

        let on = PowerGuard::acquire(&self.power)?;
        self.core.set_callback(callback);
        self.core.set_streaming(true);

        if let Err(e) = self.commit(&configuration.streams) {
            self.core.set_streaming(false);
            self.core.clear_callback();
            self.core.flush();
            return Err(e);
        }

        configuration.power = Some(on);
        log::info!("UVC endpoint streaming");
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let mut configuration = self.configuration.lock();
        self.stop_locked(&mut configuration)
    }
}

impl Drop for UvcEndpoint {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close UVC endpoint on drop: {}", e);
        }
    }
}

fn upgrade(power: &Weak<PowerDomain>) -> Result<Arc<PowerDomain>> {
    power.upgrade().ok_or(EndpointError::EndpointReleased)
}

/// Processing-unit control (brightness, gain, ...) read through the driver.
struct UvcPuOption {
    power: Weak<PowerDomain>,
    id: OptionId,
}

impl CameraOption for UvcPuOption {
    fn query(&self) -> Result<f32> {
        let value = upgrade(&self.power)?.invoke_powered(|dev| dev.get_pu(self.id))?;
        Ok(value as f32)
    }

    fn set(&self, value: f32) -> Result<()> {
        upgrade(&self.power)?.invoke_powered(|dev| dev.set_pu(self.id, value.round() as i32))
    }

    fn range(&self) -> Result<OptionRange> {
        let range = upgrade(&self.power)?.invoke_powered(|dev| dev.get_pu_range(self.id))?;
        Ok(range.into())
    }
}

/// Little-endian 32-bit extension-unit control.
struct UvcXuOption {
    power: Weak<PowerDomain>,
    xu: ExtensionUnit,
    control: u8,
}

impl CameraOption for UvcXuOption {
    fn query(&self) -> Result<f32> {
        let data = upgrade(&self.power)?.invoke_powered(|dev| dev.get_xu(&self.xu, self.control, 4))?;
        let bytes: [u8; 4] = data.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(|| {
            EndpointError::device(format!(
                "extension unit control {} returned {} bytes",
                self.control,
                data.len()
            ))
        })?;
        Ok(i32::from_le_bytes(bytes) as f32)
    }

    fn set(&self, value: f32) -> Result<()> {
        let data = (value.round() as i32).to_le_bytes();
        upgrade(&self.power)?.invoke_powered(|dev| dev.set_xu(&self.xu, self.control, &data))
    }

    fn range(&self) -> Result<OptionRange> {
        let range =
            upgrade(&self.power)?.invoke_powered(|dev| dev.get_xu_range(&self.xu, self.control))?;
        Ok(range.into())
    }
}
