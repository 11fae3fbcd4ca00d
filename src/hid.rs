//! Motion endpoint backed by HID/IIO inertial sensors.

use crate::archive::{FrameArchive, FrameMetadata};
use crate::config::EndpointConfig;
use crate::endpoint::{ensure, Endpoint, EndpointCore, FrameCallback};
use crate::profile::{fourcc, DeviceProfile, NativeFormat};
use crate::types::{Format, StreamKind, StreamProfile};
use crate::{EndpointError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

pub const GYRO_FOURCC: u32 = fourcc(b"GYRO");
pub const ACCEL_FOURCC: u32 = fourcc(b"ACCL");

/// Known sensor names and the logical stream each one produces.
const SENSOR_STREAMS: [(&str, StreamKind, Format); 2] = [
    ("gyro_3d", StreamKind::Gyro, Format::MotionData),
    ("accel_3d", StreamKind::Accel, Format::MotionData),
];

/// A sensor reported by the HID device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidSensor {
    pub name: String,
    /// IIO channel index used to address the sensor.
    pub iio: i32,
}

impl HidSensor {
    pub fn new(name: impl Into<String>, iio: i32) -> Self {
        Self {
            name: name.into(),
            iio,
        }
    }
}

/// One report delivered by the sensor data pump.
#[derive(Debug)]
pub struct SensorData<'a> {
    pub sensor: &'a HidSensor,
    pub data: &'a [u8],
}

pub type HidCallback = Box<dyn FnMut(SensorData<'_>) + Send>;

/// Operations the HID sensor driver provides.
pub trait HidDevice: Send + Sync {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn get_sensors(&self) -> Result<Vec<HidSensor>>;

    /// Start pumping reports for the given IIO channels into `callback`.
    fn start_capture(&self, sensor_iio: &[i32], callback: HidCallback) -> Result<()>;

    fn stop_capture(&self) -> Result<()>;
}

fn sensor_stream_format(name: &str) -> Option<(StreamKind, Format)> {
    SENSOR_STREAMS
        .iter()
        .find(|(sensor, _, _)| *sensor == name)
        .map(|(_, stream, format)| (*stream, *format))
}

fn stream_fourcc(stream: StreamKind) -> Option<u32> {
    match stream {
        StreamKind::Gyro => Some(GYRO_FOURCC),
        StreamKind::Accel => Some(ACCEL_FOURCC),
        _ => None,
    }
}

/// Motion payloads are sized by each report, not by the profile.
fn motion_report_size(_width: u32, _height: u32) -> usize {
    0
}

/// Motion endpoint: the inertial sensor group of a physical device.
pub struct HidEndpoint {
    core: Arc<EndpointCore>,
    device: Arc<dyn HidDevice>,
    sensors: Vec<HidSensor>,
    configured_sensor_iio: Mutex<Vec<i32>>,
}

impl HidEndpoint {
    /// Enumerate the device's sensors, leaving it closed afterwards.
    pub fn new(device: Arc<dyn HidDevice>, config: EndpointConfig) -> Result<Self> {
        Self::from_core(device, EndpointCore::new(config))
    }

    pub fn with_archive(
        device: Arc<dyn HidDevice>,
        config: EndpointConfig,
        archive: Arc<dyn FrameArchive>,
    ) -> Result<Self> {
        Self::from_core(device, EndpointCore::with_archive(config, archive))
    }

    fn from_core(device: Arc<dyn HidDevice>, core: EndpointCore) -> Result<Self> {
        device.open()?;
        let sensors = device.get_sensors();
        let closed = device.close();
        let sensors = sensors?;
        closed?;

        log::debug!(
            "HID device reports sensors: {:?}",
            sensors.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        for (_, stream, format) in SENSOR_STREAMS {
            if let Some(code) = stream_fourcc(stream) {
                core.register_pixel_format(NativeFormat::new(
                    code,
                    format,
                    stream.as_set(),
                    motion_report_size,
                ));
            }
        }

        Ok(Self {
            core: Arc::new(core),
            device,
            sensors,
            configured_sensor_iio: Mutex::new(Vec::new()),
        })
    }

    pub fn sensors(&self) -> &[HidSensor] {
        &self.sensors
    }

    /// IIO channels selected by the last `open`.
    pub fn configured_sensor_iio(&self) -> Vec<i32> {
        self.configured_sensor_iio.lock().clone()
    }

    fn get_iio_by_name(&self, name: &str) -> Option<i32> {
        self.sensors.iter().find(|s| s.name == name).map(|s| s.iio)
    }

    fn stream_to_sensor_iio(&self, request: &StreamProfile) -> Result<i32> {
        ensure(
            request.stream.is_motion(),
            EndpointError::UnsupportedRequest(*request),
        )?;
        SENSOR_STREAMS
            .iter()
            .filter(|(_, stream, format)| {
                *stream == request.stream
                    && (request.format == Format::Any || request.format == *format)
            })
            .find_map(|(name, _, _)| self.get_iio_by_name(name))
            .ok_or(EndpointError::UnsupportedRequest(*request))
    }

    fn stop_locked(&self) -> Result<()> {
        ensure(self.core.is_streaming(), EndpointError::NotStreaming)?;
        self.core.set_streaming(false);

        let stopped = self.device.stop_capture();
        if let Err(e) = &stopped {
            log::warn!("HID stop_capture failed: {}", e);
        }
        self.core.clear_callback();
        self.core.flush();
        log::info!("HID endpoint stopped streaming");
        stopped
    }
}

fn sensor_callback(core: Weak<EndpointCore>) -> HidCallback {
    let started = Instant::now();
    let mut counters: HashMap<i32, u64> = HashMap::new();

    Box::new(move |report: SensorData<'_>| {
        let Some(core) = core.upgrade() else {
            return;
        };
        let Some((stream, format)) = sensor_stream_format(&report.sensor.name) else {
            log::trace!("Ignoring report from sensor {}", report.sensor.name);
            return;
        };

        let counter = counters.entry(report.sensor.iio).or_insert(0);
        *counter += 1;

        let size = report.data.len();
        let metadata = FrameMetadata {
            stream,
            format,
            width: u32::try_from(size).unwrap_or(u32::MAX),
            height: 1,
            fps: 0,
            timestamp: started.elapsed().as_secs_f64() * 1000.0,
            frame_counter: *counter,
            system_time: SystemTime::now(),
        };
        core.publish_frame(metadata, size, report.data);
    })
}

impl Endpoint for HidEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn init_stream_profiles(&self) -> Result<Vec<DeviceProfile>> {
        Ok(self
            .sensors
            .iter()
            .filter_map(|s| sensor_stream_format(&s.name))
            .filter_map(|(stream, _)| stream_fourcc(stream))
            .map(|code| DeviceProfile::new(0, 0, 0, code))
            .collect())
    }

    fn get_principal_requests(&self) -> Result<Vec<StreamProfile>> {
        Ok(self
            .sensors
            .iter()
            .filter_map(|s| {
                let mapped = sensor_stream_format(&s.name);
                if mapped.is_none() {
                    log::debug!("Skipping unrecognised sensor {}", s.name);
                }
                mapped
            })
            .map(|(stream, format)| StreamProfile::new(stream, 0, 0, 0, format))
            .collect())
    }

    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let mut configured = self.configured_sensor_iio.lock();
        ensure(!self.core.is_opened(), EndpointError::AlreadyOpened)?;

        let iio = requests
            .iter()
            .map(|r| self.stream_to_sensor_iio(r))
            .collect::<Result<Vec<_>>>()?;

        self.device.open()?;
        *configured = iio;
        self.core.set_opened(true);
        log::info!("HID endpoint opened with channels {:?}", *configured);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut configured = self.configured_sensor_iio.lock();
        if !self.core.is_opened() {
            return Ok(());
        }
        if self.core.is_streaming() {
            self.stop_locked()?;
        }

        self.device.close()?;
        configured.clear();
        self.core.set_opened(false);
        log::info!("HID endpoint closed");
        Ok(())
    }

    fn start_streaming(&self, callback: FrameCallback) -> Result<()> {
        let configured = self.configured_sensor_iio.lock();
        ensure(!self.core.is_streaming(), EndpointError::AlreadyStreaming)?;
        ensure(self.core.is_opened(), EndpointError::NotOpened)?;

        self.core.set_callback(callback);
        self.core.set_streaming(true);

        let pump = sensor_callback(Arc::downgrade(&self.core));
        if let Err(e) = self.device.start_capture(&configured, pump) {
            self.core.set_streaming(false);
            self.core.clear_callback();
            self.core.flush();
            return Err(e);
        }

        log::info!("HID endpoint streaming");
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let _configured = self.configured_sensor_iio.lock();
        self.stop_locked()
    }
}

impl Drop for HidEndpoint {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close HID endpoint on drop: {}", e);
        }
    }
}
