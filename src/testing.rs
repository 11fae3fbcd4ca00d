//! Mock devices and archives shared by the unit tests.

use crate::archive::{BoundedArchive, Frame, FrameArchive, FrameMetadata};
use crate::hid::{HidCallback, HidDevice, HidSensor, SensorData};
use crate::power::PowerState;
use crate::profile::DeviceProfile;
use crate::types::{Format, OptionId, StreamKind};
use crate::uvc::{ControlRange, ExtensionUnit, RawFrameCallback, UvcDevice};
use crate::{EndpointError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn metadata() -> FrameMetadata {
    FrameMetadata {
        stream: StreamKind::Depth,
        format: Format::Z16,
        width: 4,
        height: 2,
        fps: 30,
        timestamp: 0.0,
        frame_counter: 1,
        system_time: SystemTime::now(),
    }
}

/// Bounded archive that also counts successful allocations.
pub(crate) struct CountingArchive {
    inner: BoundedArchive,
    allocated: AtomicUsize,
}

impl CountingArchive {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedArchive::new(capacity),
            allocated: AtomicUsize::new(0),
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.outstanding()
    }

    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }
}

impl FrameArchive for CountingArchive {
    fn allocate(&self, size: usize, metadata: FrameMetadata) -> Result<Frame> {
        let frame = self.inner.allocate(size, metadata)?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }
}

type SharedRawCallback = Arc<Mutex<RawFrameCallback>>;

struct UvcState {
    power: PowerState,
    fail_power_on: bool,
    fail_commit_at: Option<usize>,
    committed: Vec<(DeviceProfile, SharedRawCallback)>,
    streaming: bool,
    pu: HashMap<OptionId, i32>,
    xu: HashMap<(u8, u8), Vec<u8>>,
}

/// In-memory UVC device that records power transitions and misuse.
pub(crate) struct MockUvcDevice {
    profiles: Vec<DeviceProfile>,
    state: Mutex<UvcState>,
    power_ons: AtomicUsize,
    power_offs: AtomicUsize,
    violations: AtomicUsize,
    profile_queries: AtomicUsize,
    xu_inits: AtomicUsize,
}

impl MockUvcDevice {
    pub(crate) fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self {
            profiles,
            state: Mutex::new(UvcState {
                power: PowerState::D3,
                fail_power_on: false,
                fail_commit_at: None,
                committed: Vec::new(),
                streaming: false,
                pu: HashMap::new(),
                xu: HashMap::new(),
            }),
            power_ons: AtomicUsize::new(0),
            power_offs: AtomicUsize::new(0),
            violations: AtomicUsize::new(0),
            profile_queries: AtomicUsize::new(0),
            xu_inits: AtomicUsize::new(0),
        }
    }

    pub(crate) fn power_ons(&self) -> usize {
        self.power_ons.load(Ordering::SeqCst)
    }

    pub(crate) fn power_offs(&self) -> usize {
        self.power_offs.load(Ordering::SeqCst)
    }

    /// Redundant transitions plus device access while suspended.
    pub(crate) fn power_violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn profile_queries(&self) -> usize {
        self.profile_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn xu_inits(&self) -> usize {
        self.xu_inits.load(Ordering::SeqCst)
    }

    pub(crate) fn power_state(&self) -> PowerState {
        self.state.lock().power
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Number of profiles currently committed.
    pub(crate) fn committed(&self) -> usize {
        self.state.lock().committed.len()
    }

    pub(crate) fn fail_power_on(&self, fail: bool) {
        self.state.lock().fail_power_on = fail;
    }

    /// Fail the commit that would bring the committed count past `index`.
    pub(crate) fn fail_commit_at(&self, index: usize) {
        self.state.lock().fail_commit_at = Some(index);
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_power_on = false;
        state.fail_commit_at = None;
    }

    /// Deliver a raw buffer to the callback committed for `profile`.
    pub(crate) fn emit(&self, profile: &DeviceProfile, data: &[u8]) {
        let callback = self
            .state
            .lock()
            .committed
            .iter()
            .find(|(p, _)| p == profile)
            .map(|(_, cb)| cb.clone());
        if let Some(callback) = callback {
            let mut callback = callback.lock();
            (*callback)(data);
        }
    }

    fn check_powered(&self, state: &UvcState) -> Result<()> {
        if state.power == PowerState::D3 {
            self.violations.fetch_add(1, Ordering::SeqCst);
            return Err(EndpointError::device("device is suspended"));
        }
        Ok(())
    }
}

impl UvcDevice for MockUvcDevice {
    fn set_power_state(&self, target: PowerState) -> Result<()> {
        let mut state = self.state.lock();
        if state.power == target {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        match target {
            PowerState::D0 => {
                if state.fail_power_on {
                    return Err(EndpointError::device("power-on refused"));
                }
                self.power_ons.fetch_add(1, Ordering::SeqCst);
            }
            PowerState::D3 => {
                self.power_offs.fetch_add(1, Ordering::SeqCst);
            }
        }
        state.power = target;
        Ok(())
    }

    fn get_profiles(&self) -> Result<Vec<DeviceProfile>> {
        self.check_powered(&self.state.lock())?;
        self.profile_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.clone())
    }

    fn probe_and_commit(&self, profile: &DeviceProfile, callback: RawFrameCallback) -> Result<()> {
        let mut state = self.state.lock();
        self.check_powered(&state)?;
        if state.fail_commit_at == Some(state.committed.len()) {
            return Err(EndpointError::device("probe/commit rejected"));
        }
        state
            .committed
            .push((*profile, Arc::new(Mutex::new(callback))));
        Ok(())
    }

    fn stream_on(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.check_powered(&state)?;
        state.streaming = true;
        Ok(())
    }

    fn close(&self, profile: &DeviceProfile) -> Result<()> {
        let mut state = self.state.lock();
        state.committed.retain(|(p, _)| p != profile);
        if state.committed.is_empty() {
            state.streaming = false;
        }
        Ok(())
    }

    fn init_xu(&self, _xu: &ExtensionUnit) -> Result<()> {
        self.check_powered(&self.state.lock())?;
        self.xu_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_xu(&self, xu: &ExtensionUnit, control: u8, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        self.check_powered(&state)?;
        Ok(state
            .xu
            .get(&(xu.unit, control))
            .cloned()
            .unwrap_or_else(|| vec![0; len]))
    }

    fn set_xu(&self, xu: &ExtensionUnit, control: u8, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        self.check_powered(&state)?;
        state.xu.insert((xu.unit, control), data.to_vec());
        Ok(())
    }

    fn get_xu_range(&self, _xu: &ExtensionUnit, _control: u8) -> Result<ControlRange> {
        self.check_powered(&self.state.lock())?;
        Ok(ControlRange {
            min: 0,
            max: 255,
            step: 1,
            default: 0,
        })
    }

    fn get_pu(&self, option: OptionId) -> Result<i32> {
        let state = self.state.lock();
        self.check_powered(&state)?;
        Ok(state.pu.get(&option).copied().unwrap_or(0))
    }

    fn set_pu(&self, option: OptionId, value: i32) -> Result<()> {
        let mut state = self.state.lock();
        self.check_powered(&state)?;
        state.pu.insert(option, value);
        Ok(())
    }

    fn get_pu_range(&self, _option: OptionId) -> Result<ControlRange> {
        self.check_powered(&self.state.lock())?;
        Ok(ControlRange {
            min: 0,
            max: 255,
            step: 1,
            default: 128,
        })
    }
}

/// In-memory HID sensor hub.
pub(crate) struct MockHidDevice {
    sensors: Vec<HidSensor>,
    open: Mutex<bool>,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    fail_capture: Mutex<bool>,
    capture: Mutex<Option<(Vec<i32>, Arc<Mutex<HidCallback>>)>>,
}

impl MockHidDevice {
    pub(crate) fn new(sensors: Vec<HidSensor>) -> Self {
        Self {
            sensors,
            open: Mutex::new(false),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            fail_capture: Mutex::new(false),
            capture: Mutex::new(None),
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock()
    }

    pub(crate) fn fail_start_capture(&self, fail: bool) {
        *self.fail_capture.lock() = fail;
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Channels passed to the running capture.
    pub(crate) fn capture_channels(&self) -> Vec<i32> {
        self.capture
            .lock()
            .as_ref()
            .map(|(iio, _)| iio.clone())
            .unwrap_or_default()
    }

    /// Deliver a report from the sensor on channel `iio`.
    pub(crate) fn emit(&self, iio: i32, data: &[u8]) {
        let Some(sensor) = self.sensors.iter().find(|s| s.iio == iio) else {
            return;
        };
        let callback = self.capture.lock().as_ref().map(|(_, cb)| cb.clone());
        if let Some(callback) = callback {
            let mut callback = callback.lock();
            (*callback)(SensorData { sensor, data });
        }
    }
}

impl HidDevice for MockHidDevice {
    fn open(&self) -> Result<()> {
        *self.open.lock() = true;
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.open.lock() = false;
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_sensors(&self) -> Result<Vec<HidSensor>> {
        if !self.is_open() {
            return Err(EndpointError::device("sensor hub is closed"));
        }
        Ok(self.sensors.clone())
    }

    fn start_capture(&self, sensor_iio: &[i32], callback: HidCallback) -> Result<()> {
        if !self.is_open() {
            return Err(EndpointError::device("sensor hub is closed"));
        }
        if *self.fail_capture.lock() {
            return Err(EndpointError::device("capture refused"));
        }
        *self.capture.lock() = Some((sensor_iio.to_vec(), Arc::new(Mutex::new(callback))));
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.capture.lock().take();
        Ok(())
    }
}
