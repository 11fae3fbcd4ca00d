//! Shared endpoint state and the contract every endpoint variant implements.

use crate::archive::{BoundedArchive, Frame, FrameArchive, FrameMetadata};
use crate::config::EndpointConfig;
use crate::profile::{self, DeviceProfile, NativeFormat, RequestMapping};
use crate::registry::{CameraOption, InfoRegistry, OptionRegistry};
use crate::types::{CameraInfo, OptionId, Pose, StreamProfile};
use crate::{EndpointError, Result};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consumer callback receiving every delivered frame.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

#[derive(Default)]
struct Dispatch {
    callback: Option<FrameCallback>,
    in_flight: usize,
}

/// State shared by every endpoint variant: status flags, registries, the
/// consumer callback and the frame publishing path.
pub struct EndpointCore {
    config: EndpointConfig,
    is_streaming: AtomicBool,
    is_opened: AtomicBool,
    dispatch: Mutex<Dispatch>,
    drained: Condvar,
    archive: Arc<dyn FrameArchive>,
    options: OptionRegistry,
    info: InfoRegistry,
    pixel_formats: RwLock<Vec<NativeFormat>>,
    stream_profiles: OnceCell<Vec<DeviceProfile>>,
    pose: RwLock<Pose>,
}

impl EndpointCore {
    /// Core allocating from a [`BoundedArchive`] sized by the config.
    pub fn new(config: EndpointConfig) -> Self {
        let archive = Arc::new(BoundedArchive::new(config.max_publish_list_size));
        Self::with_archive(config, archive)
    }

    pub fn with_archive(config: EndpointConfig, archive: Arc<dyn FrameArchive>) -> Self {
        Self {
            config,
            is_streaming: AtomicBool::new(false),
            is_opened: AtomicBool::new(false),
            dispatch: Mutex::new(Dispatch::default()),
            drained: Condvar::new(),
            archive,
            options: OptionRegistry::default(),
            info: InfoRegistry::default(),
            pixel_formats: RwLock::new(Vec::new()),
            stream_profiles: OnceCell::new(),
            pose: RwLock::new(Pose::default()),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::Acquire)
    }

    pub fn is_opened(&self) -> bool {
        self.is_opened.load(Ordering::Acquire)
    }

    /// Only variants flip the flags, and only while holding their configure lock.
    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.is_streaming.store(streaming, Ordering::Release);
    }

    pub(crate) fn set_opened(&self, opened: bool) {
        self.is_opened.store(opened, Ordering::Release);
    }

    /// Device profiles, computed by `init` on first access and cached.
    ///
    /// A failed initialisation is not cached; the next call retries.
    pub fn stream_profiles<F>(&self, init: F) -> Result<&[DeviceProfile]>
    where
        F: FnOnce() -> Result<Vec<DeviceProfile>>,
    {
        self.stream_profiles
            .get_or_try_init(init)
            .map(Vec::as_slice)
    }

    pub fn register_pixel_format(&self, pf: NativeFormat) {
        self.pixel_formats.write().push(pf);
    }

    pub fn try_get_pf(&self, profile: &DeviceProfile) -> Option<NativeFormat> {
        profile::try_get_pf(&self.pixel_formats.read(), profile).cloned()
    }

    pub fn resolve(
        &self,
        profiles: &[DeviceProfile],
        requests: &[StreamProfile],
    ) -> Result<Vec<RequestMapping>> {
        profile::resolve_requests(&self.pixel_formats.read(), profiles, requests)
    }

    pub fn principal_requests(&self, profiles: &[DeviceProfile]) -> Vec<StreamProfile> {
        profile::principal_requests(&self.pixel_formats.read(), profiles)
    }

    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    pub fn info(&self) -> &InfoRegistry {
        &self.info
    }

    pub fn set_pose(&self, pose: Pose) {
        *self.pose.write() = pose;
    }

    pub fn pose(&self) -> Pose {
        *self.pose.read()
    }

    /// Request a frame buffer from the archive.
    pub fn alloc_frame(&self, size: usize, metadata: FrameMetadata) -> Result<Frame> {
        self.archive.allocate(size, metadata)
    }

    pub(crate) fn set_callback(&self, callback: FrameCallback) {
        self.dispatch.lock().callback = Some(callback);
    }

    pub(crate) fn clear_callback(&self) {
        self.dispatch.lock().callback = None;
    }

    /// Deliver a frame to the installed callback.
    ///
    /// The callback is snapshotted under the dispatch lock and called outside
    /// it. Without a callback the frame is dropped back to its archive.
    pub fn invoke_callback(&self, frame: Frame) {
        let callback = {
            let mut dispatch = self.dispatch.lock();
            match dispatch.callback.clone() {
                Some(callback) => {
                    dispatch.in_flight += 1;
                    callback
                }
                None => {
                    log::trace!("No callback installed, releasing frame");
                    return;
                }
            }
        };

        let _in_flight = InFlight(self);
        callback(frame);
    }

    /// Block until no callback invocation is in flight.
    ///
    /// Must not be called from inside a frame callback.
    pub fn flush(&self) {
        let mut dispatch = self.dispatch.lock();
        while dispatch.in_flight > 0 {
            self.drained.wait(&mut dispatch);
        }
    }

    /// Allocate, fill and deliver a frame.
    ///
    /// Frames arriving while not streaming are discarded. An exhausted
    /// archive drops this frame only; streaming carries on.
    pub fn publish_frame(&self, metadata: FrameMetadata, size: usize, payload: &[u8]) {
        if !self.is_streaming() {
            return;
        }

        let stream = metadata.stream;
        let counter = metadata.frame_counter;
        let mut frame = match self.alloc_frame(size, metadata) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!(
                    "Dropped {:?} frame #{}: alloc_frame({}) failed: {}",
                    stream,
                    counter,
                    size,
                    e
                );
                return;
            }
        };

        let len = frame.data().len().min(payload.len());
        frame.data_mut()[..len].copy_from_slice(&payload[..len]);
        self.invoke_callback(frame);
    }
}

/// Marks one callback invocation as finished, even if the callback panics.
struct InFlight<'a>(&'a EndpointCore);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut dispatch = self.0.dispatch.lock();
        dispatch.in_flight -= 1;
        if dispatch.in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// A streaming capability of a physical device.
///
/// Variants supply device-specific profile discovery, open/close and
/// streaming; the shared state machine and registries live in
/// [`EndpointCore`].
pub trait Endpoint: Send + Sync {
    fn core(&self) -> &EndpointCore;

    /// Query the device for the profiles it can produce.
    fn init_stream_profiles(&self) -> Result<Vec<DeviceProfile>>;

    /// Logical profiles this endpoint can serve.
    fn get_principal_requests(&self) -> Result<Vec<StreamProfile>>;

    /// Reserve the hardware for `requests`.
    fn open(&self, requests: &[StreamProfile]) -> Result<()>;

    /// Release the reservation made by `open`. No-op when not opened.
    fn close(&self) -> Result<()>;

    fn start_streaming(&self, callback: FrameCallback) -> Result<()>;

    fn stop_streaming(&self) -> Result<()>;

    /// Device profiles, queried once and cached for the endpoint's lifetime.
    fn get_stream_profiles(&self) -> Result<&[DeviceProfile]> {
        self.core().stream_profiles(|| self.init_stream_profiles())
    }

    /// Map each request, in order, onto a registered format and device profile.
    fn resolve_requests(&self, requests: &[StreamProfile]) -> Result<Vec<RequestMapping>> {
        let profiles = self.get_stream_profiles()?;
        self.core().resolve(profiles, requests)
    }

    fn is_streaming(&self) -> bool {
        self.core().is_streaming()
    }

    fn is_opened(&self) -> bool {
        self.core().is_opened()
    }

    fn flush(&self) {
        self.core().flush()
    }

    fn register_pixel_format(&self, pf: NativeFormat) {
        self.core().register_pixel_format(pf)
    }

    fn register_option(&self, id: OptionId, option: Arc<dyn CameraOption>) {
        self.core().options().register(id, option)
    }

    fn get_option(&self, id: OptionId) -> Result<Arc<dyn CameraOption>> {
        self.core().options().get(id)
    }

    fn supports_option(&self, id: OptionId) -> bool {
        self.core().options().supports(id)
    }

    /// Ids of every registered option, in no particular order.
    fn supported_options(&self) -> Vec<OptionId> {
        self.core().options().ids()
    }

    fn register_info(&self, id: CameraInfo, value: &str) -> Result<()> {
        self.core().info().register(id, value)
    }

    fn get_info(&self, id: CameraInfo) -> Result<String> {
        self.core().info().get(id)
    }

    fn supports_info(&self, id: CameraInfo) -> bool {
        self.core().info().supports(id)
    }

    fn set_pose(&self, pose: Pose) {
        self.core().set_pose(pose)
    }

    fn get_pose(&self) -> Pose {
        self.core().pose()
    }
}

/// Reject a state transition whose preconditions are not met.
pub(crate) fn ensure(condition: bool, err: EndpointError) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(err)
    }
}
