use std::fmt;

/// Logical stream kind a consumer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    Depth,
    Color,
    Infrared,
    Infrared2,
    Fisheye,
    Gyro,
    Accel,
}

impl StreamKind {
    /// The single-member set for this stream kind.
    pub fn as_set(self) -> StreamSet {
        match self {
            StreamKind::Depth => StreamSet::DEPTH,
            StreamKind::Color => StreamSet::COLOR,
            StreamKind::Infrared => StreamSet::INFRARED,
            StreamKind::Infrared2 => StreamSet::INFRARED2,
            StreamKind::Fisheye => StreamSet::FISHEYE,
            StreamKind::Gyro => StreamSet::GYRO,
            StreamKind::Accel => StreamSet::ACCEL,
        }
    }

    pub fn is_motion(self) -> bool {
        matches!(self, StreamKind::Gyro | StreamKind::Accel)
    }
}

bitflags::bitflags! {
    /// Set of logical stream kinds a native format can produce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamSet: u32 {
        const DEPTH     = 1 << 0;
        const COLOR     = 1 << 1;
        const INFRARED  = 1 << 2;
        const INFRARED2 = 1 << 3;
        const FISHEYE   = 1 << 4;
        const GYRO      = 1 << 5;
        const ACCEL     = 1 << 6;
    }
}

impl StreamSet {
    pub fn covers(self, stream: StreamKind) -> bool {
        self.contains(stream.as_set())
    }
}

/// Logical pixel or motion format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    /// Wildcard: any format is acceptable.
    Any,
    Z16,
    Disparity16,
    Yuyv,
    Rgb8,
    Bgr8,
    Rgba8,
    Y8,
    Y16,
    Raw10,
    Raw16,
    MotionData,
    MotionXyz32f,
}

/// A logical stream request or offer.
///
/// Zero `width`, `height` or `fps`, and [`Format::Any`], act as wildcards when
/// the profile is used as a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamProfile {
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: Format,
}

impl StreamProfile {
    pub fn new(stream: StreamKind, width: u32, height: u32, fps: u32, format: Format) -> Self {
        Self {
            stream,
            width,
            height,
            fps,
            format,
        }
    }

    /// Request for `stream` with every other field left open.
    pub fn any(stream: StreamKind) -> Self {
        Self::new(stream, 0, 0, 0, Format::Any)
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}x{}@{} {:?}",
            self.stream, self.width, self.height, self.fps, self.format
        )
    }
}

/// Extrinsic placement of an endpoint relative to the device origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// 3x3 row-major rotation matrix.
    pub rotation: [[f32; 3]; 3],
    /// Translation in meters [x, y, z].
    pub translation: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }
}

/// Identifier of a configurable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionId {
    BacklightCompensation,
    Brightness,
    Contrast,
    Exposure,
    Gain,
    Gamma,
    Hue,
    Saturation,
    Sharpness,
    WhiteBalance,
    EnableAutoExposure,
    EnableAutoWhiteBalance,
    /// Vendor-specific control, usually backed by an extension unit.
    Custom(u32),
}

/// Valid range of an option value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

/// Identifier of a descriptive string attached to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraInfo {
    Name,
    SerialNumber,
    FirmwareVersion,
    Location,
    ProductId,
    DebugOpCode,
    AdvancedMode,
    CameraLocked,
}
