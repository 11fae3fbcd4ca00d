use crate::types::{Format, StreamKind, StreamProfile, StreamSet};
use crate::{EndpointError, Result};
use std::collections::BTreeSet;

/// Build a little-endian FourCC code, e.g. `fourcc(b"YUY2")`.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Render a FourCC code for log output.
pub fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// A profile exactly as the hardware reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: u32,
}

impl DeviceProfile {
    pub fn new(width: u32, height: u32, fps: u32, fourcc: u32) -> Self {
        Self {
            width,
            height,
            fps,
            fourcc,
        }
    }

    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether the request's fixed dimensions and rate match this profile.
    fn fits(&self, request: &StreamProfile) -> bool {
        (request.width == 0 || request.width == self.width)
            && (request.height == 0 || request.height == self.height)
            && (request.fps == 0 || request.fps == self.fps)
    }
}

/// A format the hardware can produce, and the logical streams it satisfies.
#[derive(Debug, Clone)]
pub struct NativeFormat {
    pub fourcc: u32,
    pub format: Format,
    pub streams: StreamSet,
    /// Payload size in bytes for a `width` x `height` image.
    pub image_size: fn(u32, u32) -> usize,
}

impl NativeFormat {
    pub fn new(
        fourcc: u32,
        format: Format,
        streams: StreamSet,
        image_size: fn(u32, u32) -> usize,
    ) -> Self {
        Self {
            fourcc,
            format,
            streams,
            image_size,
        }
    }

    pub fn satisfies(&self, request: &StreamProfile) -> bool {
        self.streams.covers(request.stream)
            && (request.format == Format::Any || request.format == self.format)
    }

    pub fn image_size(&self, width: u32, height: u32) -> usize {
        (self.image_size)(width, height)
    }
}

pub fn size_8bpp(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

pub fn size_16bpp(width: u32, height: u32) -> usize {
    width as usize * height as usize * 2
}

pub fn size_24bpp(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

pub fn size_32bpp(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Four 10-bit pixels packed into five bytes.
pub fn size_10bpp_packed(width: u32, height: u32) -> usize {
    width as usize * height as usize * 5 / 4
}

/// A logical request resolved onto a native format and device profile.
#[derive(Debug, Clone)]
pub struct RequestMapping {
    pub request: StreamProfile,
    pub format: NativeFormat,
    pub profile: DeviceProfile,
}

impl RequestMapping {
    pub fn image_size(&self) -> usize {
        self.format.image_size(self.profile.width, self.profile.height)
    }

    /// Stream kind delivered by this mapping.
    pub fn stream(&self) -> StreamKind {
        self.request.stream
    }
}

/// Resolve each request, in order, against `formats` and `profiles`.
///
/// Formats are tried in registration order. Within the first format that can
/// serve the request, the matching device profile with the largest area wins,
/// then the highest rate, then the earliest one reported.
pub fn resolve_requests(
    formats: &[NativeFormat],
    profiles: &[DeviceProfile],
    requests: &[StreamProfile],
) -> Result<Vec<RequestMapping>> {
    requests
        .iter()
        .map(|request| {
            formats
                .iter()
                .filter(|pf| pf.satisfies(request))
                .find_map(|pf| {
                    best_profile(pf, profiles, request).map(|profile| RequestMapping {
                        request: *request,
                        format: pf.clone(),
                        profile,
                    })
                })
                .ok_or(EndpointError::UnsupportedRequest(*request))
        })
        .collect()
}

fn best_profile(
    pf: &NativeFormat,
    profiles: &[DeviceProfile],
    request: &StreamProfile,
) -> Option<DeviceProfile> {
    let mut best: Option<&DeviceProfile> = None;
    for p in profiles
        .iter()
        .filter(|p| p.fourcc == pf.fourcc && p.fits(request))
    {
        best = match best {
            Some(b) if (b.area(), b.fps) >= (p.area(), p.fps) => Some(b),
            _ => Some(p),
        };
    }
    best.copied()
}

/// First registered format whose FourCC matches the device profile.
pub fn try_get_pf<'a>(formats: &'a [NativeFormat], profile: &DeviceProfile) -> Option<&'a NativeFormat> {
    formats.iter().find(|pf| pf.fourcc == profile.fourcc)
}

/// Every logical profile the device profiles can serve, widest first.
pub fn principal_requests(
    formats: &[NativeFormat],
    profiles: &[DeviceProfile],
) -> Vec<StreamProfile> {
    let mut results = BTreeSet::new();
    let mut unregistered = BTreeSet::new();

    for p in profiles {
        match try_get_pf(formats, p) {
            Some(pf) => {
                for stream in ALL_STREAMS.iter().filter(|s| pf.streams.covers(**s)) {
                    results.insert(StreamProfile::new(
                        *stream, p.width, p.height, p.fps, pf.format,
                    ));
                }
            }
            None => {
                unregistered.insert(p.fourcc);
            }
        }
    }

    if !unregistered.is_empty() {
        let names: Vec<String> = unregistered.iter().map(|c| fourcc_to_string(*c)).collect();
        log::warn!("Device reports unregistered formats: {}", names.join(", "));
    }

    let mut results: Vec<StreamProfile> = results.into_iter().collect();
    results.sort_by(|a, b| b.width.cmp(&a.width));
    results
}

const ALL_STREAMS: [StreamKind; 7] = [
    StreamKind::Depth,
    StreamKind::Color,
    StreamKind::Infrared,
    StreamKind::Infrared2,
    StreamKind::Fisheye,
    StreamKind::Gyro,
    StreamKind::Accel,
];
