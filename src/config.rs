/// Default divisor turning accumulated rolling-counter ticks into timestamps.
pub const DEFAULT_TIMESTAMP_SCALE: f64 = 100_000.0;

/// Default number of frames that may be outstanding from the default archive.
pub const DEFAULT_MAX_PUBLISH_LIST_SIZE: usize = 16;

const ENV_TIMESTAMP_SCALE: &str = "CAMERA_ENDPOINT_TIMESTAMP_SCALE";
const ENV_MAX_PUBLISH_LIST_SIZE: &str = "CAMERA_ENDPOINT_MAX_PUBLISH_LIST_SIZE";

/// Tunables shared by all endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Hardware tick rate divisor used by the rolling timestamp reader.
    pub timestamp_scale: f64,
    /// Capacity of the default [`BoundedArchive`](crate::archive::BoundedArchive).
    pub max_publish_list_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            timestamp_scale: DEFAULT_TIMESTAMP_SCALE,
            max_publish_list_size: DEFAULT_MAX_PUBLISH_LIST_SIZE,
        }
    }
}

impl EndpointConfig {
    /// Defaults overridden by `CAMERA_ENDPOINT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timestamp_scale = read_env_f64(ENV_TIMESTAMP_SCALE, defaults.timestamp_scale);
        let max_publish_list_size =
            read_env_usize(ENV_MAX_PUBLISH_LIST_SIZE, defaults.max_publish_list_size);

        Self {
            timestamp_scale: if timestamp_scale > 0.0 {
                timestamp_scale
            } else {
                log::warn!(
                    "{}={} is not positive, using {}",
                    ENV_TIMESTAMP_SCALE,
                    timestamp_scale,
                    defaults.timestamp_scale
                );
                defaults.timestamp_scale
            },
            max_publish_list_size: max_publish_list_size.max(1),
        }
    }
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<f64>().unwrap_or_else(|_| {
            log::warn!("Ignoring {}='{}' (expected a number)", name, v);
            default
        }),
        Err(_) => default,
    }
}

fn read_env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<usize>().unwrap_or_else(|_| {
            log::warn!("Ignoring {}='{}' (expected a count)", name, v);
            default
        }),
        Err(_) => default,
    }
}
