//! Runtime-switchable debug zones layered over `tracing`.
//!
//! Each subsystem logs under a zone bit; the active mask comes from the
//! `VF_ZONE_MASK` environment variable, either as a hex bitmask
//! (`VF_ZONE_MASK=0x30`) or a comma list of zone names
//! (`VF_ZONE_MASK=graph,delay`). Errors bypass the mask entirely and go
//! straight to `tracing::error!`.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Zone {
    Api = 0,
    Context = 1,
    Reference = 2,
    Memory = 3,
    Graph = 4,
    Node = 5,
    Kernel = 6,
    Delay = 7,
    Target = 8,
    Perf = 9,
    Warning = 10,
}

impl Zone {
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    fn from_name(name: &str) -> Option<Zone> {
        match name.trim().to_ascii_lowercase().as_str() {
            "api" => Some(Zone::Api),
            "context" => Some(Zone::Context),
            "reference" => Some(Zone::Reference),
            "memory" => Some(Zone::Memory),
            "graph" => Some(Zone::Graph),
            "node" => Some(Zone::Node),
            "kernel" => Some(Zone::Kernel),
            "delay" => Some(Zone::Delay),
            "target" => Some(Zone::Target),
            "perf" => Some(Zone::Perf),
            "warning" => Some(Zone::Warning),
            _ => None,
        }
    }
}

static ZONE_MASK: AtomicU32 = AtomicU32::new(0);

/// Parse a mask spec: hex literal (`0x1f`) or comma-separated zone names.
/// Unknown names are ignored.
pub fn parse_zone_mask(spec: &str) -> u32 {
    let spec = spec.trim();
    if let Some(hex) = spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).unwrap_or(0);
    }
    spec.split(',')
        .filter_map(Zone::from_name)
        .fold(0, |mask, z| mask | z.bit())
}

/// Load the mask from `VF_ZONE_MASK`, if set.
pub fn init_from_env() {
    if let Ok(spec) = std::env::var("VF_ZONE_MASK") {
        ZONE_MASK.store(parse_zone_mask(&spec), Ordering::Relaxed);
    }
}

pub fn set_zone(zone: Zone) {
    ZONE_MASK.fetch_or(zone.bit(), Ordering::Relaxed);
}

pub fn clear_zone(zone: Zone) {
    ZONE_MASK.fetch_and(!zone.bit(), Ordering::Relaxed);
}

pub fn zone_enabled(zone: Zone) -> bool {
    ZONE_MASK.load(Ordering::Relaxed) & zone.bit() != 0
}

/// Zone-gated debug logging.
macro_rules! zlog {
    ($zone:expr, $($arg:tt)*) => {
        if $crate::core::zones::zone_enabled($zone) {
            ::tracing::debug!($($arg)*);
        }
    };
}
pub(crate) use zlog;
