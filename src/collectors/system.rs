use sysinfo::{System, SystemExt};

pub const UNKNOWN_HOST: &str = "unknown";

pub fn host_name() -> String {
    let system = System::new();
    system
        .host_name()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}
