use std::path::PathBuf;

/// Source of the "available system memory" figure used by the
/// low-memory check.
pub trait MemoryMonitor: Send + Sync {
    /// `None` when the platform gives no answer.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from a Linux-style meminfo file.
#[derive(Debug, Clone)]
pub struct MeminfoMonitor {
    path: PathBuf,
}

impl MeminfoMonitor {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for MeminfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for MeminfoMonitor {
    fn available_bytes(&self) -> Option<u64> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_mem_available(&content),
            Err(e) => {
                log::debug!("Cannot read {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let mut fields = line["MemAvailable:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    let multiplier = match fields.next() {
        Some("kB") | Some("KB") => 1024,
        Some("mB") | Some("MB") => 1024 * 1024,
        _ => 1,
    };
    Some(value * multiplier)
}

/// Reports a fixed figure. Used by tests and on platforms with no probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMemory(pub Option<u64>);

impl MemoryMonitor for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        self.0
    }
}
