use std::fs;
use std::path::PathBuf;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Host resource readings that go into each telemetry snapshot.
pub trait SystemProbe {
    /// Bytes currently available to the agent.
    fn free_memory(&self) -> u64;
}

pub struct HostProbe {
    meminfo_path: PathBuf,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            meminfo_path: PathBuf::from(MEMINFO_PATH),
        }
    }
}

impl SystemProbe for HostProbe {
    fn free_memory(&self) -> u64 {
        match fs::read_to_string(&self.meminfo_path) {
            Ok(raw) => parse_mem_available(&raw).unwrap_or(0),
            Err(e) => {
                tracing::debug!(error = %e, "meminfo unavailable");
                0
            }
        }
    }
}

/// Extracts `MemAvailable` from /proc/meminfo, in bytes.
pub fn parse_mem_available(raw: &str) -> Option<u64> {
    raw.lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_available_in_bytes() {
        let sample = "MemTotal:       32768000 kB\nMemFree:         8192000 kB\nMemAvailable:   16384000 kB\n";
        assert_eq!(parse_mem_available(sample), Some(16_384_000 * 1024));
    }

    #[test]
    fn missing_field_yields_none() {
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn unreadable_meminfo_reports_zero() {
        let probe = HostProbe {
            meminfo_path: PathBuf::from("/nonexistent/meminfo"),
        };
        assert_eq!(probe.free_memory(), 0);
    }
}
