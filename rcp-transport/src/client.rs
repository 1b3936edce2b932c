use async_trait::async_trait;

use crate::error::TransportError;

/// Parsed `/system/resource` sample, however it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub cpu_load_percent: f64,
    pub free_memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub uptime_seconds: u64,
}

impl ResourceSample {
    pub fn memory_used_percent(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        let used = self.total_memory_bytes.saturating_sub(self.free_memory_bytes);
        (used as f64 / self.total_memory_bytes as f64) * 100.0
    }
}

/// A scoped handle to a device's REST API. The core uses only `/rest/system/resource`
/// and `/rest/system/identity`; all other paths belong to per-topic services.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn get_system_resource(&self) -> Result<ResourceSample, TransportError>;
    async fn get_system_identity(&self) -> Result<String, TransportError>;
}

/// A scoped handle to a device's shell. The core uses only the allow-listed
/// vocabulary `/system/resource/print` and `/export hide-sensitive compact`.
#[async_trait]
pub trait ShellClient: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, TransportError>;

    async fn system_resource_print(&self) -> Result<String, TransportError> {
        self.run("/system/resource/print").await
    }

    async fn export_hide_sensitive_compact(&self) -> Result<String, TransportError> {
        self.run("/export hide-sensitive compact").await
    }
}

/// Parses RouterOS `key: value` shell output (including `MiB/GiB/KiB`
/// suffixes) into a [`ResourceSample`].
pub fn parse_resource_print(output: &str) -> Result<ResourceSample, TransportError> {
    let mut cpu_load_percent = 0.0;
    let mut free_memory_bytes = 0u64;
    let mut total_memory_bytes = 0u64;
    let mut uptime_seconds = 0u64;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "cpu-load" => {
                cpu_load_percent = value.trim_end_matches('%').trim().parse().unwrap_or(0.0);
            }
            "free-memory" => free_memory_bytes = parse_memory_value(value),
            "total-memory" => total_memory_bytes = parse_memory_value(value),
            "uptime" => uptime_seconds = parse_uptime_value(value),
            _ => {}
        }
    }

    Ok(ResourceSample {
        cpu_load_percent,
        free_memory_bytes,
        total_memory_bytes,
        uptime_seconds,
    })
}

fn parse_memory_value(value: &str) -> u64 {
    let value = value.trim();
    let (number_part, multiplier) = if let Some(n) = value.strip_suffix("GiB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("MiB") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("KiB") {
        (n, 1024)
    } else {
        (value, 1)
    };
    number_part.trim().parse::<f64>().map(|n| (n * multiplier as f64) as u64).unwrap_or(0)
}

fn parse_uptime_value(value: &str) -> u64 {
    // RouterOS formats as e.g. "1w2d3h4m5s"; parse each numeric+unit pair.
    let mut total = 0u64;
    let mut current = String::new();
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else {
            let n: u64 = current.parse().unwrap_or(0);
            current.clear();
            total += match ch {
                'w' => n * 604_800,
                'd' => n * 86_400,
                'h' => n * 3600,
                'm' => n * 60,
                's' => n,
                _ => 0,
            };
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_with_mib_suffix() {
        assert_eq!(parse_memory_value("128MiB"), 128 * 1024 * 1024);
    }

    #[test]
    fn parses_uptime_compound() {
        assert_eq!(parse_uptime_value("1d2h3m"), 86_400 + 2 * 3600 + 3 * 60);
    }

    #[test]
    fn parses_full_resource_print_block() {
        let output = "cpu-load: 12%\nfree-memory: 64MiB\ntotal-memory: 256MiB\nuptime: 2h30m\n";
        let sample = parse_resource_print(output).unwrap();
        assert_eq!(sample.cpu_load_percent, 12.0);
        assert_eq!(sample.free_memory_bytes, 64 * 1024 * 1024);
        assert_eq!(sample.total_memory_bytes, 256 * 1024 * 1024);
        assert_eq!(sample.uptime_seconds, 2 * 3600 + 30 * 60);
    }
}
