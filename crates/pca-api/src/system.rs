//! Host metrics for `/api/status`
//!
//! CPU counts come from `num_cpus`; load and memory are read from `/proc`
//! and are absent on hosts without it.

use serde::Serialize;

const GIB_IN_KIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_count: usize,
    pub physical_cpus: usize,
    pub load_average: Option<[f64; 3]>,
    pub memory_total_gb: Option<f64>,
    pub memory_used_gb: Option<f64>,
    pub memory_percent: Option<f64>,
}

pub fn snapshot() -> SystemSnapshot {
    let load_average = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| parse_loadavg(&s));
    let memory = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_meminfo(&s));

    let (memory_total_gb, memory_used_gb, memory_percent) = match memory {
        Some((total, available)) if total > 0 => {
            let used = total.saturating_sub(available);
            (
                Some(round2(total as f64 / GIB_IN_KIB)),
                Some(round2(used as f64 / GIB_IN_KIB)),
                Some(round2(used as f64 * 100.0 / total as f64)),
            )
        }
        _ => (None, None, None),
    };

    SystemSnapshot {
        cpu_count: num_cpus::get(),
        physical_cpus: num_cpus::get_physical(),
        load_average,
        memory_total_gb,
        memory_used_gb,
        memory_percent,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// First three fields of `/proc/loadavg`
pub fn parse_loadavg(content: &str) -> Option<[f64; 3]> {
    let mut fields = content.split_whitespace().map(|f| f.parse::<f64>().ok());
    Some([fields.next()??, fields.next()??, fields.next()??])
}

/// `(MemTotal, MemAvailable)` in KiB
pub fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let field = |name: &str| {
        content
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };
    Some((field("MemTotal:")?, field("MemAvailable:")?))
}
