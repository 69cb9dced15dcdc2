//! Host load sampling

use sysinfo::System;

/// Host load at one point in time
#[derive(Debug, Clone, Copy)]
pub struct HostLoad {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,

    /// Memory usage percentage
    pub memory_percent: f32,
}

/// Sample CPU and memory usage
///
/// CPU usage needs two refreshes separated by the sysinfo minimum interval.
pub async fn sample_host_load() -> HostLoad {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    HostLoad {
        cpu_usage: sys.global_cpu_usage(),
        memory_percent: memory_percent(sys.used_memory(), sys.total_memory()),
    }
}

fn memory_percent(used: u64, total: u64) -> f32 {
    if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}
