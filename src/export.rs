//! Prometheus textfile rendering.
//!
//! Builds a fresh registry per snapshot, sets every gauge once, and writes
//! the encoded text atomically so the node-exporter textfile collector never
//! scrapes a half-written file. Metric names and help strings are part of
//! the external contract (dashboards and alerts match on them verbatim,
//! historical misspellings included) and must not be edited.

use std::io::Write;
use std::path::Path;

use prometheus::{Gauge, Opts, Registry, TextEncoder};
use tempfile::NamedTempFile;

use crate::snapshot::MetricSnapshot;

/// Error writing the snapshot out.
#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Prometheus(prometheus::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(err) => write!(f, "writing metrics file: {}", err),
            ExportError::Prometheus(err) => write!(f, "encoding metrics: {}", err),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            ExportError::Prometheus(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<prometheus::Error> for ExportError {
    fn from(err: prometheus::Error) -> Self {
        ExportError::Prometheus(err)
    }
}

/// An unconfigured limit is published as `-1`, never as the raw sentinel.
fn limit_value(limit: Option<u32>) -> f64 {
    limit.map(f64::from).unwrap_or(-1.0)
}

fn register_gauge(
    registry: &Registry,
    name: &str,
    help: &str,
    value: f64,
) -> Result<(), prometheus::Error> {
    let gauge = Gauge::with_opts(Opts::new(name, help))?;
    gauge.set(value);
    registry.register(Box::new(gauge))
}

/// Renders the snapshot in Prometheus text exposition format.
pub fn render(snapshot: &MetricSnapshot) -> Result<String, ExportError> {
    let registry = Registry::new();

    register_gauge(
        &registry,
        "vmware_vm_processor_time",
        "VM Processor time in percent",
        snapshot.cpu_used_percent,
    )?;
    register_gauge(
        &registry,
        "vmware_vm_processor_stolen_time",
        "VM Percent of Stolen CPU time",
        snapshot.cpu_stolen_percent,
    )?;
    register_gauge(
        &registry,
        "vmware_vm_processor_efective_speed",
        "VM Qty of MHz this vm is using",
        snapshot.effective_mhz,
    )?;
    register_gauge(
        &registry,
        "vmware_host_processor_speed",
        "Host processor speed in MHz",
        f64::from(snapshot.host_processor_speed_mhz),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_processor_limit",
        "VM Processor Limit",
        limit_value(snapshot.cpu_limit_mhz),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_processor_reservation",
        "VM Processor Reservation in MHz",
        f64::from(snapshot.cpu_reservation_mhz),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_processor_shares",
        "VM Processor Shares",
        f64::from(snapshot.cpu_shares),
    )?;

    register_gauge(
        &registry,
        "vmware_vm_memory_active",
        "VM Memory used at this moment in MB",
        f64::from(snapshot.mem_active_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_balloned",
        "VM Size of Ballon in MB",
        f64::from(snapshot.mem_ballooned_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_mapped",
        "VM Mapped Memory",
        f64::from(snapshot.mem_mapped_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_shared",
        "VM Shared Memory in MB",
        f64::from(snapshot.mem_shared_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_shared_saved",
        "VM Shared Memory Saved in MB",
        f64::from(snapshot.mem_shared_saved_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_swapped",
        "VM Size of Swap, in MB",
        f64::from(snapshot.mem_swapped_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_target_size",
        "VM Memory Target Size",
        f64::from(snapshot.mem_target_size_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_used",
        "VM Memory real consumption in MB",
        f64::from(snapshot.mem_used_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_limit",
        "VM Memory Limit defined in Vcenter in MB",
        limit_value(snapshot.mem_limit_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_reservation",
        "VM Reserved Memory for this VM in MB",
        f64::from(snapshot.mem_reservation_mb),
    )?;
    register_gauge(
        &registry,
        "vmware_vm_memory_shares",
        "VM Memory Share in same host",
        f64::from(snapshot.mem_shares),
    )?;

    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&registry.gather())?)
}

/// Renders and writes the snapshot to `path`.
///
/// The text lands in a temporary file in the same directory and is renamed
/// over the target, so readers see either the old snapshot or the new one.
pub fn write_textfile(snapshot: &MetricSnapshot, path: &Path) -> Result<(), ExportError> {
    let text = render(snapshot)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut file = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
    file.write_all(text.as_bytes())?;
    file.persist(path).map_err(|err| ExportError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricSnapshot {
        MetricSnapshot {
            cpu_used_percent: 25.0,
            cpu_stolen_percent: 1.55,
            effective_mhz: 600.0,
            host_processor_speed_mhz: 2400,
            cpu_limit_mhz: None,
            cpu_reservation_mhz: 0,
            cpu_shares: 1000,
            mem_active_mb: 512,
            mem_ballooned_mb: 0,
            mem_mapped_mb: 1024,
            mem_shared_mb: 128,
            mem_shared_saved_mb: 96,
            mem_swapped_mb: 0,
            mem_target_size_mb: 2048,
            mem_used_mb: 1400,
            mem_limit_mb: Some(4096),
            mem_reservation_mb: 0,
            mem_shares: 20480,
        }
    }

    const ALL_METRIC_NAMES: [&str; 18] = [
        "vmware_vm_processor_time",
        "vmware_vm_processor_stolen_time",
        "vmware_vm_processor_efective_speed",
        "vmware_host_processor_speed",
        "vmware_vm_processor_limit",
        "vmware_vm_processor_reservation",
        "vmware_vm_processor_shares",
        "vmware_vm_memory_active",
        "vmware_vm_balloned",
        "vmware_vm_memory_mapped",
        "vmware_vm_memory_shared",
        "vmware_vm_memory_shared_saved",
        "vmware_vm_memory_swapped",
        "vmware_vm_memory_target_size",
        "vmware_vm_memory_used",
        "vmware_vm_memory_limit",
        "vmware_vm_memory_reservation",
        "vmware_vm_memory_shares",
    ];

    #[test]
    fn renders_every_published_metric_name() {
        let text = render(&snapshot()).unwrap();
        for name in ALL_METRIC_NAMES {
            assert!(
                text.contains(&format!("\n{} ", name)) || text.starts_with(&format!("{} ", name)),
                "missing sample line for {}",
                name
            );
            assert!(
                text.contains(&format!("# TYPE {} gauge", name)),
                "missing TYPE line for {}",
                name
            );
        }
    }

    #[test]
    fn renders_values_and_help_texts() {
        let text = render(&snapshot()).unwrap();
        assert!(text.contains("vmware_vm_processor_time 25\n"));
        assert!(text.contains("vmware_vm_processor_stolen_time 1.55\n"));
        assert!(text.contains("vmware_vm_processor_efective_speed 600\n"));
        assert!(text.contains("vmware_host_processor_speed 2400\n"));
        assert!(text.contains("# HELP vmware_vm_processor_time VM Processor time in percent\n"));
        assert!(text.contains("# HELP vmware_vm_balloned VM Size of Ballon in MB\n"));
    }

    #[test]
    fn unconfigured_limits_render_as_minus_one() {
        let text = render(&snapshot()).unwrap();
        assert!(text.contains("vmware_vm_processor_limit -1\n"));
        assert!(text.contains("vmware_vm_memory_limit 4096\n"));

        let none_limits = MetricSnapshot {
            mem_limit_mb: None,
            ..snapshot()
        };
        let text = render(&none_limits).unwrap();
        assert!(text.contains("vmware_vm_memory_limit -1\n"));
    }

    #[test]
    fn write_textfile_places_the_rendered_text_at_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("vmware.prom");

        let snap = snapshot();
        write_textfile(&snap, &target).unwrap();

        let on_disk = std::fs::read_to_string(&target).unwrap();
        assert_eq!(on_disk, render(&snap).unwrap());
        // No leftover temporary files next to the target.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn write_textfile_replaces_an_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("vmware.prom");
        std::fs::write(&target, "stale").unwrap();

        write_textfile(&snapshot(), &target).unwrap();
        let on_disk = std::fs::read_to_string(&target).unwrap();
        assert!(on_disk.contains("vmware_vm_processor_time"));
        assert!(!on_disk.contains("stale"));
    }
}
