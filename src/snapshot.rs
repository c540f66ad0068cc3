//! One fully assembled set of VM metrics.
//!
//! [`MetricSnapshot`] is a plain value handed to the exporter; it carries no
//! registry or library state, so assembling and exporting are independently
//! testable.

use std::time::Duration;

use crate::guestlib::{GuestLib, SampleError};
use crate::rates;
use crate::session::Session;

/// Everything one sampling pass publishes. Limits stay `None` when the VM
/// has none configured; the exporter renders that as `-1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSnapshot {
    pub cpu_used_percent: f64,
    pub cpu_stolen_percent: f64,
    pub effective_mhz: f64,
    pub host_processor_speed_mhz: u32,
    pub cpu_limit_mhz: Option<u32>,
    pub cpu_reservation_mhz: u32,
    pub cpu_shares: u32,
    pub mem_active_mb: u32,
    pub mem_ballooned_mb: u32,
    pub mem_mapped_mb: u32,
    pub mem_shared_mb: u32,
    pub mem_shared_saved_mb: u32,
    pub mem_swapped_mb: u32,
    pub mem_target_size_mb: u32,
    pub mem_used_mb: u32,
    pub mem_limit_mb: Option<u32>,
    pub mem_reservation_mb: u32,
    pub mem_shares: u32,
}

/// Assembles a snapshot: one refresh for the memory family, then a full
/// rate-measurement window for the processor family.
pub fn collect<L: GuestLib>(
    session: &mut Session<L>,
    interval: Duration,
) -> Result<MetricSnapshot, SampleError> {
    session.refresh()?;

    let mem_active_mb = session.mem_active_mb()?;
    let mem_ballooned_mb = session.mem_ballooned_mb()?;
    let mem_mapped_mb = session.mem_mapped_mb()?;
    let mem_shared_mb = session.mem_shared_mb()?;
    let mem_shared_saved_mb = session.mem_shared_saved_mb()?;
    let mem_swapped_mb = session.mem_swapped_mb()?;
    let mem_target_size_mb = session.mem_target_size_mb()?;
    let mem_used_mb = session.mem_used_mb()?;
    let mem_limit_mb = session.mem_limit_mb()?;
    let mem_reservation_mb = session.mem_reservation_mb()?;
    let mem_shares = session.mem_shares()?;

    let rates = rates::measure(session, interval)?;

    Ok(MetricSnapshot {
        cpu_used_percent: rates.cpu_used_percent,
        cpu_stolen_percent: rates.cpu_stolen_percent,
        effective_mhz: rates.effective_mhz,
        host_processor_speed_mhz: session.host_processor_speed_mhz()?,
        cpu_limit_mhz: session.cpu_limit_mhz()?,
        cpu_reservation_mhz: session.cpu_reservation_mhz()?,
        cpu_shares: session.cpu_shares()?,
        mem_active_mb,
        mem_ballooned_mb,
        mem_mapped_mb,
        mem_shared_mb,
        mem_shared_saved_mb,
        mem_swapped_mb,
        mem_target_size_mb,
        mem_used_mb,
        mem_limit_mb,
        mem_reservation_mb,
        mem_shares,
    })
}
