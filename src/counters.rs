//! Typed getters over the raw counter fields.
//!
//! Each getter reads one statistic from the session's last refresh. The two
//! configurable limits use `0xFFFFFFFF` as an "unlimited" sentinel on the
//! wire; they surface here as `Option<u32>` so no caller can mistake the
//! sentinel for a real megahertz or megabyte figure.

use crate::guestlib::{CounterField, GuestLib, SampleError};
use crate::session::Session;

/// Raw sentinel the hypervisor reports for an unconfigured limit.
const UNLIMITED: u32 = u32::MAX;

/// Maps the wire sentinel to `None`, any other value to `Some`.
pub fn normalize_limit(raw: u32) -> Option<u32> {
    if raw == UNLIMITED { None } else { Some(raw) }
}

/// The three millisecond counters captured in one refresh. Consumed in
/// pairs by the rate engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub elapsed_ms: u64,
    pub cpu_used_ms: u64,
    pub cpu_stolen_ms: u64,
}

impl<L: GuestLib> Session<L> {
    /// CPU limit in MHz; `None` when no limit is configured.
    pub fn cpu_limit_mhz(&self) -> Result<Option<u32>, SampleError> {
        Ok(normalize_limit(self.read_u32(CounterField::CpuLimitMhz)?))
    }

    pub fn cpu_reservation_mhz(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::CpuReservationMhz)
    }

    pub fn cpu_shares(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::CpuShares)
    }

    /// Physical host processor speed in MHz.
    pub fn host_processor_speed_mhz(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::HostProcessorSpeedMhz)
    }

    pub fn mem_active_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemActiveMb)
    }

    pub fn mem_ballooned_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemBalloonedMb)
    }

    pub fn mem_mapped_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemMappedMb)
    }

    pub fn mem_shared_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemSharedMb)
    }

    pub fn mem_shared_saved_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemSharedSavedMb)
    }

    pub fn mem_swapped_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemSwappedMb)
    }

    pub fn mem_target_size_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemTargetSizeMb)
    }

    pub fn mem_used_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemUsedMb)
    }

    /// Memory limit in MB; `None` when no limit is configured.
    pub fn mem_limit_mb(&self) -> Result<Option<u32>, SampleError> {
        Ok(normalize_limit(self.read_u32(CounterField::MemLimitMb)?))
    }

    pub fn mem_reservation_mb(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemReservationMb)
    }

    pub fn mem_shares(&self) -> Result<u32, SampleError> {
        self.read_u32(CounterField::MemShares)
    }

    /// Captures the millisecond counters of the current refresh as one unit.
    pub fn counter_sample(&self) -> Result<CounterSample, SampleError> {
        Ok(CounterSample {
            elapsed_ms: self.read_u64(CounterField::ElapsedMs)?,
            cpu_used_ms: self.read_u64(CounterField::CpuUsedMs)?,
            cpu_stolen_ms: self.read_u64(CounterField::CpuStolenMs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestlib::MockGuestLib;

    #[test]
    fn limits_map_the_sentinel_to_none() {
        assert_eq!(normalize_limit(u32::MAX), None);
        assert_eq!(normalize_limit(0), Some(0));
        assert_eq!(normalize_limit(2000), Some(2000));
        // One below the sentinel is a real (if absurd) limit.
        assert_eq!(normalize_limit(u32::MAX - 1), Some(u32::MAX - 1));
    }

    #[test]
    fn typical_vm_reads_through_typed_getters() {
        let mut session = Session::open(MockGuestLib::typical_vm()).unwrap();
        session.refresh().unwrap();

        assert_eq!(session.cpu_limit_mhz().unwrap(), None);
        assert_eq!(session.mem_limit_mb().unwrap(), None);
        assert_eq!(session.cpu_shares().unwrap(), 1000);
        assert_eq!(session.host_processor_speed_mhz().unwrap(), 2400);
        assert_eq!(session.mem_target_size_mb().unwrap(), 2048);

        let sample = session.counter_sample().unwrap();
        assert_eq!(
            sample,
            CounterSample {
                elapsed_ms: 1_000_000,
                cpu_used_ms: 400_000,
                cpu_stolen_ms: 8_000,
            }
        );
    }

    #[test]
    fn configured_limits_come_through_as_values() {
        let lib = MockGuestLib::typical_vm()
            .with_value(crate::guestlib::CounterField::CpuLimitMhz, 1800)
            .with_value(crate::guestlib::CounterField::MemLimitMb, 4096);
        let mut session = Session::open(lib).unwrap();
        session.refresh().unwrap();
        assert_eq!(session.cpu_limit_mhz().unwrap(), Some(1800));
        assert_eq!(session.mem_limit_mb().unwrap(), Some(4096));
    }
}
