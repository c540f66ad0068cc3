//! Scripted in-memory guest library for tests.
//!
//! [`MockGuestLib`] plays back a fixed sequence of counter samples: every
//! successful `update_info` advances one step through the script, and the
//! millisecond counters read whatever the current step holds. Point-in-time
//! gauges (memory, limits, host speed) are plain key/value state. Failures
//! can be injected per operation and per field.

use std::cell::RefCell;
use std::collections::HashMap;

use super::{
    CounterField, GuestLib, RawHandle, SessionId, Status, VMGUESTLIB_ERROR_INVALID_ARG,
    VMGUESTLIB_ERROR_INVALID_HANDLE,
};

/// One step of the scripted millisecond counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSample {
    pub elapsed_ms: u64,
    pub cpu_used_ms: u64,
    pub cpu_stolen_ms: u64,
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    /// Number of successful `update_info` calls so far. The current script
    /// position is `updates - 1`; reads before the first update see step 0.
    updates: usize,
    session_ids: Vec<SessionId>,
    samples: Vec<MockSample>,
    values: HashMap<CounterField, u32>,
    fail_open: Option<Status>,
    fail_update: Option<Status>,
    fail_close: Option<Status>,
    fail_field: Option<(CounterField, Status)>,
}

/// In-memory [`GuestLib`] with scripted samples and injectable failures.
#[derive(Debug, Default)]
pub struct MockGuestLib {
    state: RefCell<MockState>,
}

const MOCK_HANDLE: RawHandle = RawHandle(0x6d6f636b);

impl MockGuestLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plausible small VM: 2.4 GHz host, a few hundred MB of memory
    /// activity, no limits configured, and a script where the VM burns
    /// roughly a quarter of a core with a little steal. The steps advance
    /// with identical deltas, so a measurement window yields the same rates
    /// wherever in the script it starts.
    pub fn typical_vm() -> Self {
        let lib = Self::new();
        {
            let mut s = lib.state.borrow_mut();
            s.session_ids = vec![0x51e5_51d0];
            s.samples = vec![
                MockSample {
                    elapsed_ms: 1_000_000,
                    cpu_used_ms: 400_000,
                    cpu_stolen_ms: 8_000,
                },
                MockSample {
                    elapsed_ms: 1_002_000,
                    cpu_used_ms: 400_500,
                    cpu_stolen_ms: 8_020,
                },
                MockSample {
                    elapsed_ms: 1_004_000,
                    cpu_used_ms: 401_000,
                    cpu_stolen_ms: 8_040,
                },
            ];
            s.values = HashMap::from([
                (CounterField::CpuLimitMhz, u32::MAX),
                (CounterField::CpuReservationMhz, 0),
                (CounterField::CpuShares, 1000),
                (CounterField::HostProcessorSpeedMhz, 2400),
                (CounterField::MemActiveMb, 512),
                (CounterField::MemBalloonedMb, 0),
                (CounterField::MemMappedMb, 1024),
                (CounterField::MemSharedMb, 128),
                (CounterField::MemSharedSavedMb, 96),
                (CounterField::MemSwappedMb, 0),
                (CounterField::MemTargetSizeMb, 2048),
                (CounterField::MemUsedMb, 1400),
                (CounterField::MemLimitMb, u32::MAX),
                (CounterField::MemReservationMb, 0),
                (CounterField::MemShares, 20480),
            ]);
        }
        lib
    }

    /// Replaces the scripted millisecond samples. Reads past the end of the
    /// script clamp to the last step, which is how a stalled hypervisor
    /// window is simulated.
    pub fn with_samples(self, samples: Vec<MockSample>) -> Self {
        self.state.borrow_mut().samples = samples;
        self
    }

    /// Replaces the session-id sequence, indexed by update count (clamped).
    pub fn with_session_ids(self, ids: Vec<SessionId>) -> Self {
        self.state.borrow_mut().session_ids = ids;
        self
    }

    /// Sets one point-in-time gauge.
    pub fn with_value(self, field: CounterField, value: u32) -> Self {
        self.state.borrow_mut().values.insert(field, value);
        self
    }

    pub fn fail_open(self, status: Status) -> Self {
        self.state.borrow_mut().fail_open = Some(status);
        self
    }

    pub fn fail_update(self, status: Status) -> Self {
        self.state.borrow_mut().fail_update = Some(status);
        self
    }

    pub fn fail_close(self, status: Status) -> Self {
        self.state.borrow_mut().fail_close = Some(status);
        self
    }

    pub fn fail_field(self, field: CounterField, status: Status) -> Self {
        self.state.borrow_mut().fail_field = Some((field, status));
        self
    }

    /// Number of successful `update_info` calls observed.
    pub fn update_count(&self) -> usize {
        self.state.borrow().updates
    }

    /// Whether a handle is currently open.
    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    fn check_handle(&self, handle: RawHandle) -> Result<(), Status> {
        let s = self.state.borrow();
        if !s.open || handle != MOCK_HANDLE {
            return Err(VMGUESTLIB_ERROR_INVALID_HANDLE);
        }
        Ok(())
    }

    fn current_sample(&self) -> MockSample {
        let s = self.state.borrow();
        let step = s.updates.saturating_sub(1);
        let idx = step.min(s.samples.len().saturating_sub(1));
        s.samples.get(idx).copied().unwrap_or(MockSample {
            elapsed_ms: 0,
            cpu_used_ms: 0,
            cpu_stolen_ms: 0,
        })
    }
}

impl GuestLib for MockGuestLib {
    fn open_handle(&self) -> Result<RawHandle, Status> {
        let mut s = self.state.borrow_mut();
        if let Some(status) = s.fail_open {
            return Err(status);
        }
        s.open = true;
        Ok(MOCK_HANDLE)
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), Status> {
        self.check_handle(handle)?;
        let mut s = self.state.borrow_mut();
        if let Some(status) = s.fail_close {
            return Err(status);
        }
        s.open = false;
        Ok(())
    }

    fn update_info(&self, handle: RawHandle) -> Result<(), Status> {
        self.check_handle(handle)?;
        let mut s = self.state.borrow_mut();
        if let Some(status) = s.fail_update {
            return Err(status);
        }
        s.updates += 1;
        Ok(())
    }

    fn session_id(&self, handle: RawHandle) -> Result<SessionId, Status> {
        self.check_handle(handle)?;
        let s = self.state.borrow();
        let step = s.updates.saturating_sub(1);
        let idx = step.min(s.session_ids.len().saturating_sub(1));
        Ok(s.session_ids.get(idx).copied().unwrap_or(0))
    }

    fn read_u32(&self, handle: RawHandle, field: CounterField) -> Result<u32, Status> {
        self.check_handle(handle)?;
        if field.is_wide() {
            return Err(VMGUESTLIB_ERROR_INVALID_ARG);
        }
        let s = self.state.borrow();
        if let Some((failing, status)) = s.fail_field {
            if failing == field {
                return Err(status);
            }
        }
        Ok(s.values.get(&field).copied().unwrap_or(0))
    }

    fn read_u64(&self, handle: RawHandle, field: CounterField) -> Result<u64, Status> {
        self.check_handle(handle)?;
        if !field.is_wide() {
            return Err(VMGUESTLIB_ERROR_INVALID_ARG);
        }
        {
            let s = self.state.borrow();
            if let Some((failing, status)) = s.fail_field {
                if failing == field {
                    return Err(status);
                }
            }
        }
        let sample = self.current_sample();
        Ok(match field {
            CounterField::ElapsedMs => sample.elapsed_ms,
            CounterField::CpuUsedMs => sample.cpu_used_ms,
            CounterField::CpuStolenMs => sample.cpu_stolen_ms,
            _ => unreachable!("is_wide covers exactly the millisecond counters"),
        })
    }

    fn error_text(&self, _status: Status) -> Option<String> {
        // The mock never describes codes itself so callers exercise the
        // fixed fallback table.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestlib::{
        SampleError, VMGUESTLIB_ERROR_NO_INFO, VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM,
    };

    #[test]
    fn reads_require_an_open_handle() {
        let lib = MockGuestLib::typical_vm();
        let err = lib.read_u32(MOCK_HANDLE, CounterField::MemUsedMb);
        assert_eq!(err, Err(VMGUESTLIB_ERROR_INVALID_HANDLE));

        let handle = lib.open_handle().unwrap();
        lib.update_info(handle).unwrap();
        assert_eq!(lib.read_u32(handle, CounterField::MemUsedMb), Ok(1400));

        lib.close_handle(handle).unwrap();
        let err = lib.read_u32(handle, CounterField::MemUsedMb);
        assert_eq!(err, Err(VMGUESTLIB_ERROR_INVALID_HANDLE));
    }

    #[test]
    fn updates_advance_the_sample_script_and_clamp() {
        let lib = MockGuestLib::new().with_samples(vec![
            MockSample {
                elapsed_ms: 100,
                cpu_used_ms: 10,
                cpu_stolen_ms: 1,
            },
            MockSample {
                elapsed_ms: 200,
                cpu_used_ms: 30,
                cpu_stolen_ms: 2,
            },
        ]);
        let handle = lib.open_handle().unwrap();

        lib.update_info(handle).unwrap();
        assert_eq!(lib.read_u64(handle, CounterField::ElapsedMs), Ok(100));

        lib.update_info(handle).unwrap();
        assert_eq!(lib.read_u64(handle, CounterField::ElapsedMs), Ok(200));

        // Past the end of the script the last step repeats.
        lib.update_info(handle).unwrap();
        assert_eq!(lib.read_u64(handle, CounterField::ElapsedMs), Ok(200));
        assert_eq!(lib.read_u64(handle, CounterField::CpuUsedMs), Ok(30));
    }

    #[test]
    fn width_mismatch_is_an_argument_error() {
        let lib = MockGuestLib::typical_vm();
        let handle = lib.open_handle().unwrap();
        lib.update_info(handle).unwrap();
        assert_eq!(
            lib.read_u32(handle, CounterField::ElapsedMs),
            Err(VMGUESTLIB_ERROR_INVALID_ARG)
        );
        assert_eq!(
            lib.read_u64(handle, CounterField::MemUsedMb),
            Err(VMGUESTLIB_ERROR_INVALID_ARG)
        );
    }

    #[test]
    fn injected_failures_surface_as_their_status() {
        let lib = MockGuestLib::new().fail_open(VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM);
        assert_eq!(
            lib.open_handle(),
            Err(VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM)
        );

        let lib = MockGuestLib::typical_vm()
            .fail_field(CounterField::MemBalloonedMb, VMGUESTLIB_ERROR_NO_INFO);
        let handle = lib.open_handle().unwrap();
        lib.update_info(handle).unwrap();
        assert_eq!(
            lib.read_u32(handle, CounterField::MemBalloonedMb),
            Err(VMGUESTLIB_ERROR_NO_INFO)
        );
        // Other fields are unaffected.
        assert_eq!(lib.read_u32(handle, CounterField::MemActiveMb), Ok(512));
    }

    #[test]
    fn session_ids_follow_the_update_count() {
        let lib = MockGuestLib::typical_vm().with_session_ids(vec![7, 7, 9]);
        let handle = lib.open_handle().unwrap();
        lib.update_info(handle).unwrap();
        assert_eq!(lib.session_id(handle), Ok(7));
        lib.update_info(handle).unwrap();
        assert_eq!(lib.session_id(handle), Ok(7));
        lib.update_info(handle).unwrap();
        assert_eq!(lib.session_id(handle), Ok(9));
        lib.update_info(handle).unwrap();
        assert_eq!(lib.session_id(handle), Ok(9));
    }

    #[test]
    fn error_text_defers_to_the_fixed_table() {
        let err = SampleError::counter(
            &MockGuestLib::new(),
            CounterField::MemUsedMb,
            VMGUESTLIB_ERROR_NO_INFO,
        );
        let rendered = err.to_string();
        assert!(rendered.contains("mem_used_mb"));
        assert!(rendered.contains("VMGUESTLIB_ERROR_NO_INFO"));
        assert!(rendered.contains("VMGuestLib_UpdateInfo"));
    }
}
