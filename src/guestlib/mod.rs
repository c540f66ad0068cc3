//! Access layer for the VMware guest introspection library.
//!
//! The vSphere Guest API ships as a C library resolved at runtime; everything
//! above this module talks to it through the narrow [`GuestLib`] trait so the
//! sampling code can run against a scripted in-memory library in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Snapshot assembler                    │
//! │          ┌──────────────┐   ┌─────────────────┐          │
//! │          │ Rate engine  │   │ Counter getters │          │
//! │          └──────┬───────┘   └────────┬────────┘          │
//! │                 └────────┬───────────┘                   │
//! │                   ┌──────▼──────┐                        │
//! │                   │   Session   │                        │
//! │                   └──────┬──────┘                        │
//! │                   ┌──────▼──────┐                        │
//! │                   │  GuestLib   │ (trait)                │
//! │                   └──────┬──────┘                        │
//! └──────────────────────────┼───────────────────────────────┘
//!                ┌───────────┴───────────┐
//!         ┌──────▼────────┐      ┌───────▼───────┐
//!         │ NativeGuestLib│      │ MockGuestLib  │
//!         │ (vmGuestLib)  │      │ (testing)     │
//!         └───────────────┘      └───────────────┘
//! ```

pub mod mock;
pub mod native;

pub use mock::{MockGuestLib, MockSample};
pub use native::NativeGuestLib;

/// Raw status code returned by every guest library call. `0` is success.
pub type Status = u32;

/// Opaque session identity token. Retrieved after a refresh; the hypervisor
/// silently issues a new one after VMotion, suspend/resume, or snapshot
/// revert. Tokens are only meaningful for equality within one VM.
pub type SessionId = u64;

pub const VMGUESTLIB_ERROR_SUCCESS: Status = 0;
pub const VMGUESTLIB_ERROR_OTHER: Status = 1;
pub const VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM: Status = 2;
pub const VMGUESTLIB_ERROR_NOT_ENABLED: Status = 3;
pub const VMGUESTLIB_ERROR_NOT_AVAILABLE: Status = 4;
pub const VMGUESTLIB_ERROR_NO_INFO: Status = 5;
pub const VMGUESTLIB_ERROR_MEMORY: Status = 6;
pub const VMGUESTLIB_ERROR_BUFFER_TOO_SMALL: Status = 7;
pub const VMGUESTLIB_ERROR_INVALID_HANDLE: Status = 8;
pub const VMGUESTLIB_ERROR_INVALID_ARG: Status = 9;
pub const VMGUESTLIB_ERROR_UNSUPPORTED_VERSION: Status = 10;

/// Symbolic names for status codes 0–10, in wire order.
const ERROR_NAMES: [&str; 11] = [
    "VMGUESTLIB_ERROR_SUCCESS",
    "VMGUESTLIB_ERROR_OTHER",
    "VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM",
    "VMGUESTLIB_ERROR_NOT_ENABLED",
    "VMGUESTLIB_ERROR_NOT_AVAILABLE",
    "VMGUESTLIB_ERROR_NO_INFO",
    "VMGUESTLIB_ERROR_MEMORY",
    "VMGUESTLIB_ERROR_BUFFER_TOO_SMALL",
    "VMGUESTLIB_ERROR_INVALID_HANDLE",
    "VMGUESTLIB_ERROR_INVALID_ARG",
    "VMGUESTLIB_ERROR_UNSUPPORTED_VERSION",
];

/// Human-readable texts for status codes 0–10, matching the vSphere Guest
/// API documentation. Used when the library's own `GetErrorText` is not
/// available (mock library, or a code the loaded build cannot describe).
const ERROR_MESSAGES: [&str; 11] = [
    "The function has completed successfully.",
    "An error has occurred. No additional information about the type of the \
     error is available.",
    "The program making this call is not running on a VMware virtual machine.",
    "The vSphere Guest API is not enabled on this host, so these functions \
     cannot be used.",
    "The information requested is not available on this host.",
    "The handle data structure does not contain any information. You must \
     call VMGuestLib_UpdateInfo to update the data structure.",
    "There is not enough memory available to complete the call.",
    "The buffer is too small to accommodate the function call.",
    "The handle that you used is invalid. Make sure that you have the correct \
     handle and that it is open. It might be necessary to create a new handle \
     using VMGuestLib_OpenHandle.",
    "One or more of the arguments passed to the function were invalid.",
    "The host does not support the requested statistic.",
];

/// Returns the symbolic name for a status code.
pub fn error_name(status: Status) -> &'static str {
    ERROR_NAMES
        .get(status as usize)
        .copied()
        .unwrap_or("VMGUESTLIB_ERROR_UNKNOWN")
}

/// Returns the fixed-table message for a status code, if the code is known.
pub fn error_message(status: Status) -> Option<&'static str> {
    ERROR_MESSAGES.get(status as usize).copied()
}

/// Opaque handle to the guest library's per-session context.
///
/// Wraps whatever the backing implementation uses to identify the session:
/// a raw `VMGuestLibHandle` pointer for the native library, a small token
/// for the mock. Only [`crate::session::Session`] holds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHandle(pub(crate) usize);

/// One raw statistic exposed by the guest library.
///
/// Millisecond counters are 64-bit (they outgrow 32 bits on long-running
/// VMs); everything else is 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    CpuLimitMhz,
    CpuReservationMhz,
    CpuShares,
    CpuStolenMs,
    CpuUsedMs,
    ElapsedMs,
    HostProcessorSpeedMhz,
    MemActiveMb,
    MemBalloonedMb,
    MemMappedMb,
    MemSharedMb,
    MemSharedSavedMb,
    MemSwappedMb,
    MemTargetSizeMb,
    MemUsedMb,
    MemLimitMb,
    MemReservationMb,
    MemShares,
}

impl CounterField {
    /// True for the 64-bit millisecond counters.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            CounterField::CpuStolenMs | CounterField::CpuUsedMs | CounterField::ElapsedMs
        )
    }

    /// Field name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CounterField::CpuLimitMhz => "cpu_limit_mhz",
            CounterField::CpuReservationMhz => "cpu_reservation_mhz",
            CounterField::CpuShares => "cpu_shares",
            CounterField::CpuStolenMs => "cpu_stolen_ms",
            CounterField::CpuUsedMs => "cpu_used_ms",
            CounterField::ElapsedMs => "elapsed_ms",
            CounterField::HostProcessorSpeedMhz => "host_processor_speed_mhz",
            CounterField::MemActiveMb => "mem_active_mb",
            CounterField::MemBalloonedMb => "mem_ballooned_mb",
            CounterField::MemMappedMb => "mem_mapped_mb",
            CounterField::MemSharedMb => "mem_shared_mb",
            CounterField::MemSharedSavedMb => "mem_shared_saved_mb",
            CounterField::MemSwappedMb => "mem_swapped_mb",
            CounterField::MemTargetSizeMb => "mem_target_size_mb",
            CounterField::MemUsedMb => "mem_used_mb",
            CounterField::MemLimitMb => "mem_limit_mb",
            CounterField::MemReservationMb => "mem_reservation_mb",
            CounterField::MemShares => "mem_shares",
        }
    }

    /// Nul-terminated foreign symbol name of the getter for this field.
    pub(crate) fn symbol(self) -> &'static [u8] {
        match self {
            CounterField::CpuLimitMhz => b"VMGuestLib_GetCpuLimitMHz\0",
            CounterField::CpuReservationMhz => b"VMGuestLib_GetCpuReservationMHz\0",
            CounterField::CpuShares => b"VMGuestLib_GetCpuShares\0",
            CounterField::CpuStolenMs => b"VMGuestLib_GetCpuStolenMs\0",
            CounterField::CpuUsedMs => b"VMGuestLib_GetCpuUsedMs\0",
            CounterField::ElapsedMs => b"VMGuestLib_GetElapsedMs\0",
            CounterField::HostProcessorSpeedMhz => b"VMGuestLib_GetHostProcessorSpeed\0",
            CounterField::MemActiveMb => b"VMGuestLib_GetMemActiveMB\0",
            CounterField::MemBalloonedMb => b"VMGuestLib_GetMemBalloonedMB\0",
            CounterField::MemMappedMb => b"VMGuestLib_GetMemMappedMB\0",
            CounterField::MemSharedMb => b"VMGuestLib_GetMemSharedMB\0",
            CounterField::MemSharedSavedMb => b"VMGuestLib_GetMemSharedSavedMB\0",
            CounterField::MemSwappedMb => b"VMGuestLib_GetMemSwappedMB\0",
            CounterField::MemTargetSizeMb => b"VMGuestLib_GetMemTargetSizeMB\0",
            CounterField::MemUsedMb => b"VMGuestLib_GetMemUsedMB\0",
            CounterField::MemLimitMb => b"VMGuestLib_GetMemLimitMB\0",
            CounterField::MemReservationMb => b"VMGuestLib_GetMemReservationMB\0",
            CounterField::MemShares => b"VMGuestLib_GetMemShares\0",
        }
    }
}

/// Capability interface over the guest introspection library.
///
/// Raw operations return the foreign status code on failure; translation
/// into [`SampleError`] happens in [`crate::session::Session`]. The library
/// does not serialize concurrent use of one handle — each sampling thread
/// needs its own handle.
pub trait GuestLib {
    /// Requests a new session handle.
    fn open_handle(&self) -> Result<RawHandle, Status>;

    /// Releases a handle acquired with [`GuestLib::open_handle`].
    fn close_handle(&self, handle: RawHandle) -> Result<(), Status>;

    /// Re-synchronizes cached VM statistics into the handle's context.
    /// Counters read before the first successful update are not valid.
    fn update_info(&self, handle: RawHandle) -> Result<(), Status>;

    /// Returns the session identity token. Only valid after an update.
    fn session_id(&self, handle: RawHandle) -> Result<SessionId, Status>;

    /// Reads one 32-bit statistic. Passing a 64-bit field is an argument
    /// error, reported as `VMGUESTLIB_ERROR_INVALID_ARG`.
    fn read_u32(&self, handle: RawHandle, field: CounterField) -> Result<u32, Status>;

    /// Reads one 64-bit millisecond counter. Passing a 32-bit field is an
    /// argument error, reported as `VMGUESTLIB_ERROR_INVALID_ARG`.
    fn read_u64(&self, handle: RawHandle, field: CounterField) -> Result<u64, Status>;

    /// The library's own text for a status code, when it can provide one.
    fn error_text(&self, status: Status) -> Option<String>;
}

impl<L: GuestLib + ?Sized> GuestLib for &L {
    fn open_handle(&self) -> Result<RawHandle, Status> {
        (**self).open_handle()
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), Status> {
        (**self).close_handle(handle)
    }

    fn update_info(&self, handle: RawHandle) -> Result<(), Status> {
        (**self).update_info(handle)
    }

    fn session_id(&self, handle: RawHandle) -> Result<SessionId, Status> {
        (**self).session_id(handle)
    }

    fn read_u32(&self, handle: RawHandle, field: CounterField) -> Result<u32, Status> {
        (**self).read_u32(handle, field)
    }

    fn read_u64(&self, handle: RawHandle, field: CounterField) -> Result<u64, Status> {
        (**self).read_u64(handle, field)
    }

    fn error_text(&self, status: Status) -> Option<String> {
        (**self).error_text(status)
    }
}

/// Error type for a sampling pass.
///
/// Everything here is fatal for the run: the process reports it and exits
/// non-zero without writing a snapshot. The one tolerated failure mode — a
/// stalled elapsed counter — never surfaces as an error (see
/// [`crate::rates`]).
#[derive(Debug)]
pub enum SampleError {
    /// Neither candidate library name resolved at startup.
    LibraryNotFound { tried: Vec<String> },
    /// Open/update/close against the library returned non-success.
    Handle {
        op: &'static str,
        status: Status,
        message: String,
    },
    /// A specific counter getter returned non-success.
    CounterRead {
        field: CounterField,
        status: Status,
        message: String,
    },
}

impl SampleError {
    /// Builds a handle-operation error, preferring the library's own error
    /// text over the fixed table.
    pub(crate) fn handle<L: GuestLib>(lib: &L, op: &'static str, status: Status) -> Self {
        SampleError::Handle {
            op,
            status,
            message: resolve_message(lib, status),
        }
    }

    /// Builds a counter-read error for a specific field.
    pub(crate) fn counter<L: GuestLib>(lib: &L, field: CounterField, status: Status) -> Self {
        SampleError::CounterRead {
            field,
            status,
            message: resolve_message(lib, status),
        }
    }
}

fn resolve_message<L: GuestLib>(lib: &L, status: Status) -> String {
    lib.error_text(status)
        .or_else(|| error_message(status).map(str::to_string))
        .unwrap_or_else(|| format!("unrecognized status code {}", status))
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::LibraryNotFound { tried } => write!(
                f,
                "cannot locate the VMware guest library (tried {})",
                tried.join(", ")
            ),
            SampleError::Handle {
                op,
                status,
                message,
            } => write!(
                f,
                "{} failed with {} (code {}): {}",
                op,
                error_name(*status),
                status,
                message
            ),
            SampleError::CounterRead {
                field,
                status,
                message,
            } => write!(
                f,
                "reading {} failed with {} (code {}): {}",
                field.name(),
                error_name(*status),
                status,
                message
            ),
        }
    }
}

impl std::error::Error for SampleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tables_cover_all_codes() {
        for status in 0..=10 {
            assert!(error_name(status).starts_with("VMGUESTLIB_ERROR_"));
            assert!(error_message(status).is_some());
        }
        assert_eq!(error_name(11), "VMGUESTLIB_ERROR_UNKNOWN");
        assert!(error_message(11).is_none());
    }

    #[test]
    fn invalid_handle_message_matches_documented_text() {
        let msg = error_message(VMGUESTLIB_ERROR_INVALID_HANDLE).unwrap();
        assert!(msg.starts_with("The handle that you used is invalid."));
    }

    #[test]
    fn wide_fields_are_exactly_the_millisecond_counters() {
        let wide: Vec<CounterField> = [
            CounterField::CpuStolenMs,
            CounterField::CpuUsedMs,
            CounterField::ElapsedMs,
        ]
        .to_vec();
        for f in wide {
            assert!(f.is_wide());
        }
        assert!(!CounterField::CpuLimitMhz.is_wide());
        assert!(!CounterField::MemLimitMb.is_wide());
    }

    #[test]
    fn symbols_are_nul_terminated() {
        for f in [
            CounterField::CpuLimitMhz,
            CounterField::ElapsedMs,
            CounterField::MemShares,
        ] {
            assert_eq!(*f.symbol().last().unwrap(), 0);
        }
    }
}
