//! Runtime bindings for the vSphere guest library.
//!
//! The library has no stable install path or link-time stub inside guests,
//! so it is resolved through the dynamic loader at startup and every symbol
//! is bound eagerly. A VM without VMware Tools (or a non-VMware machine)
//! fails fast here, before any handle operation.

use std::ffi::{CStr, c_char, c_int, c_void};

use libloading::{Library, Symbol};
use tracing::debug;

use crate::guestlib::{
    CounterField, GuestLib, RawHandle, SampleError, SessionId, Status, VMGUESTLIB_ERROR_INVALID_ARG,
    VMGUESTLIB_ERROR_SUCCESS,
};

/// Library names tried in order, mirroring the loader behavior of the
/// official Guest SDK samples.
const LIBRARY_CANDIDATES: [&str; 2] = ["libvmGuestLib.so", "libguestlib.so"];

type OpenHandleFn = unsafe extern "C" fn(handle: *mut *mut c_void) -> c_int;
type CloseHandleFn = unsafe extern "C" fn(handle: *mut c_void) -> c_int;
type UpdateInfoFn = unsafe extern "C" fn(handle: *mut c_void) -> c_int;
type GetSessionIdFn = unsafe extern "C" fn(handle: *mut c_void, id: *mut u64) -> c_int;
type GetErrorTextFn = unsafe extern "C" fn(status: c_int) -> *const c_char;
type GetU32Fn = unsafe extern "C" fn(handle: *mut c_void, value: *mut u32) -> c_int;
type GetU64Fn = unsafe extern "C" fn(handle: *mut c_void, value: *mut u64) -> c_int;

/// Dynamically loaded `vmGuestLib` with one bound function per operation.
pub struct NativeGuestLib {
    _library: Library,
    open_handle: OpenHandleFn,
    close_handle: CloseHandleFn,
    update_info: UpdateInfoFn,
    get_session_id: GetSessionIdFn,
    get_error_text: GetErrorTextFn,
    get_cpu_limit_mhz: GetU32Fn,
    get_cpu_reservation_mhz: GetU32Fn,
    get_cpu_shares: GetU32Fn,
    get_cpu_stolen_ms: GetU64Fn,
    get_cpu_used_ms: GetU64Fn,
    get_elapsed_ms: GetU64Fn,
    get_host_processor_speed: GetU32Fn,
    get_mem_active_mb: GetU32Fn,
    get_mem_ballooned_mb: GetU32Fn,
    get_mem_mapped_mb: GetU32Fn,
    get_mem_shared_mb: GetU32Fn,
    get_mem_shared_saved_mb: GetU32Fn,
    get_mem_swapped_mb: GetU32Fn,
    get_mem_target_size_mb: GetU32Fn,
    get_mem_used_mb: GetU32Fn,
    get_mem_limit_mb: GetU32Fn,
    get_mem_reservation_mb: GetU32Fn,
    get_mem_shares: GetU32Fn,
}

impl NativeGuestLib {
    /// Resolves and binds the guest library.
    ///
    /// Tries `libvmGuestLib.so` then `libguestlib.so`; a missing symbol in a
    /// resolved library is treated the same as an unresolvable library.
    pub fn load() -> Result<Self, SampleError> {
        let mut tried = Vec::with_capacity(LIBRARY_CANDIDATES.len());
        for name in LIBRARY_CANDIDATES {
            // SAFETY: loading a known C library; its initializers only set up
            // internal state for the Guest API.
            match unsafe { Library::new(name) } {
                Ok(library) => {
                    debug!(library = name, "loaded VMware guest library");
                    return Self::bind(library);
                }
                Err(e) => {
                    debug!(library = name, error = %e, "candidate did not resolve");
                    tried.push(name.to_string());
                }
            }
        }
        Err(SampleError::LibraryNotFound { tried })
    }

    fn bind(library: Library) -> Result<Self, SampleError> {
        // SAFETY: all symbols are documented C functions of the Guest API
        // with stable signatures; each function pointer is copied out of its
        // Symbol immediately, and the Library is kept alive by the struct.
        unsafe {
            let open_handle: OpenHandleFn = *lookup(&library, b"VMGuestLib_OpenHandle\0")?;
            let close_handle: CloseHandleFn = *lookup(&library, b"VMGuestLib_CloseHandle\0")?;
            let update_info: UpdateInfoFn = *lookup(&library, b"VMGuestLib_UpdateInfo\0")?;
            let get_session_id: GetSessionIdFn = *lookup(&library, b"VMGuestLib_GetSessionId\0")?;
            let get_error_text: GetErrorTextFn = *lookup(&library, b"VMGuestLib_GetErrorText\0")?;

            let get_cpu_limit_mhz: GetU32Fn =
                *lookup(&library, CounterField::CpuLimitMhz.symbol())?;
            let get_cpu_reservation_mhz: GetU32Fn =
                *lookup(&library, CounterField::CpuReservationMhz.symbol())?;
            let get_cpu_shares: GetU32Fn = *lookup(&library, CounterField::CpuShares.symbol())?;
            let get_cpu_stolen_ms: GetU64Fn =
                *lookup(&library, CounterField::CpuStolenMs.symbol())?;
            let get_cpu_used_ms: GetU64Fn = *lookup(&library, CounterField::CpuUsedMs.symbol())?;
            let get_elapsed_ms: GetU64Fn = *lookup(&library, CounterField::ElapsedMs.symbol())?;
            let get_host_processor_speed: GetU32Fn =
                *lookup(&library, CounterField::HostProcessorSpeedMhz.symbol())?;
            let get_mem_active_mb: GetU32Fn =
                *lookup(&library, CounterField::MemActiveMb.symbol())?;
            let get_mem_ballooned_mb: GetU32Fn =
                *lookup(&library, CounterField::MemBalloonedMb.symbol())?;
            let get_mem_mapped_mb: GetU32Fn =
                *lookup(&library, CounterField::MemMappedMb.symbol())?;
            let get_mem_shared_mb: GetU32Fn =
                *lookup(&library, CounterField::MemSharedMb.symbol())?;
            let get_mem_shared_saved_mb: GetU32Fn =
                *lookup(&library, CounterField::MemSharedSavedMb.symbol())?;
            let get_mem_swapped_mb: GetU32Fn =
                *lookup(&library, CounterField::MemSwappedMb.symbol())?;
            let get_mem_target_size_mb: GetU32Fn =
                *lookup(&library, CounterField::MemTargetSizeMb.symbol())?;
            let get_mem_used_mb: GetU32Fn = *lookup(&library, CounterField::MemUsedMb.symbol())?;
            let get_mem_limit_mb: GetU32Fn =
                *lookup(&library, CounterField::MemLimitMb.symbol())?;
            let get_mem_reservation_mb: GetU32Fn =
                *lookup(&library, CounterField::MemReservationMb.symbol())?;
            let get_mem_shares: GetU32Fn = *lookup(&library, CounterField::MemShares.symbol())?;

            Ok(Self {
                open_handle,
                close_handle,
                update_info,
                get_session_id,
                get_error_text,
                get_cpu_limit_mhz,
                get_cpu_reservation_mhz,
                get_cpu_shares,
                get_cpu_stolen_ms,
                get_cpu_used_ms,
                get_elapsed_ms,
                get_host_processor_speed,
                get_mem_active_mb,
                get_mem_ballooned_mb,
                get_mem_mapped_mb,
                get_mem_shared_mb,
                get_mem_shared_saved_mb,
                get_mem_swapped_mb,
                get_mem_target_size_mb,
                get_mem_used_mb,
                get_mem_limit_mb,
                get_mem_reservation_mb,
                get_mem_shares,
                _library: library,
            })
        }
    }

    fn getter_u32(&self, field: CounterField) -> Option<GetU32Fn> {
        match field {
            CounterField::CpuLimitMhz => Some(self.get_cpu_limit_mhz),
            CounterField::CpuReservationMhz => Some(self.get_cpu_reservation_mhz),
            CounterField::CpuShares => Some(self.get_cpu_shares),
            CounterField::HostProcessorSpeedMhz => Some(self.get_host_processor_speed),
            CounterField::MemActiveMb => Some(self.get_mem_active_mb),
            CounterField::MemBalloonedMb => Some(self.get_mem_ballooned_mb),
            CounterField::MemMappedMb => Some(self.get_mem_mapped_mb),
            CounterField::MemSharedMb => Some(self.get_mem_shared_mb),
            CounterField::MemSharedSavedMb => Some(self.get_mem_shared_saved_mb),
            CounterField::MemSwappedMb => Some(self.get_mem_swapped_mb),
            CounterField::MemTargetSizeMb => Some(self.get_mem_target_size_mb),
            CounterField::MemUsedMb => Some(self.get_mem_used_mb),
            CounterField::MemLimitMb => Some(self.get_mem_limit_mb),
            CounterField::MemReservationMb => Some(self.get_mem_reservation_mb),
            CounterField::MemShares => Some(self.get_mem_shares),
            CounterField::CpuStolenMs | CounterField::CpuUsedMs | CounterField::ElapsedMs => None,
        }
    }

    fn getter_u64(&self, field: CounterField) -> Option<GetU64Fn> {
        match field {
            CounterField::CpuStolenMs => Some(self.get_cpu_stolen_ms),
            CounterField::CpuUsedMs => Some(self.get_cpu_used_ms),
            CounterField::ElapsedMs => Some(self.get_elapsed_ms),
            _ => None,
        }
    }
}

unsafe fn lookup<'a, T>(
    library: &'a Library,
    symbol: &'static [u8],
) -> Result<Symbol<'a, T>, SampleError>
where
    T: Copy,
{
    unsafe {
        library.get(symbol).map_err(|_| SampleError::LibraryNotFound {
            tried: vec![format!(
                "symbol {} missing from resolved library",
                String::from_utf8_lossy(&symbol[..symbol.len() - 1])
            )],
        })
    }
}

fn check(ret: c_int) -> Result<(), Status> {
    let status = ret as Status;
    if status == VMGUESTLIB_ERROR_SUCCESS {
        Ok(())
    } else {
        Err(status)
    }
}

impl GuestLib for NativeGuestLib {
    fn open_handle(&self) -> Result<RawHandle, Status> {
        let mut handle: *mut c_void = std::ptr::null_mut();
        // SAFETY: out-pointer to a local; the library fills it on success.
        check(unsafe { (self.open_handle)(&mut handle) })?;
        Ok(RawHandle(handle as usize))
    }

    fn close_handle(&self, handle: RawHandle) -> Result<(), Status> {
        // SAFETY: handle was produced by open_handle and not closed since;
        // Session enforces single ownership.
        check(unsafe { (self.close_handle)(handle.0 as *mut c_void) })
    }

    fn update_info(&self, handle: RawHandle) -> Result<(), Status> {
        // SAFETY: as above.
        check(unsafe { (self.update_info)(handle.0 as *mut c_void) })
    }

    fn session_id(&self, handle: RawHandle) -> Result<SessionId, Status> {
        let mut id: u64 = 0;
        // SAFETY: out-pointer to a local.
        check(unsafe { (self.get_session_id)(handle.0 as *mut c_void, &mut id) })?;
        Ok(id)
    }

    fn read_u32(&self, handle: RawHandle, field: CounterField) -> Result<u32, Status> {
        let getter = self
            .getter_u32(field)
            .ok_or(VMGUESTLIB_ERROR_INVALID_ARG)?;
        let mut value: u32 = 0;
        // SAFETY: out-pointer to a local; getter matches the field's width.
        check(unsafe { getter(handle.0 as *mut c_void, &mut value) })?;
        Ok(value)
    }

    fn read_u64(&self, handle: RawHandle, field: CounterField) -> Result<u64, Status> {
        let getter = self
            .getter_u64(field)
            .ok_or(VMGUESTLIB_ERROR_INVALID_ARG)?;
        let mut value: u64 = 0;
        // SAFETY: as above.
        check(unsafe { getter(handle.0 as *mut c_void, &mut value) })?;
        Ok(value)
    }

    fn error_text(&self, status: Status) -> Option<String> {
        // SAFETY: GetErrorText returns a pointer to a static string table
        // inside the library; it stays valid while the library is loaded.
        let ptr = unsafe { (self.get_error_text)(status as c_int) };
        if ptr.is_null() {
            return None;
        }
        let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        if text.is_empty() { None } else { Some(text) }
    }
}
