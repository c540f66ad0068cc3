//! Session lifecycle over a [`GuestLib`] implementation.
//!
//! A [`Session`] owns exactly one open handle. Closing consumes the session,
//! so a double close cannot be written; sessions dropped on error paths
//! release the handle best-effort.

use tracing::debug;

use crate::guestlib::{CounterField, GuestLib, RawHandle, SampleError, SessionId};

/// One open sampling session against the guest library.
pub struct Session<L: GuestLib> {
    lib: L,
    handle: Option<RawHandle>,
}

impl<L: GuestLib> Session<L> {
    /// Opens a handle. The session is not readable until the first
    /// [`Session::refresh`].
    pub fn open(lib: L) -> Result<Self, SampleError> {
        let handle = lib
            .open_handle()
            .map_err(|status| SampleError::handle(&lib, "VMGuestLib_OpenHandle", status))?;
        Ok(Self {
            lib,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> RawHandle {
        // Present from `open` until `close` takes it; `close` consumes the
        // session so no caller can observe the gap.
        self.handle.unwrap_or(RawHandle(0))
    }

    /// Re-synchronizes the handle's counter snapshot with the hypervisor.
    pub fn refresh(&mut self) -> Result<(), SampleError> {
        self.lib
            .update_info(self.handle())
            .map_err(|status| SampleError::handle(&self.lib, "VMGuestLib_UpdateInfo", status))
    }

    /// Session identity token as of the last refresh.
    pub fn session_id(&self) -> Result<SessionId, SampleError> {
        self.lib
            .session_id(self.handle())
            .map_err(|status| SampleError::handle(&self.lib, "VMGuestLib_GetSessionId", status))
    }

    /// Reads one 32-bit statistic from the refreshed snapshot.
    pub fn read_u32(&self, field: CounterField) -> Result<u32, SampleError> {
        self.lib
            .read_u32(self.handle(), field)
            .map_err(|status| SampleError::counter(&self.lib, field, status))
    }

    /// Reads one 64-bit millisecond counter from the refreshed snapshot.
    pub fn read_u64(&self, field: CounterField) -> Result<u64, SampleError> {
        self.lib
            .read_u64(self.handle(), field)
            .map_err(|status| SampleError::counter(&self.lib, field, status))
    }

    /// Releases the handle. Consumes the session, making a second close
    /// unrepresentable.
    pub fn close(mut self) -> Result<(), SampleError> {
        match self.handle.take() {
            Some(handle) => self
                .lib
                .close_handle(handle)
                .map_err(|status| SampleError::handle(&self.lib, "VMGuestLib_CloseHandle", status)),
            None => Ok(()),
        }
    }
}

impl<L: GuestLib> Drop for Session<L> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(status) = self.lib.close_handle(handle) {
                // Process exit reclaims the handle anyway.
                debug!(status, "closing leaked session handle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestlib::{
        MockGuestLib, VMGUESTLIB_ERROR_NOT_ENABLED, VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM,
    };

    #[test]
    fn open_refresh_read_close_round_trip() {
        let mut session = Session::open(MockGuestLib::typical_vm()).unwrap();
        session.refresh().unwrap();
        assert_eq!(session.read_u32(CounterField::MemUsedMb).unwrap(), 1400);
        assert_eq!(
            session.read_u64(CounterField::ElapsedMs).unwrap(),
            1_000_000
        );
        session.close().unwrap();
    }

    #[test]
    fn open_failure_names_the_operation() {
        let lib = MockGuestLib::new().fail_open(VMGUESTLIB_ERROR_NOT_RUNNING_IN_VM);
        let err = Session::open(lib).err().unwrap();
        let rendered = err.to_string();
        assert!(rendered.contains("VMGuestLib_OpenHandle"));
        assert!(rendered.contains("code 2"));
        assert!(rendered.contains("not running on a VMware virtual machine"));
    }

    #[test]
    fn refresh_failure_names_the_operation() {
        let lib = MockGuestLib::new().fail_update(VMGUESTLIB_ERROR_NOT_ENABLED);
        let mut session = Session::open(lib).unwrap();
        let err = session.refresh().err().unwrap();
        assert!(err.to_string().contains("VMGuestLib_UpdateInfo"));
    }

    #[test]
    fn counter_failure_names_the_field() {
        let lib = MockGuestLib::typical_vm()
            .fail_field(CounterField::MemSwappedMb, VMGUESTLIB_ERROR_NOT_ENABLED);
        let mut session = Session::open(lib).unwrap();
        session.refresh().unwrap();
        let err = session.read_u32(CounterField::MemSwappedMb).err().unwrap();
        assert!(err.to_string().contains("mem_swapped_mb"));
    }

    #[test]
    fn drop_releases_the_handle() {
        let lib = MockGuestLib::typical_vm();
        {
            let mut session = Session::open(&lib).unwrap();
            session.refresh().unwrap();
            assert!(lib.is_open());
        }
        assert!(!lib.is_open());
    }

    #[test]
    fn close_releases_the_handle() {
        let lib = MockGuestLib::typical_vm();
        let session = Session::open(&lib).unwrap();
        session.close().unwrap();
        assert!(!lib.is_open());
    }
}
