/*!
Windows COM runtime glue.

The bridge core is platform-neutral; this module supplies the pieces that
only exist on Windows: per-thread COM apartment initialization, task-memory
cleanup and conversions between the bridge's identity/status types and the
OS ones.
*/

use std::cell::Cell;
use std::io;

use windows::core::GUID;
use windows::Win32::System::Com::{
    CoInitializeEx,
    CoTaskMemFree,
    COINIT_APARTMENTTHREADED,
};

use crate::abi::HResult;
use crate::interface::InterfaceId;

/// Initializes the COM library for the current thread. Will do nothing on
/// further calls from the same thread.
pub fn initialize_com() -> io::Result<()> {
    thread_local! {
        static COM_INITIALIZED: Cell<bool> = const { Cell::new(false) };
    }
    COM_INITIALIZED.with(|initialized| {
        if !initialized.get() {
            let result = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
            if result.is_ok() {
                initialized.set(true);
                Ok(())
            } else {
                Err(windows::core::Error::from(result).into())
            }
        } else {
            Ok(())
        }
    })
}

/// COM task memory location to be automatically freed.
#[derive(Debug)]
pub struct ComTaskMemory<T>(pub *mut T);

impl<T> From<*mut T> for ComTaskMemory<T> {
    fn from(value: *mut T) -> Self {
        ComTaskMemory(value)
    }
}

impl<T> Drop for ComTaskMemory<T> {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) }
    }
}

impl From<GUID> for InterfaceId {
    fn from(guid: GUID) -> Self {
        InterfaceId::from_u128(guid.to_u128())
    }
}

impl From<InterfaceId> for GUID {
    fn from(id: InterfaceId) -> Self {
        GUID::from_u128(id.as_u128())
    }
}

impl From<windows::core::HRESULT> for HResult {
    fn from(code: windows::core::HRESULT) -> Self {
        HResult(code.0)
    }
}

impl From<HResult> for windows::core::HRESULT {
    fn from(status: HResult) -> Self {
        windows::core::HRESULT(status.0)
    }
}
