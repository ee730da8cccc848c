use std::ptr::NonNull;

use crate::abi::HResult;
use crate::error::{
    BridgeError,
    Result,
};

pub(crate) trait PtrCheckable<T> {
    fn to_non_null(self) -> Option<NonNull<T>>;

    fn to_non_null_else(self, error_gen: impl FnOnce() -> BridgeError) -> Result<NonNull<T>>
    where
        Self: Sized,
    {
        self.to_non_null().ok_or_else(error_gen)
    }
}

impl<T> PtrCheckable<T> for *mut T {
    fn to_non_null(self) -> Option<NonNull<T>> {
        NonNull::new(self)
    }
}

impl<T> PtrCheckable<T> for *const T {
    fn to_non_null(self) -> Option<NonNull<T>> {
        NonNull::new(self.cast_mut())
    }
}

pub(crate) trait StatusCheckable: Sized + Copy {
    fn if_failure_to_error(self) -> Result<Self>;
}

impl StatusCheckable for HResult {
    fn if_failure_to_error(self) -> Result<Self> {
        if self.is_failure() {
            Err(BridgeError::Native(self))
        } else {
            Ok(self)
        }
    }
}
