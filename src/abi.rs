/*!
Data shapes shared with the native side of the bridge.

Everything in this module is part of the wire format of dispatch: slot order,
value layout and status codes must match what native callers expect exactly.
*/

use std::ffi::c_void;
use std::fmt;

use num_enum::{
    IntoPrimitive,
    TryFromPrimitive,
};

/// A marshaled argument or return value.
///
/// External type translators lower rich parameter types into this model
/// before a call crosses the boundary and raise results back out of it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Empty,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    F64(f64),
    Ptr(*mut c_void),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Empty => ValueKind::Empty,
            Value::Bool(_) => ValueKind::Bool,
            Value::I32(_) => ValueKind::I32,
            Value::U32(_) => ValueKind::U32,
            Value::I64(_) => ValueKind::I64,
            Value::F64(_) => ValueKind::F64,
            Value::Ptr(_) => ValueKind::Ptr,
        }
    }
}

/// The shape of a [`Value`], used in method signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Empty,
    Bool,
    I32,
    U32,
    I64,
    F64,
    Ptr,
}

/// A COM-style status code. Success is any non-negative value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const OK: Self = HResult(0);
    pub const FALSE: Self = HResult(1);
    pub const NOT_IMPLEMENTED: Self = HResult(0x8000_4001_u32 as i32);
    pub const NO_INTERFACE: Self = HResult(0x8000_4002_u32 as i32);
    pub const INVALID_POINTER: Self = HResult(0x8000_4003_u32 as i32);
    pub const FAIL: Self = HResult(0x8000_4005_u32 as i32);
    pub const UNEXPECTED: Self = HResult(0x8000_FFFF_u32 as i32);
    pub const OUT_OF_MEMORY: Self = HResult(0x8007_000E_u32 as i32);
    pub const INVALID_ARGUMENT: Self = HResult(0x8007_0057_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn is_failure(self) -> bool {
        !self.is_success()
    }

    /// Classifies the code if it is one of the well-known values.
    pub fn known(self) -> Option<KnownStatus> {
        KnownStatus::try_from_primitive(self.0 as u32).ok()
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(known) => write!(f, "HResult({:#010X}, {:?})", self.0 as u32, known),
            None => write!(f, "HResult({:#010X})", self.0 as u32),
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)
    }
}

/// Well-known status codes, by their standard names.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum KnownStatus {
    Ok = 0,
    False = 1,
    NotImplemented = 0x8000_4001,
    NoInterface = 0x8000_4002,
    InvalidPointer = 0x8000_4003,
    Fail = 0x8000_4005,
    Unexpected = 0x8000_FFFF,
    OutOfMemory = 0x8007_000E,
    InvalidArgument = 0x8007_0057,
}

impl From<KnownStatus> for HResult {
    fn from(status: KnownStatus) -> Self {
        HResult(u32::from(status) as i32)
    }
}

/// The uniform entry point signature of every dispatch slot.
///
/// `this` is the object the slot belongs to, `args` points at `arg_count`
/// marshaled values, and on a successful return the slot has written its
/// result to `ret`.
pub type RawSlotFn = unsafe extern "system" fn(
    this: *mut c_void,
    args: *const Value,
    arg_count: usize,
    ret: *mut Value,
) -> HResult;

/// A dispatch table owned by the native side and only borrowed by the bridge.
///
/// `slots` points at `slot_count` entries in the slot order fixed by the
/// interface descriptor.
#[repr(C)]
pub struct RawTable {
    pub slot_count: usize,
    pub slots: *const RawSlotFn,
}

/// The identity-and-lifetime header every wrappable native object leads with.
///
/// These three slots come before any interface methods, in this exact order.
#[repr(C)]
pub struct RawUnknownVtbl {
    /// Interface negotiation. On success the object stores the table for the
    /// requested identifier in `table` and adds one reference; reporting
    /// "no interface" must leave the reference count unchanged.
    pub query: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const crate::interface::InterfaceId,
        table: *mut *const RawTable,
    ) -> HResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

/// A pointer to any native object: the first field is the vtable header.
#[repr(C)]
pub struct RawUnknown {
    pub vtbl: *const RawUnknownVtbl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_split_on_sign() {
        assert!(HResult::OK.is_success());
        assert!(HResult::FALSE.is_success());
        assert!(HResult::NO_INTERFACE.is_failure());
        assert!(HResult::FAIL.is_failure());
    }

    #[test]
    fn known_codes_round_trip() {
        assert_eq!(HResult::NO_INTERFACE.known(), Some(KnownStatus::NoInterface));
        assert_eq!(HResult::from(KnownStatus::NoInterface), HResult::NO_INTERFACE);
        assert_eq!(HResult(0x1234_5678).known(), None);
    }

    #[test]
    fn value_reports_its_kind() {
        assert_eq!(Value::I32(10).kind(), ValueKind::I32);
        assert_eq!(Value::Empty.kind(), ValueKind::Empty);
        assert_eq!(Value::Ptr(std::ptr::null_mut()).kind(), ValueKind::Ptr);
    }
}
