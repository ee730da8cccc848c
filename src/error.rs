/*!
Error taxonomy of the bridge.

Interface-resolution failures are ordinary values returned to the caller;
lifecycle-discipline failures are programmer errors and surface loudly at the
point of misuse. Nothing in the bridge retries.
*/

use thiserror::Error;

use crate::abi::HResult;
use crate::interface::InterfaceId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The identifier is already registered with a different shape.
    #[error("interface {id} is already registered with a different descriptor")]
    ConflictingInterface { id: InterfaceId },

    /// No registered descriptor (or no binding) matches the identifier.
    #[error("interface {id} is not supported here")]
    UnsupportedInterface { id: InterfaceId },

    /// A proxy method was invoked for an interface that was never queried.
    #[error("interface {id} has not been bound on this proxy; query it first")]
    InterfaceNotBound { id: InterfaceId },

    /// An ownership token was released twice or used after release.
    #[error("ownership token was already released")]
    UseAfterRelease,

    /// The slot index lies beyond the interface's method list.
    #[error("slot {slot} is out of range for interface {id} ({count} methods)")]
    SlotOutOfRange {
        id: InterfaceId,
        slot: usize,
        count: usize,
    },

    /// A binding or native table provides a different number of slots than
    /// the descriptor declares.
    #[error("interface {id} provides {provided} slots, descriptor declares {declared}")]
    SlotCountMismatch {
        id: InterfaceId,
        provided: usize,
        declared: usize,
    },

    /// Arguments do not match the registered method signature.
    #[error("interface {id} slot {slot}: arguments do not match the registered signature")]
    SignatureMismatch { id: InterfaceId, slot: usize },

    /// A dispatch table was used with an object of a different concrete type.
    #[error("dispatch table was built for a different concrete type")]
    TypeMismatch,

    /// The native side reported a failure status.
    #[error("native call failed with status {0}")]
    Native(HResult),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
