/*!
Interface identity and method-shape descriptions.
*/

use std::fmt;

use uuid::Uuid;

use crate::abi::{
    Value,
    ValueKind,
};

/// The 128-bit identifier naming one interface.
///
/// Identifiers are globally unique per interface, stable across process runs
/// and compared by exact equality only.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(Uuid);

impl InterfaceId {
    pub const fn from_u128(value: u128) -> Self {
        InterfaceId(Uuid::from_u128(value))
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        InterfaceId(Uuid::from_bytes(bytes))
    }

    pub const fn as_u128(self) -> u128 {
        self.0.as_u128()
    }

    /// Parses the canonical hyphenated form.
    pub fn parse_str(input: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(input).map(InterfaceId)
    }

    /// Generates a fresh random identifier.
    ///
    /// Real interfaces use fixed published identifiers; this is for
    /// process-local interfaces and tests.
    pub fn new_unique() -> Self {
        InterfaceId(Uuid::new_v4())
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({})", self.0)
    }
}

/// Well-known interface identifiers.
pub mod iid {
    use super::InterfaceId;

    /// The null identity. No real interface uses it.
    pub const NULL: InterfaceId = InterfaceId::from_u128(0);

    /// The identity-and-lifetime root every object answers for.
    pub const UNKNOWN: InterfaceId =
        InterfaceId::from_u128(0x00000000_0000_0000_C000_000000000046);
}

/// The calling convention a native method is published with.
///
/// Recorded as part of the signature so that the external call-through layer
/// knows how to lower the call; the bridge's own uniform slot frame is always
/// `extern "system"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallConv {
    #[default]
    System,
    C,
}

/// The shape of one interface method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: &'static str,
    pub call_conv: CallConv,
    pub params: Vec<ValueKind>,
    pub ret: ValueKind,
}

impl MethodSignature {
    pub fn new(name: &'static str, params: Vec<ValueKind>, ret: ValueKind) -> Self {
        MethodSignature {
            name,
            call_conv: CallConv::System,
            params,
            ret,
        }
    }

    /// Whether the marshaled arguments fit this signature's parameter shapes.
    pub fn matches_args(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(kind, value)| *kind == value.kind())
    }
}

/// One registered interface: its identifier and ordered method signatures.
///
/// The method order is part of the interface contract; it fixes the slot
/// order of every dispatch table built for or bound to this interface and is
/// never reordered after registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    id: InterfaceId,
    name: &'static str,
    methods: Vec<MethodSignature>,
}

impl InterfaceDescriptor {
    pub fn new(id: InterfaceId, name: &'static str, methods: Vec<MethodSignature>) -> Self {
        InterfaceDescriptor { id, name, methods }
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    /// The number of dispatch slots an implementation must provide.
    pub fn slot_count(&self) -> usize {
        self.methods.len()
    }
}
