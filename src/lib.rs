/*!
A generic bridge between Rust objects and COM-style native interfaces.

The bridge works in both directions without per-interface generated glue:

- **Outbound** ([`vtable`]): a Rust type declares which interfaces it
  exposes, and the factory builds one shared, native-callable dispatch table
  per (type, interface) pair.
- **Inbound** ([`proxy`]): a raw native object pointer, known only by an
  interface identifier, is wrapped behind one universal [`proxy::Proxy`]
  that can bind any number of interfaces at runtime through the query
  protocol.

Interface shapes live in a process-scoped [`registry`]; every native
reference the bridge takes is paired with exactly one release by the
[`lifetime`] ledger. The boundary data shapes are in [`abi`]; on Windows,
[`com`] connects the bridge's identifiers and statuses to the OS COM
runtime.

# Example

```
use std::sync::Arc;

use combridge::abi::{HResult, Value, ValueKind};
use combridge::interface::{InterfaceDescriptor, InterfaceId, MethodSignature};
use combridge::registry::InterfaceRegistry;
use combridge::vtable::{ComVisible, InterfaceBinding, VtableFactory};

const DRAWABLE: InterfaceId = InterfaceId::from_u128(0x4452_4157);

struct Square;

fn draw(_square: &Square, args: &[Value]) -> Result<Value, HResult> {
    match (args[0], args[1]) {
        (Value::I32(x), Value::I32(y)) => Ok(Value::I32(x + y)),
        _ => Err(HResult::INVALID_ARGUMENT),
    }
}

impl ComVisible for Square {
    fn bindings() -> &'static [InterfaceBinding<Self>] {
        const BINDINGS: &[InterfaceBinding<Square>] = &[InterfaceBinding {
            id: DRAWABLE,
            slots: &[draw],
        }];
        BINDINGS
    }
}

let registry = Arc::new(InterfaceRegistry::new());
registry.register(InterfaceDescriptor::new(
    DRAWABLE,
    "IDrawable",
    vec![MethodSignature::new(
        "draw",
        vec![ValueKind::I32, ValueKind::I32],
        ValueKind::I32,
    )],
))?;

let factory = VtableFactory::new(registry);
let table = factory.build_table::<Square>(DRAWABLE)?;
assert_eq!(
    table.invoke_on(&Square, 0, &[Value::I32(10), Value::I32(20)])?,
    Value::I32(30),
);
# Ok::<(), combridge::error::BridgeError>(())
```
*/

pub mod abi;
#[cfg(windows)]
pub mod com;
pub mod error;
pub mod interface;
mod internal;
pub mod lifetime;
pub mod proxy;
pub mod registry;
pub mod vtable;
