/*!
Native-callable dispatch tables for Rust objects.

A table is built once per (concrete type, interface) pair and shared by every
instance of that type. Each slot is a thunk that checks the marshaled
arguments, invokes the bound Rust function and translates the outcome into
the native status convention. A failure that cannot be expressed as a status
code never crosses the boundary: it aborts the process instead of unwinding
into native frames.
*/

use std::any::{
    Any,
    TypeId,
};
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::panic::{
    self,
    AssertUnwindSafe,
};
use std::slice;
use std::sync::{
    Arc,
    RwLock,
};

use crate::abi::{
    HResult,
    Value,
};
use crate::error::{
    BridgeError,
    Result,
};
use crate::interface::{
    InterfaceDescriptor,
    InterfaceId,
};
use crate::registry::InterfaceRegistry;

/// One slot implementation: receives the object and the marshaled arguments,
/// returns the marshaled result or a failure status.
pub type SlotFn<T> = fn(&T, &[Value]) -> std::result::Result<Value, HResult>;

/// The slots a type provides for one interface, in descriptor slot order.
pub struct InterfaceBinding<T: 'static> {
    pub id: InterfaceId,
    pub slots: &'static [SlotFn<T>],
}

/// A Rust type that native code may hold through dispatch tables.
pub trait ComVisible: Any {
    /// The interfaces this type exposes. Identifiers must be unique within
    /// the list, and each binding's slots must match the registered
    /// descriptor's method order exactly.
    fn bindings() -> &'static [InterfaceBinding<Self>]
    where
        Self: Sized;
}

type RawThunk = unsafe extern "system" fn(
    state: *const (),
    this: *const c_void,
    args: *const Value,
    arg_count: usize,
    ret: *mut Value,
) -> HResult;

struct DispatchSlot {
    state: *const (),
    thunk: RawThunk,
}

/// An ordered, index-addressed array of callable entry points realizing one
/// interface for one concrete Rust type.
pub struct DispatchTable {
    type_id: TypeId,
    descriptor: Arc<InterfaceDescriptor>,
    slots: Box<[DispatchSlot]>,
}

// SAFETY: every slot's `state` is a plain `fn` pointer; the table holds no
// thread-bound data.
unsafe impl Send for DispatchTable {}
unsafe impl Sync for DispatchTable {}

impl DispatchTable {
    pub fn id(&self) -> InterfaceId {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn check_call(&self, slot: usize, args: &[Value]) -> Result<()> {
        let signature = self.descriptor.methods().get(slot).ok_or_else(|| {
            BridgeError::SlotOutOfRange {
                id: self.id(),
                slot,
                count: self.slot_count(),
            }
        })?;
        if signature.matches_args(args) {
            Ok(())
        } else {
            Err(BridgeError::SignatureMismatch { id: self.id(), slot })
        }
    }

    /// Native-facing dispatch. Never unwinds and never returns a Rust
    /// error; every failure is a status code.
    ///
    /// # Safety
    ///
    /// `this` must point to a live object of the concrete type the table
    /// was built for.
    pub unsafe fn invoke_raw(
        &self,
        slot: usize,
        this: *const c_void,
        args: &[Value],
        ret: &mut Value,
    ) -> HResult {
        if self.check_call(slot, args).is_err() {
            return HResult::INVALID_ARGUMENT;
        }
        let entry = &self.slots[slot];
        unsafe { (entry.thunk)(entry.state, this, args.as_ptr(), args.len(), ret) }
    }

    /// Typed dispatch for managed-side callers: checks that `object` is of
    /// the table's concrete type, then routes through the same thunks as
    /// [`DispatchTable::invoke_raw`].
    pub fn invoke_on<T: ComVisible>(&self, object: &T, slot: usize, args: &[Value]) -> Result<Value> {
        if TypeId::of::<T>() != self.type_id {
            return Err(BridgeError::TypeMismatch);
        }
        self.check_call(slot, args)?;
        let mut ret = Value::Empty;
        // SAFETY: `object` is live and of the table's concrete type.
        let status =
            unsafe { self.invoke_raw(slot, (object as *const T).cast(), args, &mut ret) };
        if status.is_success() {
            Ok(ret)
        } else {
            Err(BridgeError::Native(status))
        }
    }
}

unsafe extern "system" fn slot_thunk<T: ComVisible>(
    state: *const (),
    this: *const c_void,
    args: *const Value,
    arg_count: usize,
    ret: *mut Value,
) -> HResult {
    // SAFETY: `state` was produced from a `SlotFn<T>` when the table was
    // built for exactly this instantiation.
    let binding: SlotFn<T> = unsafe { mem::transmute(state) };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the dispatching table guarantees `this` points to a live
        // `T` and `args` to `arg_count` values.
        let object = unsafe { &*this.cast::<T>() };
        let args = if arg_count == 0 {
            &[]
        } else {
            unsafe { slice::from_raw_parts(args, arg_count) }
        };
        binding(object, args)
    }));
    match outcome {
        Ok(Ok(value)) => {
            // SAFETY: `ret` is a valid out slot supplied by the dispatcher.
            unsafe { ret.write(value) };
            HResult::OK
        }
        // A success code on the failure path would desynchronize the two
        // sides; keep the failure bit set.
        Ok(Err(status)) if status.is_success() => HResult::UNEXPECTED,
        Ok(Err(status)) => status,
        Err(_) => fatal_boundary_violation(),
    }
}

/// A managed failure that has no status-code translation is a contract
/// breach between the two sides: unwinding would corrupt native frames and
/// swallowing it would hide the breach.
fn fatal_boundary_violation() -> ! {
    tracing::error!("unconvertible failure reached the dispatch boundary; aborting");
    std::process::abort();
}

/// Pairs an interface identifier with the dispatch table realizing it; the
/// per-type list of these is what native identity negotiation walks.
pub struct IdentityEntry {
    pub id: InterfaceId,
    pub table: Arc<DispatchTable>,
}

/// Builds and caches dispatch tables per (concrete type, interface) pair.
pub struct VtableFactory {
    registry: Arc<InterfaceRegistry>,
    cache: RwLock<HashMap<(TypeId, InterfaceId), Arc<DispatchTable>>>,
}

impl VtableFactory {
    pub fn new(registry: Arc<InterfaceRegistry>) -> Self {
        VtableFactory {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the dispatch table realizing `id` for `T`, building it on
    /// first use. Repeated calls return the same shared table; rebuilding
    /// per object instance never happens.
    pub fn build_table<T: ComVisible>(&self, id: InterfaceId) -> Result<Arc<DispatchTable>> {
        let key = (TypeId::of::<T>(), id);
        if let Some(table) = self.cache.read().expect("vtable cache lock poisoned").get(&key) {
            return Ok(Arc::clone(table));
        }
        let descriptor = self
            .registry
            .resolve(id)
            .ok_or(BridgeError::UnsupportedInterface { id })?;
        let binding = T::bindings()
            .iter()
            .find(|binding| binding.id == id)
            .ok_or(BridgeError::UnsupportedInterface { id })?;
        if binding.slots.len() != descriptor.slot_count() {
            return Err(BridgeError::SlotCountMismatch {
                id,
                provided: binding.slots.len(),
                declared: descriptor.slot_count(),
            });
        }
        let slots = binding
            .slots
            .iter()
            .map(|&slot| DispatchSlot {
                state: slot as *const (),
                thunk: slot_thunk::<T>,
            })
            .collect();
        let table = Arc::new(DispatchTable {
            type_id: TypeId::of::<T>(),
            descriptor,
            slots,
        });
        // Concurrent first builds may race; only the first inserted table
        // becomes live, duplicates are discarded here.
        let mut cache = self.cache.write().expect("vtable cache lock poisoned");
        let table = Arc::clone(cache.entry(key).or_insert(table));
        tracing::debug!(%id, "dispatch table ready");
        Ok(table)
    }

    /// The identity entries for `T`: one per interface that is both bound
    /// by the type and registered. A type exposing nothing registered gets
    /// an empty list, signaling callers not to treat it as dispatchable.
    pub fn compute_vtables<T: ComVisible>(&self) -> Result<Vec<IdentityEntry>> {
        let mut seen: Vec<InterfaceId> = Vec::new();
        let mut entries: Vec<IdentityEntry> = Vec::new();
        for binding in T::bindings() {
            if seen.contains(&binding.id) {
                return Err(BridgeError::ConflictingInterface { id: binding.id });
            }
            seen.push(binding.id);
            if self.registry.resolve(binding.id).is_none() {
                continue;
            }
            entries.push(IdentityEntry {
                id: binding.id,
                table: self.build_table::<T>(binding.id)?,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(DispatchTable: Send, Sync);
