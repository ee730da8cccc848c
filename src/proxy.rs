/*!
Universal proxy over native COM-style objects.

One [`Proxy`] type serves any number of unrelated interfaces behind the same
native pointer: interfaces are attached at runtime through the query
protocol, not through one generated proxy type per interface. Every
successful bind carries one native reference, tracked by a lifetime token
and released deterministically when the proxy is dropped.
*/

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::{
    self,
    NonNull,
};
use std::sync::Arc;

use crate::abi::{
    HResult,
    RawTable,
    RawUnknown,
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
use crate::internal::{
    PtrCheckable,
    StatusCheckable,
};
use crate::lifetime::{
    LifetimeManager,
    Token,
};
use crate::registry::InterfaceRegistry;

/// Produces proxies for native object pointers handed across the boundary.
pub struct ProxyProvider {
    registry: Arc<InterfaceRegistry>,
    lifetimes: Arc<LifetimeManager>,
}

impl ProxyProvider {
    pub fn new(registry: Arc<InterfaceRegistry>, lifetimes: Arc<LifetimeManager>) -> Self {
        ProxyProvider {
            registry,
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> &Arc<LifetimeManager> {
        &self.lifetimes
    }

    /// Wraps a native object claiming to support `id`.
    ///
    /// Performs the native query for `id`; on success the object has added
    /// exactly one reference, which the returned proxy owns and releases on
    /// drop. A native "no interface" answer fails the wrap and leaves the
    /// reference count untouched.
    ///
    /// # Safety
    ///
    /// `object` must point to a live native object whose first field is a
    /// valid [`RawUnknownVtbl`](crate::abi::RawUnknownVtbl) pointer, and it
    /// must stay live for as long as the object's reference count is held
    /// above zero by this bridge.
    pub unsafe fn wrap(&self, object: NonNull<RawUnknown>, id: InterfaceId) -> Result<Proxy> {
        let descriptor = self
            .registry
            .resolve(id)
            .ok_or(BridgeError::UnsupportedInterface { id })?;
        // SAFETY: `object` is live per the caller's contract.
        let table = unsafe { query_raw(object, &id) }?
            .ok_or(BridgeError::UnsupportedInterface { id })?;
        // SAFETY: same contract; `table` came from a successful query.
        let bound = unsafe { bind(object, descriptor, table, &self.lifetimes, id) }?;
        tracing::debug!(%id, "wrapped native object");
        let mut bound_map = HashMap::new();
        bound_map.insert(id, bound);
        Ok(Proxy {
            object,
            bound: bound_map,
            lifetimes: Arc::clone(&self.lifetimes),
            registry: Arc::clone(&self.registry),
        })
    }
}

struct BoundInterface {
    descriptor: Arc<InterfaceDescriptor>,
    table: NonNull<RawTable>,
    token: Token,
}

/// A managed stand-in for one native object.
///
/// Calls are issued per bound interface and slot; interfaces the object was
/// never queried for must be attached with [`Proxy::query_interface`] before
/// use. Dropping the proxy releases every native reference it holds, on
/// every exit path.
pub struct Proxy {
    object: NonNull<RawUnknown>,
    bound: HashMap<InterfaceId, BoundInterface>,
    lifetimes: Arc<LifetimeManager>,
    registry: Arc<InterfaceRegistry>,
}

impl Proxy {
    pub fn is_bound(&self, id: InterfaceId) -> bool {
        self.bound.contains_key(&id)
    }

    pub fn bound_interfaces(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.bound.keys().copied()
    }

    /// Asks the native object whether it supports `id` and, if so, binds
    /// the interface on this proxy.
    ///
    /// Returns `Ok(false)` for "not supported" (native refusal, or no
    /// registered descriptor to validate calls against) without touching
    /// the reference count. A successful bind takes the one reference the
    /// query protocol implies and tracks it until the proxy is dropped.
    /// Re-querying an already-bound identifier returns the cached binding
    /// and takes no new reference.
    pub fn query_interface(&mut self, id: InterfaceId) -> Result<bool> {
        if self.bound.contains_key(&id) {
            return Ok(true);
        }
        let Some(descriptor) = self.registry.resolve(id) else {
            tracing::debug!(%id, "query for unregistered interface");
            return Ok(false);
        };
        // SAFETY: the object was live at wrap time and the bound holds keep
        // its reference count above zero.
        let Some(table) = (unsafe { query_raw(self.object, &id) }?) else {
            return Ok(false);
        };
        // SAFETY: same contract; `table` came from a successful query.
        let bound = unsafe { bind(self.object, descriptor, table, &self.lifetimes, id) }?;
        self.bound.insert(id, bound);
        Ok(true)
    }

    /// Calls slot `slot` of the bound interface `id`.
    ///
    /// The interface must have been bound first (at wrap, or by
    /// [`Proxy::query_interface`]); calling through an unbound interface is
    /// [`BridgeError::InterfaceNotBound`].
    pub fn call(&self, id: InterfaceId, slot: usize, args: &[Value]) -> Result<Value> {
        let bound = self
            .bound
            .get(&id)
            .ok_or(BridgeError::InterfaceNotBound { id })?;
        let signature =
            bound
                .descriptor
                .methods()
                .get(slot)
                .ok_or(BridgeError::SlotOutOfRange {
                    id,
                    slot,
                    count: bound.descriptor.slot_count(),
                })?;
        if !signature.matches_args(args) {
            return Err(BridgeError::SignatureMismatch { id, slot });
        }
        // SAFETY: binding verified the table covers every descriptor slot,
        // and the tracked reference keeps table and object live.
        let slot_fn = unsafe { *bound.table.as_ref().slots.add(slot) };
        let mut ret = Value::Empty;
        // SAFETY: the slot is called with the object it belongs to and a
        // valid argument frame.
        let status =
            unsafe { slot_fn(self.object.as_ptr().cast(), args.as_ptr(), args.len(), &mut ret) };
        status.if_failure_to_error()?;
        Ok(ret)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        for (id, bound) in self.bound.drain() {
            // One native release per tracked reference.
            // SAFETY: the reference being released kept the object live.
            unsafe { release_raw(self.object) };
            self.lifetimes.release(bound.token);
            tracing::trace!(%id, "released interface hold");
        }
    }
}

/// Issues the native interface negotiation. `Ok(None)` is the "no
/// interface" answer; on `Ok(Some(_))` the object has added one reference.
///
/// # Safety
///
/// `object` must point to a live native object with a valid header.
unsafe fn query_raw(
    object: NonNull<RawUnknown>,
    id: &InterfaceId,
) -> Result<Option<NonNull<RawTable>>> {
    // SAFETY: `object` is live per the caller's contract.
    let vtbl = unsafe { object.as_ref() }
        .vtbl
        .to_non_null_else(|| BridgeError::Native(HResult::INVALID_POINTER))?;
    let mut table: *const RawTable = ptr::null();
    // SAFETY: the header slots are callable per the same contract.
    let status = unsafe { (vtbl.as_ref().query)(object.as_ptr().cast(), id, &mut table) };
    if status == HResult::NO_INTERFACE {
        return Ok(None);
    }
    status.if_failure_to_error()?;
    let table = table.to_non_null_else(|| BridgeError::Native(HResult::INVALID_POINTER))?;
    Ok(Some(table))
}

/// Validates a freshly queried table and records the hold it implies. On
/// validation failure the query's reference is given back before erroring.
///
/// # Safety
///
/// `object` must be live and `table` must come from a successful query on it.
unsafe fn bind(
    object: NonNull<RawUnknown>,
    descriptor: Arc<InterfaceDescriptor>,
    table: NonNull<RawTable>,
    lifetimes: &LifetimeManager,
    id: InterfaceId,
) -> Result<BoundInterface> {
    // SAFETY: `table` is live while the query's reference is held.
    let provided = unsafe { table.as_ref() }.slot_count;
    if provided < descriptor.slot_count() {
        // SAFETY: undoes the reference the successful query implied.
        unsafe { release_raw(object) };
        return Err(BridgeError::SlotCountMismatch {
            id,
            provided,
            declared: descriptor.slot_count(),
        });
    }
    let token = lifetimes.acquire(object.as_ptr().cast::<c_void>());
    Ok(BoundInterface {
        descriptor,
        table,
        token,
    })
}

/// # Safety
///
/// `object` must be live and the caller must own a reference to give back.
unsafe fn release_raw(object: NonNull<RawUnknown>) {
    // SAFETY: `object` is live per the caller's contract.
    if let Some(vtbl) = unsafe { object.as_ref() }.vtbl.to_non_null() {
        // SAFETY: the header slots are callable per the same contract.
        unsafe { (vtbl.as_ref().release)(object.as_ptr().cast()) };
    }
}

#[cfg(test)]
static_assertions::assert_not_impl_any!(Proxy: Send, Sync);

#[cfg(test)]
mod tests {
    use std::slice;
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };

    use crate::abi::{
        RawSlotFn,
        RawUnknownVtbl,
        ValueKind,
    };
    use crate::interface::MethodSignature;

    use super::*;

    const DRAWABLE: InterfaceId = InterfaceId::from_u128(0xFACE_0001);
    const AUDIBLE: InterfaceId = InterfaceId::from_u128(0xFACE_0002);
    const MISSING: InterfaceId = InterfaceId::from_u128(0xFACE_0003);

    /// A native-style object: header first, then its own state and tables.
    #[repr(C)]
    struct FakeNative {
        header: RawUnknown,
        refs: AtomicU32,
        drawable: RawTable,
        audible: RawTable,
    }

    static FAKE_VTBL: RawUnknownVtbl = RawUnknownVtbl {
        query: fake_query,
        add_ref: fake_add_ref,
        release: fake_release,
    };

    static DRAW_SLOTS: [RawSlotFn; 1] = [native_draw];
    static BEEP_SLOTS: [RawSlotFn; 1] = [native_beep];

    unsafe extern "system" fn fake_query(
        this: *mut c_void,
        id: *const InterfaceId,
        table: *mut *const RawTable,
    ) -> HResult {
        let this = unsafe { &*this.cast::<FakeNative>() };
        let id = unsafe { *id };
        let found = if id == DRAWABLE {
            &this.drawable
        } else if id == AUDIBLE {
            &this.audible
        } else {
            unsafe { table.write(ptr::null()) };
            return HResult::NO_INTERFACE;
        };
        this.refs.fetch_add(1, Ordering::SeqCst);
        unsafe { table.write(found) };
        HResult::OK
    }

    unsafe extern "system" fn fake_add_ref(this: *mut c_void) -> u32 {
        let this = unsafe { &*this.cast::<FakeNative>() };
        this.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    unsafe extern "system" fn fake_release(this: *mut c_void) -> u32 {
        let this = unsafe { &*this.cast::<FakeNative>() };
        this.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    unsafe extern "system" fn native_draw(
        _this: *mut c_void,
        args: *const Value,
        arg_count: usize,
        ret: *mut Value,
    ) -> HResult {
        let args = unsafe { slice::from_raw_parts(args, arg_count) };
        match (args[0], args[1]) {
            (Value::I32(x), Value::I32(y)) if x >= 0 => {
                unsafe { ret.write(Value::I32(x + y)) };
                HResult::OK
            }
            (Value::I32(_), Value::I32(_)) => HResult::FAIL,
            _ => HResult::INVALID_ARGUMENT,
        }
    }

    unsafe extern "system" fn native_beep(
        _this: *mut c_void,
        _args: *const Value,
        _arg_count: usize,
        ret: *mut Value,
    ) -> HResult {
        unsafe { ret.write(Value::Empty) };
        HResult::OK
    }

    impl FakeNative {
        fn boxed() -> Box<FakeNative> {
            Box::new(FakeNative {
                header: RawUnknown { vtbl: &FAKE_VTBL },
                refs: AtomicU32::new(0),
                drawable: RawTable {
                    slot_count: 1,
                    slots: DRAW_SLOTS.as_ptr(),
                },
                audible: RawTable {
                    slot_count: 1,
                    slots: BEEP_SLOTS.as_ptr(),
                },
            })
        }

        fn object(&self) -> NonNull<RawUnknown> {
            NonNull::from(self).cast()
        }

        fn refs(&self) -> u32 {
            self.refs.load(Ordering::SeqCst)
        }
    }

    fn provider() -> ProxyProvider {
        let registry = Arc::new(InterfaceRegistry::new());
        registry
            .register(InterfaceDescriptor::new(
                DRAWABLE,
                "IDrawable",
                vec![MethodSignature::new(
                    "draw",
                    vec![ValueKind::I32, ValueKind::I32],
                    ValueKind::I32,
                )],
            ))
            .expect("register drawable");
        registry
            .register(InterfaceDescriptor::new(
                AUDIBLE,
                "IAudible",
                vec![MethodSignature::new("beep", Vec::new(), ValueKind::Empty)],
            ))
            .expect("register audible");
        registry
            .register(InterfaceDescriptor::new(MISSING, "IMissing", Vec::new()))
            .expect("register missing");
        ProxyProvider::new(registry, Arc::new(LifetimeManager::new()))
    }

    #[test]
    fn wrap_takes_exactly_one_reference() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        assert_eq!(native.refs(), 0);

        let proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(native.refs(), 1);
        assert_eq!(
            provider.lifetimes().live_holds(native.object().as_ptr().cast()),
            1,
        );
        assert!(proxy.is_bound(DRAWABLE));
        assert_eq!(proxy.bound_interfaces().collect::<Vec<_>>(), vec![DRAWABLE]);

        drop(proxy);
        assert_eq!(native.refs(), 0);
        assert_eq!(
            provider.lifetimes().live_holds(native.object().as_ptr().cast()),
            0,
        );
        Ok(())
    }

    #[test]
    fn wrap_refusal_leaves_the_count_untouched() {
        let provider = provider();
        let native = FakeNative::boxed();
        let result = unsafe { provider.wrap(native.object(), MISSING) };
        assert_eq!(
            result.err(),
            Some(BridgeError::UnsupportedInterface { id: MISSING }),
        );
        assert_eq!(native.refs(), 0);
    }

    #[test]
    fn wrap_of_an_unregistered_interface_fails() {
        let provider = provider();
        let native = FakeNative::boxed();
        let unregistered = InterfaceId::new_unique();
        let result = unsafe { provider.wrap(native.object(), unregistered) };
        assert_eq!(
            result.err(),
            Some(BridgeError::UnsupportedInterface { id: unregistered }),
        );
        assert_eq!(native.refs(), 0);
    }

    #[test]
    fn calls_dispatch_through_the_borrowed_table() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(
            proxy.call(DRAWABLE, 0, &[Value::I32(10), Value::I32(20)])?,
            Value::I32(30),
        );
        Ok(())
    }

    #[test]
    fn native_failures_come_back_as_statuses() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(
            proxy.call(DRAWABLE, 0, &[Value::I32(-1), Value::I32(0)]),
            Err(BridgeError::Native(HResult::FAIL)),
        );
        Ok(())
    }

    #[test]
    fn arguments_are_checked_before_crossing() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(
            proxy.call(DRAWABLE, 0, &[Value::Bool(true)]),
            Err(BridgeError::SignatureMismatch {
                id: DRAWABLE,
                slot: 0,
            }),
        );
        assert_eq!(
            proxy.call(DRAWABLE, 3, &[]),
            Err(BridgeError::SlotOutOfRange {
                id: DRAWABLE,
                slot: 3,
                count: 1,
            }),
        );
        Ok(())
    }

    #[test]
    fn unqueried_interfaces_must_be_bound_first() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let mut proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;

        assert_eq!(
            proxy.call(AUDIBLE, 0, &[]),
            Err(BridgeError::InterfaceNotBound { id: AUDIBLE }),
        );

        assert!(proxy.query_interface(AUDIBLE)?);
        assert_eq!(native.refs(), 2);
        assert_eq!(proxy.call(AUDIBLE, 0, &[])?, Value::Empty);

        drop(proxy);
        assert_eq!(native.refs(), 0);
        Ok(())
    }

    #[test]
    fn unsupported_queries_report_without_touching_the_count() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let mut proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;

        assert!(!proxy.query_interface(MISSING)?);
        assert!(!proxy.query_interface(InterfaceId::new_unique())?);
        assert_eq!(native.refs(), 1);
        assert!(!proxy.is_bound(MISSING));
        Ok(())
    }

    #[test]
    fn requerying_a_bound_interface_takes_no_new_reference() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();
        let mut proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;

        assert!(proxy.query_interface(DRAWABLE)?);
        assert!(proxy.query_interface(DRAWABLE)?);
        assert_eq!(native.refs(), 1);
        Ok(())
    }

    #[test]
    fn outbound_and_inbound_agree_end_to_end() -> anyhow::Result<()> {
        use crate::vtable::{
            ComVisible,
            InterfaceBinding,
            VtableFactory,
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        struct Canvas;

        fn draw(_canvas: &Canvas, args: &[Value]) -> std::result::Result<Value, HResult> {
            match (args[0], args[1]) {
                (Value::I32(x), Value::I32(y)) => Ok(Value::I32(x + y)),
                _ => Err(HResult::INVALID_ARGUMENT),
            }
        }

        impl ComVisible for Canvas {
            fn bindings() -> &'static [InterfaceBinding<Self>] {
                const BINDINGS: &[InterfaceBinding<Canvas>] = &[InterfaceBinding {
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

        // Outbound: a native caller dispatches slot 0 of the built table.
        let factory = VtableFactory::new(Arc::clone(&registry));
        let table = factory.build_table::<Canvas>(DRAWABLE)?;
        let canvas = Canvas;
        let mut ret = Value::Empty;
        // SAFETY: `canvas` is the table's concrete type.
        let status = unsafe {
            table.invoke_raw(
                0,
                (&canvas as *const Canvas).cast(),
                &[Value::I32(10), Value::I32(20)],
                &mut ret,
            )
        };
        assert!(status.is_success());
        assert_eq!(ret, Value::I32(30));

        // Inbound: the same logical call through a wrapped native object,
        // with the reference count going 0 -> 1 -> 0.
        let provider = ProxyProvider::new(registry, Arc::new(LifetimeManager::new()));
        let native = FakeNative::boxed();
        assert_eq!(native.refs(), 0);
        let proxy = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(native.refs(), 1);
        assert_eq!(
            proxy.call(DRAWABLE, 0, &[Value::I32(10), Value::I32(20)])?,
            Value::I32(30),
        );
        drop(proxy);
        assert_eq!(native.refs(), 0);
        Ok(())
    }

    #[test]
    fn proxies_over_one_object_hold_independent_references() -> Result<()> {
        let provider = provider();
        let native = FakeNative::boxed();

        let first = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        let second = unsafe { provider.wrap(native.object(), DRAWABLE) }?;
        assert_eq!(native.refs(), 2);
        assert_eq!(
            provider.lifetimes().live_holds(native.object().as_ptr().cast()),
            2,
        );

        drop(first);
        assert_eq!(native.refs(), 1);
        drop(second);
        assert_eq!(native.refs(), 0);
        assert_eq!(
            provider.lifetimes().live_holds(native.object().as_ptr().cast()),
            0,
        );
        Ok(())
    }
}
