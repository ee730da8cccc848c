/*!
Reference-count discipline across the boundary.

The native object owns its count; this ledger pairs every increment the
bridge causes with exactly one decrement. A [`Token`] is the unit of
ownership for one hold: it cannot be cloned, and releasing it consumes it,
so every acquire is matched by at most one release by construction.
*/

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;

use crate::error::{
    BridgeError,
    Result,
};

/// One reference-count hold on a native object.
///
/// Obtained from [`LifetimeManager::acquire`] and given back, by value, to
/// [`LifetimeManager::release`]. For carrying a hold across an FFI edge the
/// token can be flattened with [`Token::into_raw`]; a raw token that was
/// already released is detected dynamically on release.
#[derive(Debug)]
pub struct Token {
    id: u64,
}

impl Token {
    /// Flattens the token to its raw id, giving up compile-time tracking.
    pub fn into_raw(self) -> u64 {
        self.id
    }

    /// Rebuilds a token from [`Token::into_raw`]'s result.
    ///
    /// Releasing a stale or forged token is caught by the ledger and
    /// reported as [`BridgeError::UseAfterRelease`].
    pub fn from_raw(id: u64) -> Self {
        Token { id }
    }
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    /// Live token id -> target address.
    live: HashMap<u64, usize>,
    /// Target address -> net outstanding holds.
    holds: HashMap<usize, u32>,
}

/// Ledger of every hold the bridge has taken on native objects.
#[derive(Default)]
pub struct LifetimeManager {
    ledger: Mutex<Ledger>,
}

impl LifetimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one new hold on `target` and returns the token tracking it.
    ///
    /// The caller must have caused the matching native increment already;
    /// acquire happens before any use of the held object.
    pub fn acquire(&self, target: *mut c_void) -> Token {
        let mut ledger = self.ledger.lock().expect("lifetime ledger lock poisoned");
        let id = ledger.next_id;
        ledger.next_id += 1;
        let addr = target as usize;
        ledger.live.insert(id, addr);
        *ledger.holds.entry(addr).or_insert(0) += 1;
        tracing::trace!(token = id, object = addr, "acquired hold");
        Token { id }
    }

    /// Releases a hold. Releasing the same hold twice is a programming
    /// error and panics; see [`LifetimeManager::try_release`] for the
    /// value-returning form.
    pub fn release(&self, token: Token) {
        if self.try_release(token).is_err() {
            panic!("ownership token released twice");
        }
    }

    /// Releases a hold, reporting [`BridgeError::UseAfterRelease`] if the
    /// token does not correspond to a live hold.
    pub fn try_release(&self, token: Token) -> Result<()> {
        let mut ledger = self.ledger.lock().expect("lifetime ledger lock poisoned");
        match ledger.live.remove(&token.id) {
            Some(addr) => {
                let remaining = {
                    let count = ledger
                        .holds
                        .get_mut(&addr)
                        .expect("hold count missing for live token");
                    *count -= 1;
                    *count
                };
                if remaining == 0 {
                    ledger.holds.remove(&addr);
                }
                tracing::trace!(token = token.id, object = addr, remaining, "released hold");
                Ok(())
            }
            None => Err(BridgeError::UseAfterRelease),
        }
    }

    /// Net outstanding holds on one native object: positive while any proxy
    /// derived from it is live, zero once every one is disposed.
    pub fn live_holds(&self, target: *mut c_void) -> u32 {
        self.ledger
            .lock()
            .expect("lifetime ledger lock poisoned")
            .holds
            .get(&(target as usize))
            .copied()
            .unwrap_or(0)
    }

    /// Total live holds across all targets.
    pub fn total_live(&self) -> usize {
        self.ledger.lock().expect("lifetime ledger lock poisoned").live.len()
    }
}

#[cfg(test)]
static_assertions::assert_not_impl_any!(Token: Clone, Copy);

#[cfg(test)]
mod tests {
    use more_asserts::assert_gt;

    use super::*;

    fn target(n: usize) -> *mut c_void {
        n as *mut c_void
    }

    #[test]
    fn acquire_release_nets_to_zero() {
        let lifetimes = LifetimeManager::new();
        let a = lifetimes.acquire(target(0x1000));
        let b = lifetimes.acquire(target(0x1000));
        assert_eq!(lifetimes.live_holds(target(0x1000)), 2);
        lifetimes.release(a);
        assert_gt!(lifetimes.live_holds(target(0x1000)), 0);
        lifetimes.release(b);
        assert_eq!(lifetimes.live_holds(target(0x1000)), 0);
        assert_eq!(lifetimes.total_live(), 0);
    }

    #[test]
    fn targets_are_tracked_independently() {
        let lifetimes = LifetimeManager::new();
        let a = lifetimes.acquire(target(0x1000));
        let _b = lifetimes.acquire(target(0x2000));
        lifetimes.release(a);
        assert_eq!(lifetimes.live_holds(target(0x1000)), 0);
        assert_eq!(lifetimes.live_holds(target(0x2000)), 1);
    }

    #[test]
    fn raw_round_trip_keeps_the_hold_live() {
        let lifetimes = LifetimeManager::new();
        let raw = lifetimes.acquire(target(0x1000)).into_raw();
        assert_eq!(lifetimes.live_holds(target(0x1000)), 1);
        lifetimes.release(Token::from_raw(raw));
        assert_eq!(lifetimes.live_holds(target(0x1000)), 0);
    }

    #[test]
    fn double_release_is_rejected_without_corrupting_the_count() {
        let lifetimes = LifetimeManager::new();
        let keep = lifetimes.acquire(target(0x1000));
        let raw = lifetimes.acquire(target(0x1000)).into_raw();
        assert_eq!(lifetimes.try_release(Token::from_raw(raw)), Ok(()));
        assert_eq!(
            lifetimes.try_release(Token::from_raw(raw)),
            Err(BridgeError::UseAfterRelease),
        );
        // The unrelated hold is untouched.
        assert_eq!(lifetimes.live_holds(target(0x1000)), 1);
        lifetimes.release(keep);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn strict_release_panics_on_stale_token() {
        let lifetimes = LifetimeManager::new();
        let raw = lifetimes.acquire(target(0x1000)).into_raw();
        lifetimes.release(Token::from_raw(raw));
        lifetimes.release(Token::from_raw(raw));
    }
}
