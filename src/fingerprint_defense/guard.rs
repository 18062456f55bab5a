//! One-shot lifecycle guard.
//!
//! The host may run the bootstrap from several hooks for the same
//! document. The guard flag lives on the document's global object, so each
//! document (and each frame) has its own guard, and a second instantiation
//! of this module in the same document still sees the first one's flag.

use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;

use crate::error::{FingerprintError, Result};

/// Global key for the normalizer's guard.
pub const NORMALIZER_GUARD_KEY: &str = "__fpsNormalized";
/// Global key for the test-site blocker's guard.
pub const TEST_SITE_GUARD_KEY: &str = "__fpsTestSiteBlocked";

/// Storage for a single boolean that is never reset.
pub trait GuardSlot {
    fn is_set(&self) -> Result<bool>;
    fn set(&self) -> Result<()>;
}

/// Read-then-set gate. Only the first `enter` on a slot returns true.
pub struct LifecycleGuard<S: GuardSlot> {
    slot: S,
}

impl<S: GuardSlot> LifecycleGuard<S> {
    pub fn new(slot: S) -> Self {
        Self { slot }
    }

    /// Returns true exactly once per slot. A slot that cannot be read
    /// (for example a cross-origin window) is treated as already entered.
    pub fn enter(&self) -> bool {
        match self.slot.is_set() {
            Ok(true) => false,
            Ok(false) => {
                if let Err(err) = self.slot.set() {
                    log::warn!("guard flag could not be recorded: {}", err);
                }
                true
            }
            Err(err) => {
                log::debug!("guard unreadable: {}", err);
                false
            }
        }
    }

    /// Run `work` only if this call is the one that enters the guard.
    pub fn enter_then<T>(&self, work: impl FnOnce() -> T) -> Option<T> {
        if self.enter() {
            Some(work())
        } else {
            None
        }
    }

    pub fn is_entered(&self) -> bool {
        self.slot.is_set().unwrap_or(true)
    }
}

/// Guard flag stored as a hidden, read-only property of a global object.
pub struct GlobalFlagSlot {
    global: Object,
    key: &'static str,
}

impl GlobalFlagSlot {
    pub fn new(global: &Object, key: &'static str) -> Self {
        Self {
            global: global.clone(),
            key,
        }
    }
}

impl GuardSlot for GlobalFlagSlot {
    fn is_set(&self) -> Result<bool> {
        let value = Reflect::get(&self.global, &JsValue::from_str(self.key))?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn set(&self) -> Result<()> {
        let descriptor = Object::new();
        Reflect::set(&descriptor, &JsValue::from_str("value"), &JsValue::TRUE)?;
        // non-enumerable, non-writable, non-configurable by omission
        if Reflect::define_property(&self.global, &JsValue::from_str(self.key), &descriptor)? {
            Ok(())
        } else {
            Err(FingerprintError::refused(self.key))
        }
    }
}
