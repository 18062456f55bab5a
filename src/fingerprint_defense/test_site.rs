//! Aggressive blocker for fingerprint-testing sites.
//!
//! On allowlisted hosts the normalizer does not run. Instead canvas
//! contexts cannot be obtained and the audio context constructors are
//! gone, so a test page measures nothing at all.

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use super::descriptor::define_value;
use super::guard::{GlobalFlagSlot, LifecycleGuard, TEST_SITE_GUARD_KEY};
use super::proxy_helpers::{to_dom_string, wrap_method, Realm};
use crate::error::{isolated, FingerprintError, Result};

/// Context ids `getContext` refuses.
pub const BLOCKED_CONTEXTS: &[&str] = &["2d", "webgl", "webgl2", "experimental-webgl"];

/// Audio constructors removed from the global object.
pub const REMOVED_AUDIO_CONSTRUCTORS: &[&str] = &[
    "AudioContext",
    "webkitAudioContext",
    "OfflineAudioContext",
    "webkitOfflineAudioContext",
];

pub fn is_blocked_context(context_id: &str) -> bool {
    BLOCKED_CONTEXTS
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(context_id))
}

/// Install the blocker once per document. Returns the steps that ran, or
/// `None` when this document was already blocked.
pub fn block(realm: &Realm) -> Option<Vec<&'static str>> {
    let guard = LifecycleGuard::new(GlobalFlagSlot::new(realm.global(), TEST_SITE_GUARD_KEY));
    if !guard.enter() {
        log::debug!("test-site blocker already installed");
        return None;
    }
    let mut applied = Vec::new();
    if isolated("getContext", || block_contexts(realm)) {
        applied.push("canvasContexts");
    }
    if isolated("AudioContext", || remove_audio(realm)) {
        applied.push("audioContexts");
    }
    Some(applied)
}

fn block_contexts(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("HTMLCanvasElement")?;
    wrap_method(&proto, "getContext", |original, this, args| {
        if args.length() == 0 {
            return Ok(Reflect::apply(original, this, args)?);
        }
        let id = to_dom_string(&args.get(0))?;
        if is_blocked_context(&id) {
            return Ok(JsValue::NULL);
        }
        args.set(0, JsValue::from_str(&id));
        Ok(Reflect::apply(original, this, args)?)
    })
}

fn remove_audio(realm: &Realm) -> Result<()> {
    let global: JsValue = realm.global().clone().into();
    let mut removed = 0;
    for name in REMOVED_AUDIO_CONSTRUCTORS {
        if realm.get(name).is_none() {
            continue;
        }
        if define_value(&global, name, JsValue::UNDEFINED).landed() {
            removed += 1;
        } else {
            log::debug!("{} could not be removed", name);
        }
    }
    if removed == 0 {
        return Err(FingerprintError::missing("AudioContext"));
    }
    Ok(())
}
