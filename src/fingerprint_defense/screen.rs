//! Screen and window geometry.
//!
//! `screen.*` and the outer window size come from the profile. The inner
//! viewport is read live and quantized on every read, so responsive
//! layouts still react to resizes.

use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::descriptor::{define_getter, define_value};
use super::profile::{quantize, IdentityProfile, NormalizedDefaults, Viewport};
use super::proxy_helpers::{get_f64, Realm};
use super::PassContext;
use crate::error::Result;

/// Height reserved for a taskbar in `availHeight`.
pub const TASKBAR_HEIGHT: u32 = 40;

pub fn screen_values(profile: &IdentityProfile) -> Vec<(&'static str, f64)> {
    let width = profile.screen_width as f64;
    let height = profile.screen_height as f64;
    vec![
        ("width", width),
        ("height", height),
        ("availWidth", width),
        ("availHeight", height - TASKBAR_HEIGHT.min(profile.screen_height) as f64),
        ("availLeft", 0.0),
        ("availTop", 0.0),
        ("colorDepth", profile.color_depth as f64),
        ("pixelDepth", profile.pixel_depth as f64),
    ]
}

pub fn window_values(profile: &IdentityProfile) -> Vec<(&'static str, f64)> {
    vec![
        ("devicePixelRatio", 1.0),
        ("outerWidth", profile.screen_width as f64),
        ("outerHeight", profile.screen_height as f64),
        ("screenX", 0.0),
        ("screenY", 0.0),
        ("screenLeft", 0.0),
        ("screenTop", 0.0),
    ]
}

/// Real viewport size, read before any override lands.
pub fn read_viewport(realm: &Realm) -> Option<Viewport> {
    let global = realm.global();
    Some(Viewport {
        width: get_f64(global, "innerWidth")?,
        height: get_f64(global, "innerHeight")?,
    })
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm, &ctx.profile)
}

pub fn apply_to_realm(realm: &Realm, profile: &Rc<IdentityProfile>) -> Result<()> {
    if let Some(screen) = realm.get("screen") {
        for (name, value) in screen_values(profile) {
            define_value(&screen, name, JsValue::from_f64(value));
        }
    }

    let window: JsValue = realm.global().clone().into();
    for (name, value) in window_values(profile) {
        define_value(&window, name, JsValue::from_f64(value));
    }
    apply_inner_size(&window, "innerWidth", profile.screen_width)?;
    apply_inner_size(&window, "innerHeight", profile.screen_height)?;
    Ok(())
}

/// Replace `innerWidth`/`innerHeight` with a quantized view of the real
/// getter. Falls back to the profile value when the real one is unusable.
fn apply_inner_size(window: &JsValue, name: &'static str, fallback: u32) -> Result<()> {
    let descriptor = find_getter(window, name)?;
    let target = window.clone();
    define_getter(window, name, move || {
        let raw = match &descriptor {
            Some(getter) => Reflect::apply(getter, &target, &Array::new())
                .ok()
                .and_then(|v| v.as_f64()),
            None => None,
        };
        let value = raw
            .and_then(|v| quantize(v, NormalizedDefaults::VIEWPORT_STEP))
            .unwrap_or(fallback);
        JsValue::from_f64(value as f64)
    });
    Ok(())
}

/// The real accessor for `name`, if any object on the chain defines one.
fn find_getter(target: &JsValue, name: &str) -> Result<Option<Function>> {
    let key = JsValue::from_str(name);
    let mut current: JsValue = target.clone();
    while current.is_object() {
        let descriptor =
            Object::get_own_property_descriptor(current.unchecked_ref::<Object>(), &key);
        if !descriptor.is_undefined() {
            let getter = Reflect::get(&descriptor, &JsValue::from_str("get"))?;
            return Ok(getter.is_function().then(|| getter.unchecked_into()));
        }
        current = Object::get_prototype_of(&current).into();
    }
    Ok(None)
}
