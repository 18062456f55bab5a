//! Layout probe normalization.
//!
//! A probe is an element that is laid out but never shown: the hidden
//! measurement boxes used for font and rendering detection. Probes report
//! one fixed rectangle; every other element reports its real metrics. The
//! classification is redone on every call.

use js_sys::{Function, Reflect};
use wasm_bindgen::prelude::*;

use super::proxy_helpers::{call_method, find_owner, get_string, wrap_getter, wrap_method, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

/// Fixed rectangle reported for probes.
pub const PROBE_WIDTH: f64 = 100.0;
pub const PROBE_HEIGHT: f64 = 20.0;

/// Offsets below this count as "parked off screen".
pub const OFFSCREEN_THRESHOLD: f64 = -1000.0;

/// The computed-style fields probe classification looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
    pub position: String,
    pub left: String,
    pub top: String,
}

/// Leading decimal number of a CSS length (`"-9999px"` → -9999).
pub fn leading_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

impl ProbeStyle {
    pub fn is_probe(&self) -> bool {
        if self.display.trim() == "none" || self.visibility.trim() == "hidden" {
            return true;
        }
        if leading_number(&self.opacity) == Some(0.0) {
            return true;
        }
        let positioned = matches!(self.position.trim(), "absolute" | "fixed");
        let parked = |v: &str| leading_number(v).map_or(false, |n| n < OFFSCREEN_THRESHOLD);
        positioned && (parked(&self.left) || parked(&self.top))
    }
}

/// Layout getters and where they are defined.
const DIMENSION_GETTERS: &[(&str, &str)] = &[
    ("HTMLElement", "offsetWidth"),
    ("HTMLElement", "offsetHeight"),
    ("Element", "clientWidth"),
    ("Element", "clientHeight"),
];

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let mut wrapped = 0;
    if isolated("layout.getBoundingClientRect", || wrap_bounding_rect(realm)) {
        wrapped += 1;
    }
    for (ctor, name) in DIMENSION_GETTERS {
        if isolated(name, || wrap_dimension(realm, ctor, *name)) {
            wrapped += 1;
        }
    }
    if wrapped == 0 {
        return Err(FingerprintError::missing("Element"));
    }
    Ok(())
}

/// Read the computed style of `element` and classify it. Only HTML
/// elements are ever probes.
fn classify(realm: &Realm, element: &JsValue) -> Result<bool> {
    if !realm.is_instance(element, "HTMLElement") {
        return Ok(false);
    }
    let style = call_method(realm.global(), "getComputedStyle", &[element.clone()])?;
    let field = |name: &str| get_string(&style, name).unwrap_or_default();
    let style = ProbeStyle {
        display: field("display"),
        visibility: field("visibility"),
        opacity: field("opacity"),
        position: field("position"),
        left: field("left"),
        top: field("top"),
    };
    Ok(style.is_probe())
}

fn wrap_bounding_rect(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("Element")?;
    let realm = realm.clone();
    wrap_method(&proto, "getBoundingClientRect", move |original, this, args| {
        if classify(&realm, this)? {
            realm.construct(
                "DOMRect",
                &[
                    JsValue::from_f64(0.0),
                    JsValue::from_f64(0.0),
                    JsValue::from_f64(PROBE_WIDTH),
                    JsValue::from_f64(PROBE_HEIGHT),
                ],
            )
        } else {
            Ok(Reflect::apply(original, this, args)?)
        }
    })
}

fn wrap_dimension(realm: &Realm, ctor: &str, name: &'static str) -> Result<()> {
    let proto = realm.prototype(ctor)?;
    let owner = find_owner(&proto, name).ok_or_else(|| FingerprintError::missing(name))?;
    let probe_value = if name.ends_with("Width") {
        PROBE_WIDTH
    } else {
        PROBE_HEIGHT
    };
    let realm = realm.clone();
    wrap_getter(&owner, name, move |getter: &Function, this| {
        if classify(&realm, this)? {
            Ok(JsValue::from_f64(probe_value))
        } else {
            Ok(getter.call0(this)?)
        }
    })
}
