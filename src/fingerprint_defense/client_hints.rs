//! User-agent client hints (`navigator.userAgentData`).

use std::rc::Rc;

use js_sys::{Array, Object, Reflect};
use serde::Serialize;
use serde_json::{json, Map, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::descriptor::{define_getter, define_value};
use super::profile::IdentityProfile;
use super::proxy_helpers::{constant_fn, to_dom_string, to_js, Realm};
use crate::error::{FingerprintError, Result};

const GREASE_BRAND: &str = "Not=A?Brand";
const GREASE_VERSION: &str = "24";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Brand {
    pub brand: String,
    pub version: String,
}

impl Brand {
    fn new(brand: &str, version: &str) -> Self {
        Self {
            brand: brand.to_string(),
            version: version.to_string(),
        }
    }
}

/// Low-entropy brand list for the profile's browser version.
pub fn brands(profile: &IdentityProfile) -> Vec<Brand> {
    let major = profile.browser_major.as_str();
    vec![
        Brand::new(GREASE_BRAND, GREASE_VERSION),
        Brand::new("Chromium", major),
        Brand::new("Google Chrome", major),
    ]
}

/// Same brands with full version strings.
pub fn full_version_list(profile: &IdentityProfile) -> Vec<Brand> {
    let full = profile.browser_full_version.as_str();
    vec![
        Brand::new(GREASE_BRAND, &format!("{}.0.0.0", GREASE_VERSION)),
        Brand::new("Chromium", full),
        Brand::new("Google Chrome", full),
    ]
}

/// The low-entropy part, also returned by `toJSON()`.
pub fn low_entropy(profile: &IdentityProfile) -> Value {
    json!({
        "brands": brands(profile),
        "mobile": false,
        "platform": profile.ua_platform_label,
    })
}

/// Answer a `getHighEntropyValues(hints)` call. The low-entropy fields are
/// always present, plus the requested known hints; unknown names are
/// ignored.
pub fn high_entropy_values(profile: &IdentityProfile, requested: &[String]) -> Map<String, Value> {
    let mut values = match low_entropy(profile) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for hint in requested {
        let value = match hint.as_str() {
            "architecture" => json!("x86"),
            "bitness" => json!("64"),
            "model" => json!(""),
            "platform" => json!(profile.ua_platform_label),
            "platformVersion" => json!(profile.platform_version),
            "uaFullVersion" => json!(profile.browser_full_version),
            "fullVersionList" => json!(full_version_list(profile)),
            "wow64" => json!(false),
            _ => continue,
        };
        values.insert(hint.clone(), value);
    }
    values
}

/// The `sequence<DOMString>` argument of `getHighEntropyValues`.
fn requested_hints(hints: &JsValue) -> Result<Vec<String>> {
    if !hints.is_object() {
        return Err(FingerprintError::sanitizer("getHighEntropyValues", "not a sequence"));
    }
    let iter = js_sys::try_iter(hints)?
        .ok_or_else(|| FingerprintError::sanitizer("getHighEntropyValues", "not iterable"))?;
    iter.map(|hint| to_dom_string(&hint?)).collect()
}

/// Replace `navigator.userAgentData` when the host has one.
pub fn apply_to_navigator(realm: &Realm, navigator: &JsValue, profile: &Rc<IdentityProfile>) -> Result<()> {
    let existing = Reflect::get(navigator, &JsValue::from_str("userAgentData"))?;
    if existing.is_undefined() || existing.is_null() {
        return Err(FingerprintError::missing("userAgentData"));
    }

    let data = match realm.prototype("NavigatorUAData") {
        Ok(proto) => Object::create(&proto),
        Err(_) => Object::new(),
    };

    let brand_list: Array = brands(profile)
        .iter()
        .map(|b| to_js(b).unwrap_or(JsValue::NULL))
        .collect();
    let brand_list = realm.array(&brand_list);
    Object::freeze(brand_list.unchecked_ref::<Object>());
    define_value(&data, "brands", brand_list);
    define_value(&data, "mobile", JsValue::FALSE);
    define_value(&data, "platform", JsValue::from_str(&profile.ua_platform_label));

    let hints_profile = Rc::clone(profile);
    let hints_realm = realm.clone();
    let get_high_entropy = Closure::wrap(Box::new(move |hints: JsValue| -> JsValue {
        let requested = match requested_hints(&hints) {
            Ok(requested) => requested,
            Err(err) => {
                log::trace!("getHighEntropyValues: {}", err);
                return hints_realm.rejected(&hints_realm.type_error(
                    "Failed to execute 'getHighEntropyValues' on 'NavigatorUAData': \
                     The provided value cannot be converted to a sequence.",
                ));
            }
        };
        let values = high_entropy_values(&hints_profile, &requested);
        match to_js(&values) {
            Ok(obj) => hints_realm.resolved(&obj),
            Err(err) => hints_realm.rejected(&JsValue::from(err)),
        }
    }) as Box<dyn FnMut(JsValue) -> JsValue>);
    define_value(&data, "getHighEntropyValues", get_high_entropy.as_ref().clone());
    get_high_entropy.forget();

    let json_value = to_js(&low_entropy(profile))?;
    define_value(&data, "toJSON", constant_fn(json_value));

    let data: JsValue = data.into();
    define_getter(navigator, "userAgentData", move || data.clone());
    Ok(())
}
