//! Navigator attribute normalization.
//!
//! Every identity attribute reads from the document's profile. Device
//! handles with no plausible low-entropy substitute are removed outright.

use std::rc::Rc;

use js_sys::{Object, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::client_hints;
use super::descriptor::{define_getter, define_value, OverrideRecord};
use super::profile::IdentityProfile;
use super::proxy_helpers::{empty_collection, find_owner, to_js, wrap_method, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

/// Handles removed from `navigator` when present.
pub const REMOVED_HANDLES: &[&str] = &[
    "bluetooth",
    "usb",
    "hid",
    "serial",
    "gpu",
    "mediaCapabilities",
    "presentation",
];

/// Aliases the connection-info object may live under.
pub const CONNECTION_ALIASES: &[&str] = &["connection", "mozConnection", "webkitConnection"];

/// Value of one navigator attribute, before it is handed to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Flag(bool),
    TextList(Vec<String>),
}

impl AttributeValue {
    fn text(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

/// Attributes and the value each one resolves to.
pub fn identity_attributes(profile: &IdentityProfile) -> Vec<(&'static str, AttributeValue)> {
    use AttributeValue::*;
    vec![
        ("userAgent", Text(profile.user_agent.clone())),
        ("appVersion", Text(profile.app_version.clone())),
        ("platform", Text(profile.platform.clone())),
        ("vendor", Text(profile.vendor.clone())),
        ("vendorSub", AttributeValue::text("")),
        ("appName", AttributeValue::text("Netscape")),
        ("appCodeName", AttributeValue::text("Mozilla")),
        ("product", AttributeValue::text("Gecko")),
        ("productSub", AttributeValue::text("20030107")),
        ("language", Text(profile.language.clone())),
        ("languages", TextList(profile.languages.clone())),
        ("hardwareConcurrency", Number(profile.hardware_concurrency as f64)),
        ("maxTouchPoints", Number(profile.max_touch_points as f64)),
        ("doNotTrack", AttributeValue::text("1")),
        ("webdriver", Flag(false)),
        ("cookieEnabled", Flag(true)),
        ("onLine", Flag(true)),
        ("pdfViewerEnabled", Flag(true)),
    ]
}

/// Attributes overridden only when the host exposes them.
pub fn optional_attributes(profile: &IdentityProfile) -> Vec<(&'static str, AttributeValue)> {
    vec![
        ("deviceMemory", AttributeValue::Number(profile.device_memory_gib as f64)),
        ("msDoNotTrack", AttributeValue::text("1")),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub downlink: f64,
    pub effective_type: &'static str,
    pub rtt: u32,
    pub save_data: bool,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            downlink: 10.0,
            effective_type: "4g",
            rtt: 50,
            save_data: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageEstimate {
    pub quota: u64,
    pub usage: u64,
}

impl Default for StorageEstimate {
    fn default() -> Self {
        Self {
            quota: 1024 * 1024 * 1024,
            usage: 0,
        }
    }
}

fn to_js_value(realm: &Realm, value: &AttributeValue) -> JsValue {
    match value {
        AttributeValue::Text(s) => JsValue::from_str(s),
        AttributeValue::Number(n) => JsValue::from_f64(*n),
        AttributeValue::Flag(b) => JsValue::from_bool(*b),
        AttributeValue::TextList(items) => realm.frozen_string_array(items),
    }
}

fn has(target: &JsValue, property: &str) -> bool {
    target.is_object() && Reflect::has(target, &JsValue::from_str(property)).unwrap_or(false)
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    let navigator = ctx.realm.require("navigator")?;
    apply_to_navigator(&ctx.realm, &navigator, &ctx.profile);
    Ok(())
}

/// Normalize one navigator. Also used for child frames.
pub fn apply_to_navigator(realm: &Realm, navigator: &JsValue, profile: &Rc<IdentityProfile>) {
    let mut records: Vec<OverrideRecord> = identity_attributes(profile)
        .iter()
        .map(|(name, value)| define_value(navigator, name, to_js_value(realm, value)))
        .collect();
    for (name, value) in optional_attributes(profile) {
        if has(navigator, name) {
            records.push(define_value(navigator, name, to_js_value(realm, &value)));
        }
    }
    let fallbacks = records.iter().filter(|r| r.fallback_applied()).count();
    let skipped = records.iter().filter(|r| !r.landed()).count();
    log::debug!(
        "navigator: {} attributes, {} on template, {} skipped",
        records.len(),
        fallbacks,
        skipped
    );

    isolated("navigator.userAgentData", || {
        client_hints::apply_to_navigator(realm, navigator, profile)
    });
    isolated("navigator.connection", || apply_connection(navigator));
    isolated("navigator.storage", || apply_storage_estimate(realm, navigator));
    isolated("navigator.plugins", || apply_collections(realm, navigator));
    remove_handles(navigator);
}

fn apply_connection(navigator: &JsValue) -> Result<()> {
    let info = to_js(&ConnectionInfo::default())?;
    let mut found = false;
    for alias in CONNECTION_ALIASES {
        if has(navigator, alias) {
            let existing = Reflect::get(navigator, &JsValue::from_str(alias))?;
            let connection = if existing.is_object() {
                // keep the NetworkInformation shape, shadow its fields
                let proto = Object::get_prototype_of(&existing);
                let replacement = Object::create(&proto);
                Object::assign(&replacement, info.unchecked_ref());
                replacement.into()
            } else {
                info.clone()
            };
            define_value(navigator, alias, connection);
            found = true;
        }
    }
    if found {
        Ok(())
    } else {
        Err(FingerprintError::missing("navigator.connection"))
    }
}

fn apply_storage_estimate(realm: &Realm, navigator: &JsValue) -> Result<()> {
    let storage = Reflect::get(navigator, &JsValue::from_str("storage"))?;
    if !storage.is_object() {
        return Err(FingerprintError::missing("navigator.storage"));
    }
    let owner = find_owner(storage.unchecked_ref(), "estimate")
        .ok_or_else(|| FingerprintError::missing("StorageManager.estimate"))?;
    let estimate = to_js(&StorageEstimate::default())?;
    let realm = realm.clone();
    wrap_method(&owner, "estimate", move |_, _, _| Ok(realm.resolved(&estimate)))
}

fn apply_collections(realm: &Realm, navigator: &JsValue) -> Result<()> {
    let plugins = empty_collection(realm, "PluginArray")?;
    let mime_types = empty_collection(realm, "MimeTypeArray")?;
    define_getter(navigator, "plugins", move || plugins.clone());
    define_getter(navigator, "mimeTypes", move || mime_types.clone());
    Ok(())
}

fn remove_handles(navigator: &JsValue) {
    for handle in REMOVED_HANDLES {
        if has(navigator, handle) {
            let record = define_value(navigator, handle, JsValue::UNDEFINED);
            if !record.landed() {
                log::debug!("navigator.{} could not be removed", handle);
            }
        }
    }
}
