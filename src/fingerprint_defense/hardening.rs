//! Secondary surfaces.
//!
//! Font availability, color-scheme preference, battery state and media
//! device lists each leak a few bits on their own. None of them is worth a
//! module, so they are grouped here.

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::descriptor::define_value;
use super::proxy_helpers::{find_owner, get_string, to_dom_string, wrap_method, wrap_result, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

/// Families `document.fonts.check` confirms. Everything else reports absent.
pub const COMMON_FONTS: &[&str] = &[
    "arial",
    "times new roman",
    "courier new",
    "verdana",
    "georgia",
    "tahoma",
];

const GENERIC_FAMILIES: &[&str] = &[
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "fantasy",
    "system-ui",
];

const SIZE_KEYWORDS: &[&str] = &[
    "xx-small", "x-small", "small", "medium", "large", "x-large", "xx-large", "xxx-large",
    "smaller", "larger",
];

/// Whether `token` is the `font-size` (optionally `/line-height`) part of a
/// `font` shorthand. A bare number is a weight, not a size.
fn is_size_token(token: &str) -> bool {
    let size = token.split('/').next().unwrap_or_default().to_ascii_lowercase();
    if SIZE_KEYWORDS.contains(&size.as_str()) {
        return true;
    }
    let unit_start = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(unit_start);
    number.contains(|c: char| c.is_ascii_digit())
        && !unit.is_empty()
        && unit.chars().all(|c| c.is_ascii_alphabetic() || c == '%')
}

/// Family names of a CSS `font` shorthand, lowercased and unquoted.
///
/// `"italic 700 16px/1.2 'Fira Sans', serif"` → `["fira sans", "serif"]`.
pub fn font_families(shorthand: &str) -> Vec<String> {
    let tokens: Vec<&str> = shorthand.split_whitespace().collect();
    // style, variant, weight and stretch come first, then the size
    let tail = match tokens.iter().position(|t| is_size_token(t)) {
        Some(size_index) => {
            let rest = tokens[size_index + 1..].join(" ");
            // a detached line height: `16px / 1.5 Arial`
            match rest.strip_prefix('/') {
                Some(line_height) => line_height
                    .split_whitespace()
                    .skip(1)
                    .collect::<Vec<_>>()
                    .join(" "),
                None => rest,
            }
        }
        None => shorthand.to_string(),
    };
    tail.split(',')
        .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Whether every family in `shorthand` is one the normalized profile claims.
pub fn is_common_font(shorthand: &str) -> bool {
    let families = font_families(shorthand);
    !families.is_empty()
        && families.iter().all(|family| {
            COMMON_FONTS.contains(&family.as_str()) || GENERIC_FAMILIES.contains(&family.as_str())
        })
}

/// `matches` for a `prefers-color-scheme` query, or `None` for other queries.
pub fn color_scheme_match(query: &str) -> Option<bool> {
    let query = query.to_ascii_lowercase();
    if query.contains("prefers-color-scheme") {
        Some(query.contains("light"))
    } else {
        None
    }
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let steps: [(&str, fn(&Realm) -> Result<()>); 5] = [
        ("fonts.check", wrap_font_check),
        ("matchMedia", wrap_match_media),
        ("navigator.getBattery", wrap_battery),
        ("mediaDevices.enumerateDevices", wrap_enumerate_devices),
        ("window.chrome", install_chrome_shim),
    ];
    let applied = steps
        .iter()
        .filter(|(step, apply)| isolated(step, || apply(realm)))
        .count();
    log::debug!("hardening: {} of {} surfaces", applied, steps.len());
    Ok(())
}

fn wrap_font_check(realm: &Realm) -> Result<()> {
    let fonts = Reflect::get(&realm.document()?, &JsValue::from_str("fonts"))?;
    if !fonts.is_object() {
        return Err(FingerprintError::missing("document.fonts"));
    }
    let owner = find_owner(fonts.unchecked_ref(), "check")
        .ok_or_else(|| FingerprintError::missing("FontFaceSet.check"))?;
    wrap_method(&owner, "check", |original, this, args| {
        if args.length() == 0 {
            return Ok(Reflect::apply(original, this, args)?);
        }
        let shorthand = to_dom_string(&args.get(0))?;
        if !is_common_font(&shorthand) {
            return Ok(JsValue::FALSE);
        }
        args.set(0, JsValue::from_str(&shorthand));
        Ok(Reflect::apply(original, this, args)?)
    })
}

fn wrap_match_media(realm: &Realm) -> Result<()> {
    let owner = find_owner(realm.global(), "matchMedia")
        .ok_or_else(|| FingerprintError::missing("matchMedia"))?;
    // `media` is the query as the host parsed it
    wrap_result(&owner, "matchMedia", |list, _, _| {
        if let Some(matches) = get_string(&list, "media").as_deref().and_then(color_scheme_match) {
            define_value(&list, "matches", JsValue::from_bool(matches));
        }
        Ok(list)
    })
}

fn wrap_battery(realm: &Realm) -> Result<()> {
    let navigator = realm.require("navigator")?;
    let owner = find_owner(navigator.unchecked_ref(), "getBattery")
        .ok_or_else(|| FingerprintError::missing("navigator.getBattery"))?;
    let realm = realm.clone();
    wrap_method(&owner, "getBattery", move |_, _, _| {
        let reason = realm.dom_exception("Battery status is not available", "NotAllowedError");
        Ok(realm.rejected(&reason))
    })
}

fn wrap_enumerate_devices(realm: &Realm) -> Result<()> {
    let navigator = realm.require("navigator")?;
    let devices = Reflect::get(&navigator, &JsValue::from_str("mediaDevices"))?;
    if !devices.is_object() {
        return Err(FingerprintError::missing("navigator.mediaDevices"));
    }
    let owner = find_owner(devices.unchecked_ref(), "enumerateDevices")
        .ok_or_else(|| FingerprintError::missing("MediaDevices.enumerateDevices"))?;
    let realm = realm.clone();
    wrap_method(&owner, "enumerateDevices", move |_, _, _| {
        Ok(realm.resolved(&realm.array(&Array::new())))
    })
}

fn install_chrome_shim(realm: &Realm) -> Result<()> {
    if realm.get("chrome").is_some() {
        return Ok(());
    }
    let shim = Object::new();
    Reflect::set(&shim, &JsValue::from_str("runtime"), &Object::new())?;
    if define_value(realm.global(), "chrome", shim.into()).landed() {
        Ok(())
    } else {
        Err(FingerprintError::refused("chrome"))
    }
}
