//! Fingerprint surface normalization.
//!
//! Replaces the page-observable values that vary between devices with one
//! consistent [`IdentityProfile`] per document. Interception goes through
//! WASM closures behind `Proxy` objects, so the patched functions keep
//! their native `toString()` output.
//!
//! ## Usage
//!
//! ```javascript
//! import init, { apply_fingerprint_protection } from './pkg/fingerprint_shield.js';
//! await init();
//! apply_fingerprint_protection();                                // defaults
//! apply_fingerprint_protection({ strategy: 'session' });         // per-document draw
//! apply_fingerprint_protection({ components: { audio: false } }); // selective
//! ```
//!
//! Repeated calls in one document are no-ops. Every component step is
//! isolated: a surface the host lacks, or an override the host refuses,
//! leaves that one surface untouched and the pass carries on.

use std::rc::Rc;

use js_sys::Reflect;
use serde::Serialize;
use wasm_bindgen::prelude::*;

pub mod audio;
pub mod canvas;
pub mod client_hints;
pub mod descriptor;
pub mod guard;
pub mod hardening;
pub mod iframe_observer;
pub mod layout;
pub mod locale;
pub mod navigator;
pub mod prng;
pub mod profile;
pub mod proxy_helpers;
pub mod screen;
pub mod test_site;
pub mod timing;
pub mod webgl;

use crate::error::{attempt, ErrorInfo, FingerprintError, Result};
use crate::settings::{ComponentToggles, InjectionPlan, PageLocation, ProfileStrategy, ProtectionSettings, SkipReason};
use guard::{GlobalFlagSlot, LifecycleGuard, NORMALIZER_GUARD_KEY};
use prng::SessionPrng;
use profile::{IdentityProfile, ProfileCell};
use proxy_helpers::{call_method, get_f64, get_string, to_js, Realm};

thread_local! {
    static PROFILE: ProfileCell = ProfileCell::new();
}

/// Everything one patch pass over one realm needs.
#[derive(Clone)]
pub struct PassContext {
    pub realm: Realm,
    pub profile: Rc<IdentityProfile>,
    pub components: ComponentToggles,
}

struct Component {
    name: &'static str,
    enabled: fn(&ComponentToggles) -> bool,
    apply: fn(&PassContext) -> Result<()>,
}

/// Pass order. Frame propagation runs last so a child frame sees a parent
/// that is already normalized.
const COMPONENTS: &[Component] = &[
    Component { name: "navigator", enabled: |t| t.navigator, apply: navigator::apply },
    Component { name: "screen", enabled: |t| t.screen, apply: screen::apply },
    Component { name: "canvas", enabled: |t| t.canvas, apply: canvas::apply },
    Component { name: "webgl", enabled: |t| t.webgl, apply: webgl::apply },
    Component { name: "audio", enabled: |t| t.audio, apply: audio::apply },
    Component { name: "layout", enabled: |t| t.layout, apply: layout::apply },
    Component { name: "timing", enabled: |t| t.timing, apply: timing::apply },
    Component { name: "locale", enabled: |t| t.locale, apply: locale::apply },
    Component { name: "hardening", enabled: |t| t.hardening, apply: hardening::apply },
    Component {
        name: "iframeProtection",
        enabled: |t| t.iframe_protection,
        apply: iframe_observer::apply,
    },
];

/// Names of the components a pass with `toggles` would run, in order.
pub fn enabled_components(toggles: &ComponentToggles) -> Vec<&'static str> {
    COMPONENTS
        .iter()
        .filter(|c| (c.enabled)(toggles))
        .map(|c| c.name)
        .collect()
}

/// A component that did not complete, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStep {
    pub step: &'static str,
    pub error: ErrorInfo,
}

/// Result of one pass over one realm.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<SkippedStep>,
}

impl PassReport {
    fn completed(applied: Vec<&'static str>) -> Self {
        Self {
            applied,
            skipped: Vec::new(),
        }
    }
}

/// Run every enabled component over `ctx.realm`.
pub fn run_pass(ctx: &PassContext) -> PassReport {
    let mut report = PassReport::default();
    for component in COMPONENTS.iter().filter(|c| (c.enabled)(&ctx.components)) {
        match attempt(component.name, || (component.apply)(ctx)) {
            Ok(()) => report.applied.push(component.name),
            Err(err) => report.skipped.push(SkippedStep {
                step: component.name,
                error: ErrorInfo::from(&err),
            }),
        }
    }
    report
}

fn normalizer_guard(realm: &Realm) -> LifecycleGuard<GlobalFlagSlot> {
    LifecycleGuard::new(GlobalFlagSlot::new(realm.global(), NORMALIZER_GUARD_KEY))
}

/// `run_pass` behind the realm's one-shot guard. `None` when the realm was
/// already normalized or its guard cannot be read.
pub(crate) fn normalize_once(ctx: &PassContext) -> Option<PassReport> {
    normalizer_guard(&ctx.realm).enter_then(|| run_pass(ctx))
}

/// The document's profile, generated from the unpatched host on first use.
fn document_profile(realm: &Realm, strategy: ProfileStrategy) -> Rc<IdentityProfile> {
    PROFILE.with(|cell| {
        cell.get_or_generate(|| {
            let user_agent = realm
                .get("navigator")
                .and_then(|navigator| get_string(&navigator, "userAgent"))
                .unwrap_or_default();
            IdentityProfile::generate(
                strategy,
                &user_agent,
                screen::read_viewport(realm),
                SessionPrng::seed,
            )
        })
    })
}

fn decode_settings(options: JsValue) -> ProtectionSettings {
    if options.is_undefined() || options.is_null() {
        return ProtectionSettings::default();
    }
    let decoded = match options.as_string() {
        Some(json) => ProtectionSettings::from_json(&json),
        None => serde_wasm_bindgen::from_value(options)
            .map_err(|err| FingerprintError::InvalidSettings(err.to_string())),
    };
    decoded.unwrap_or_else(|err| {
        log::warn!("settings ignored, using defaults: {}", err);
        ProtectionSettings::default()
    })
}

fn page_location(realm: &Realm) -> (String, String) {
    let location = realm.get("location");
    let field = |name: &str| {
        location
            .as_ref()
            .and_then(|location| get_string(location, name))
            .unwrap_or_default()
    };
    (field("protocol"), field("hostname"))
}

/// What one bootstrap call did.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOutcome {
    pub plan: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub applied: Vec<&'static str>,
    /// Components that did not complete, with their error codes.
    pub skipped: Vec<SkippedStep>,
    pub already_applied: bool,
}

impl BootstrapOutcome {
    fn new(plan: InjectionPlan, report: Option<PassReport>) -> Self {
        let skip_reason = match plan {
            InjectionPlan::Skip(reason) => Some(reason),
            _ => None,
        };
        let already_applied = report.is_none();
        let report = report.unwrap_or_default();
        Self {
            plan: plan.name(),
            skip_reason,
            applied: report.applied,
            skipped: report.skipped,
            already_applied,
        }
    }
}

/// Bootstrap entry point. Safe to call from every injection path.
///
/// `options` is a settings object, a JSON string, or undefined. Returns
/// `{ plan, applied, skipped, alreadyApplied }`.
#[wasm_bindgen]
pub fn apply_fingerprint_protection(options: JsValue) -> std::result::Result<JsValue, JsValue> {
    let settings = decode_settings(options);
    match settings.log_filter() {
        Ok(Some(level)) => log::set_max_level(level),
        Ok(None) => {}
        Err(err) => log::warn!("{}", err),
    }

    let realm = Realm::current();
    let (protocol, hostname) = page_location(&realm);
    let plan = settings.plan(&PageLocation {
        protocol: &protocol,
        hostname: &hostname,
    });

    let outcome = match plan {
        InjectionPlan::Skip(reason) => {
            log::debug!("not injecting: {:?}", reason);
            BootstrapOutcome::new(plan, Some(PassReport::default()))
        }
        InjectionPlan::BlockTestSite => {
            BootstrapOutcome::new(plan, test_site::block(&realm).map(PassReport::completed))
        }
        InjectionPlan::Normalize => {
            // only the call that enters the guard generates a profile
            let report = normalizer_guard(&realm).enter_then(|| {
                let ctx = PassContext {
                    profile: document_profile(&realm, settings.strategy),
                    realm: realm.clone(),
                    components: settings.components.clone(),
                };
                run_pass(&ctx)
            });
            if let Some(report) = &report {
                log::debug!("normalized: {}", report.applied.join(", "));
            }
            BootstrapOutcome::new(plan, report)
        }
    };
    Ok(to_js(&outcome)?)
}

/// The document's profile, or undefined before the first normalizing
/// bootstrap.
#[wasm_bindgen]
pub fn get_identity_profile() -> JsValue {
    PROFILE
        .with(|cell| cell.get())
        .and_then(|profile| to_js(&*profile).ok())
        .unwrap_or(JsValue::UNDEFINED)
}

/// Self-test of the live page against the profile.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    pub applied: bool,
    pub navigator: bool,
    pub screen: bool,
    pub timezone: bool,
    pub timing: bool,
    pub canvas: bool,
    pub webgl: bool,
    pub native_to_string: bool,
}

/// Probe each surface and report whether it reads as normalized.
#[wasm_bindgen]
pub fn check_protection_status() -> JsValue {
    let realm = Realm::current();
    let mut status = ProtectionStatus {
        applied: normalizer_guard(&realm).is_entered(),
        ..Default::default()
    };
    if let Some(profile) = PROFILE.with(|cell| cell.get()) {
        let check = |f: &dyn Fn() -> Result<bool>| f().unwrap_or(false);
        status.navigator = check(&|| check_navigator(&realm, &profile));
        status.screen = check(&|| {
            let screen = realm.require("screen")?;
            Ok(get_f64(&screen, "width") == Some(f64::from(profile.screen_width)))
        });
        status.timezone = check(&|| {
            let now = realm.construct("Date", &[])?;
            let offset = call_method(&now, "getTimezoneOffset", &[])?.as_f64();
            Ok(offset == Some(f64::from(profile.timezone_offset_minutes)))
        });
        status.timing = check(&|| check_clock(&realm));
        status.canvas = check(&|| check_canvas(&realm));
        status.webgl = check(&|| check_webgl(&realm));
        status.native_to_string = check(&|| {
            let proto = realm.prototype("Performance")?;
            let now = Reflect::get(&proto, &JsValue::from_str("now"))?;
            let source = call_method(&now, "toString", &[])?.as_string().unwrap_or_default();
            Ok(source.contains("[native code]"))
        });
    }
    to_js(&status).unwrap_or(JsValue::UNDEFINED)
}

fn check_navigator(realm: &Realm, profile: &IdentityProfile) -> Result<bool> {
    let navigator = realm.require("navigator")?;
    Ok(get_string(&navigator, "platform").as_deref() == Some(profile.platform.as_str())
        && get_string(&navigator, "userAgent").as_deref() == Some(profile.user_agent.as_str()))
}

fn check_clock(realm: &Realm) -> Result<bool> {
    let performance = realm.require("performance")?;
    let first = call_method(&performance, "now", &[])?.as_f64();
    let second = call_method(&performance, "now", &[])?.as_f64();
    Ok(matches!((first, second), (Some(a), Some(b)) if b > a))
}

/// A painted canvas must export the same bytes as a blank one.
fn check_canvas(realm: &Realm) -> Result<bool> {
    let painted = realm.create_element("canvas")?;
    let blank = realm.create_element("canvas")?;
    for canvas in [&painted, &blank] {
        Reflect::set(canvas, &JsValue::from_str("width"), &JsValue::from_f64(16.0))?;
        Reflect::set(canvas, &JsValue::from_str("height"), &JsValue::from_f64(16.0))?;
    }
    let context = call_method(&painted, "getContext", &[JsValue::from_str("2d")])?;
    if !context.is_object() {
        return Ok(false);
    }
    Reflect::set(&context, &JsValue::from_str("fillStyle"), &JsValue::from_str("#c03"))?;
    call_method(
        &context,
        "fillRect",
        &[0.0, 0.0, 16.0, 16.0].map(JsValue::from_f64),
    )?;
    let painted_url = call_method(&painted, "toDataURL", &[])?;
    let blank_url = call_method(&blank, "toDataURL", &[])?;
    Ok(painted_url.as_string().is_some() && painted_url.as_string() == blank_url.as_string())
}

fn check_webgl(realm: &Realm) -> Result<bool> {
    let canvas = realm.create_element("canvas")?;
    let gl = call_method(&canvas, "getContext", &[JsValue::from_str("webgl")])?;
    if !gl.is_object() {
        // nothing to leak
        return Ok(true);
    }
    let extension = call_method(&gl, "getExtension", &[JsValue::from_str(webgl::DEBUG_RENDERER_INFO)])?;
    Ok(extension.is_null())
}
