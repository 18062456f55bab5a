//! Fingerprint Shield browser integration tests
//!
//! Run with: wasm-pack test --headless --chrome
//! (or --firefox)
//!
//! Every test shares one page. Each one calls the bootstrap first; only the
//! first call in the page actually patches.

#![cfg(target_arch = "wasm32")]

use fingerprint_shield::fingerprint_defense::proxy_helpers::Realm;
use fingerprint_shield::fingerprint_defense::{
    apply_fingerprint_protection, check_protection_status, get_identity_profile, test_site,
};
use js_sys::{Array, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn bootstrap() -> JsValue {
    apply_fingerprint_protection(JsValue::UNDEFINED).expect("bootstrap should not throw")
}

fn eval(source: &str) -> JsValue {
    js_sys::eval(source).expect("test script should not throw")
}

fn field(obj: &JsValue, name: &str) -> JsValue {
    Reflect::get(obj, &JsValue::from_str(name)).unwrap()
}

async fn eval_async(source: &str) -> JsValue {
    let promise: Promise = eval(source).unchecked_into();
    JsFuture::from(promise).await.expect("test promise should resolve")
}

// ===== Bootstrap Tests =====

#[wasm_bindgen_test]
fn bootstrap_runs_once() {
    bootstrap();
    let repeat = bootstrap();
    assert_eq!(field(&repeat, "plan").as_string().unwrap(), "normalize");
    assert_eq!(field(&repeat, "alreadyApplied"), JsValue::TRUE);
    assert!(Array::is_array(&field(&repeat, "skipped")));
    let applied: Array = field(&repeat, "applied").unchecked_into();
    assert_eq!(applied.length(), 0, "A repeated bootstrap must not patch again");
}

#[wasm_bindgen_test]
fn bootstrap_accepts_json_settings() {
    let outcome = apply_fingerprint_protection(JsValue::from_str(r#"{"logLevel": "warn"}"#))
        .expect("bootstrap should not throw");
    assert_eq!(field(&outcome, "plan").as_string().unwrap(), "normalize");
}

#[wasm_bindgen_test]
fn bootstrap_ignores_garbage_settings() {
    let outcome = apply_fingerprint_protection(JsValue::from_str("{not json"))
        .expect("bad settings fall back to defaults");
    assert_eq!(field(&outcome, "plan").as_string().unwrap(), "normalize");
}

// ===== Profile Tests =====

#[wasm_bindgen_test]
fn identity_profile_exposed() {
    bootstrap();
    let profile = get_identity_profile();
    assert!(!profile.is_undefined(), "Profile should exist after bootstrap");
    let platform = field(&profile, "platform").as_string().unwrap();
    assert!(["Win32", "MacIntel", "Linux x86_64"].contains(&platform.as_str()));
}

#[wasm_bindgen_test]
fn navigator_matches_profile() {
    bootstrap();
    let profile = get_identity_profile();
    let platform = eval("navigator.platform");
    assert_eq!(platform, field(&profile, "platform"));
    assert_eq!(eval("navigator.userAgent"), field(&profile, "userAgent"));
    assert_eq!(eval("navigator.webdriver"), JsValue::FALSE);
    // profile immutability
    assert_eq!(eval("navigator.platform"), platform);
    assert_eq!(eval("navigator.hardwareConcurrency"), eval("navigator.hardwareConcurrency"));
}

#[wasm_bindgen_test]
fn screen_matches_profile() {
    bootstrap();
    let profile = get_identity_profile();
    assert_eq!(eval("screen.width"), field(&profile, "screenWidth"));
    assert_eq!(eval("screen.height"), field(&profile, "screenHeight"));
    assert_eq!(eval("window.devicePixelRatio").as_f64(), Some(1.0));
}

// ===== Canvas Tests =====

#[wasm_bindgen_test]
fn canvas_export_deterministic_and_sanitized() {
    bootstrap();
    let result = eval(
        "(function() { \
           function paint(color) { \
             var c = document.createElement('canvas'); c.width = 40; c.height = 20; \
             var g = c.getContext('2d'); g.fillStyle = color; g.fillRect(0, 0, 40, 20); \
             g.fillText('fingerprint', 2, 12); return c; } \
           var red = paint('#f00'), blue = paint('#00f'); \
           return [red.toDataURL(), red.toDataURL(), blue.toDataURL()]; })()",
    );
    let urls: Array = result.unchecked_into();
    assert_eq!(urls.get(0), urls.get(1), "Repeated exports must be identical");
    assert_eq!(urls.get(0), urls.get(2), "Painted content must not reach the export");
}

#[wasm_bindgen_test]
fn canvas_image_data_zeroed() {
    bootstrap();
    let nonzero = eval(
        "(function() { var c = document.createElement('canvas'); c.width = 4; c.height = 4; \
           var g = c.getContext('2d'); g.fillStyle = '#abc'; g.fillRect(0, 0, 4, 4); \
           return g.getImageData(0, 0, 4, 4).data.some(function(b) { return b !== 0; }); })()",
    );
    assert_eq!(nonzero, JsValue::FALSE);
}

// ===== Timing Tests =====

#[wasm_bindgen_test]
fn clock_strictly_increasing() {
    bootstrap();
    let ok = eval(
        "(function() { var last = -1; for (var i = 0; i < 500; i++) { \
           var t = performance.now(); if (!(t > last)) return false; last = t; } \
           return true; })()",
    );
    assert_eq!(ok, JsValue::TRUE, "performance.now() must never repeat or go back");
}

#[wasm_bindgen_test]
fn timing_snapshots_are_rounded() {
    bootstrap();
    let rounded = eval(
        "(function() { \
           function coarse(t) { return Object.keys(t || {}).every(function(k) { \
             return typeof t[k] !== 'number' || t[k] % 100 === 0; }); } \
           var p = JSON.parse(JSON.stringify(performance)); \
           if (p.timeOrigin % 1000 !== 0) return false; \
           var t = performance.timing ? JSON.parse(JSON.stringify(performance.timing)) : {}; \
           return coarse(p.timing) && coarse(t); })()",
    );
    assert_eq!(rounded, JsValue::TRUE, "toJSON must not expose exact timestamps");
}

// ===== Locale Tests =====

#[wasm_bindgen_test]
fn timezone_offset_from_profile() {
    bootstrap();
    let profile = get_identity_profile();
    assert_eq!(
        eval("new Date().getTimezoneOffset()"),
        field(&profile, "timezoneOffsetMinutes")
    );
    assert_eq!(eval("new Date(NaN).getTimezoneOffset()").as_f64().map(f64::is_nan), Some(true));
}

#[wasm_bindgen_test]
fn local_date_fields_follow_profile_zone() {
    bootstrap();
    let profile = get_identity_profile();
    let offset = field(&profile, "timezoneOffsetMinutes").as_f64().unwrap();
    let measured = eval(
        "(function() { var d = new Date(); \
           var diff = (d.getUTCHours() * 60 + d.getUTCMinutes()) - (d.getHours() * 60 + d.getMinutes()); \
           return ((diff % 1440) + 1440) % 1440; })()",
    );
    assert_eq!(measured.as_f64(), Some(((offset % 1440.0) + 1440.0) % 1440.0));

    let consistent = eval(
        "(function() { var d = new Date(2024, 0, 1, 0, 30); \
           var built = d.getFullYear() === 2024 && d.getMonth() === 0 && d.getDate() === 1 && \
                       d.getHours() === 0 && d.getMinutes() === 30; \
           var strings = d.toString().indexOf(d.toDateString()) === 0; \
           d.setHours(23); var set = d.getHours() === 23 && d.getDate() === 1; \
           return built && strings && set && Date.prototype.constructor === Date; })()",
    );
    assert_eq!(consistent, JsValue::TRUE);

    let called = eval(
        "(function() { var s = Date(); \
           return typeof s === 'string' && s.slice(-12) === new Date().toString().slice(-12); })()",
    );
    assert_eq!(called, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn intl_constructor_descriptor_unchanged() {
    bootstrap();
    let descriptor = eval(
        "(function() { \
           var d = Object.getOwnPropertyDescriptor(Intl.DateTimeFormat.prototype, 'constructor'); \
           return 'value' in d && d.writable === true && d.value === Intl.DateTimeFormat; })()",
    );
    assert_eq!(descriptor, JsValue::TRUE);
}

// ===== WebGL Tests =====

#[wasm_bindgen_test]
fn debug_extension_blocked_any_case() {
    bootstrap();
    let blocked = eval(
        "(function() { var g = document.createElement('canvas').getContext('webgl'); \
           if (!g) return true; \
           return ['WEBGL_debug_renderer_info', 'webgl_debug_renderer_info', \
                   'WebGL_Debug_Renderer_Info'].every(function(n) { \
             return g.getExtension(n) === null; }) && \
             g.getSupportedExtensions().indexOf('WEBGL_debug_renderer_info') < 0; })()",
    );
    assert_eq!(blocked, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn debug_extension_blocked_after_argument_conversion() {
    bootstrap();
    let blocked = eval(
        "(function() { var g = document.createElement('canvas').getContext('webgl'); \
           if (!g) return true; \
           var named = { toString: function() { return 'webgl_debug_renderer_info'; } }; \
           return g.getExtension(new String('WEBGL_debug_renderer_info')) === null && \
                  g.getExtension(named) === null && \
                  g.getParameter('37446') === null && \
                  g.getParameter(37446 + Math.pow(2, 32)) === null && \
                  g.getParameter(3379 + Math.pow(2, 32)) === 16384 && \
                  g.getParameter('3379') === 16384; })()",
    );
    assert_eq!(blocked, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn unrelated_extension_still_available() {
    bootstrap();
    let available = eval(
        "(function() { var g = document.createElement('canvas').getContext('webgl'); \
           if (!g) return true; \
           var names = g.getSupportedExtensions().filter(function(n) { \
             return !/debug_renderer_info/i.test(n); }); \
           if (names.length === 0) return true; \
           var name = names[0]; \
           return g.getExtension(name) !== null && \
                  g.getExtension(name.toLowerCase()) !== null && \
                  g.getExtension(new String(name)) !== null; })()",
    );
    assert_eq!(available, JsValue::TRUE);
}

// ===== Audio Tests =====

#[wasm_bindgen_test]
fn analyser_readouts_zeroed() {
    bootstrap();
    let zeroed = eval(
        "(function() { var C = window.OfflineAudioContext; if (!C) return true; \
           var a = new C(1, 128, 44100).createAnalyser(); \
           var f = new Float32Array(a.frequencyBinCount); f.fill(5); a.getFloatFrequencyData(f); \
           var b = new Uint8Array(a.fftSize); b.fill(7); a.getByteTimeDomainData(b); \
           function zero(v) { return v === 0; } \
           return f.every(zero) && b.every(zero); })()",
    );
    assert_eq!(zeroed, JsValue::TRUE);
}

#[wasm_bindgen_test]
async fn offline_render_zeroed() {
    bootstrap();
    let zeroed = eval_async(
        "(function() { var C = window.OfflineAudioContext; if (!C) return Promise.resolve(true); \
           var ctx = new C(1, 4410, 44100); var osc = ctx.createOscillator(); \
           osc.connect(ctx.destination); osc.start(); \
           function silent(b) { return b.getChannelData(0).every(function(v) { return v === 0; }); } \
           var fromEvent = new Promise(function(done) { \
             ctx.oncomplete = function(e) { done(silent(e.renderedBuffer)); }; }); \
           var fromPromise = ctx.startRendering().then(silent); \
           return Promise.all([fromPromise, fromEvent]).then(function(r) { return r[0] && r[1]; }); })()",
    )
    .await;
    assert_eq!(zeroed, JsValue::TRUE, "Rendered audio must not reach the page");
}

// ===== Layout Tests =====

#[wasm_bindgen_test]
fn probe_reports_fixed_rect() {
    bootstrap();
    let dims = eval(
        "(function() { var d = document.createElement('div'); \
           d.style.cssText = 'position:absolute;left:-9999px;width:300px;height:50px'; \
           document.body.appendChild(d); var r = d.getBoundingClientRect(); \
           var out = [r.width, r.height, d.offsetWidth, d.offsetHeight]; \
           d.remove(); return out; })()",
    );
    let dims: Array = dims.unchecked_into();
    let values: Vec<f64> = dims.iter().filter_map(|v| v.as_f64()).collect();
    assert_eq!(values, vec![100.0, 20.0, 100.0, 20.0]);
}

#[wasm_bindgen_test]
fn visible_element_keeps_real_metrics() {
    bootstrap();
    let dims = eval(
        "(function() { var d = document.createElement('div'); \
           d.style.cssText = 'position:absolute;left:0;top:0;width:300px;height:50px'; \
           document.body.appendChild(d); var r = d.getBoundingClientRect(); \
           var out = [r.width, r.height, d.offsetWidth, d.offsetHeight]; \
           d.remove(); return out; })()",
    );
    let dims: Array = dims.unchecked_into();
    let values: Vec<f64> = dims.iter().filter_map(|v| v.as_f64()).collect();
    assert_eq!(values, vec![300.0, 50.0, 300.0, 50.0]);
}

// ===== Client Hints Tests =====

#[wasm_bindgen_test]
async fn high_entropy_values_match_profile() {
    bootstrap();
    let values = eval_async(
        "(function() { var d = navigator.userAgentData; if (!d) return Promise.resolve(null); \
           return d.getHighEntropyValues(['platformVersion', 'bogus']); })()",
    )
    .await;
    if values.is_null() {
        // host without client hints
        return;
    }
    let profile = get_identity_profile();
    assert_eq!(field(&values, "platform"), field(&profile, "uaPlatformLabel"));
    assert_eq!(field(&values, "platformVersion"), field(&profile, "platformVersion"));
    assert_eq!(field(&values, "mobile"), JsValue::FALSE);
    assert!(Array::is_array(&field(&values, "brands")));
    assert!(field(&values, "bogus").is_undefined());

    let rejected = eval_async(
        "(function() { var d = navigator.userAgentData; \
           return d.getHighEntropyValues(5).then(function() { return false; }, \
             function(e) { return e instanceof TypeError; }); })()",
    )
    .await;
    assert_eq!(rejected, JsValue::TRUE, "A non-sequence argument must reject");
}

// ===== Anti-Detection Tests =====

#[wasm_bindgen_test]
fn wrapped_functions_look_native() {
    bootstrap();
    let native = eval(
        "[Performance.prototype.now, HTMLCanvasElement.prototype.toDataURL, \
          Element.prototype.getBoundingClientRect].every(function(f) { \
           return Function.prototype.toString.call(f).indexOf('[native code]') >= 0; })",
    );
    assert_eq!(native, JsValue::TRUE);
}

// ===== Hardening Tests =====

#[wasm_bindgen_test]
fn color_scheme_reports_light() {
    bootstrap();
    assert_eq!(eval("matchMedia('(prefers-color-scheme: light)').matches"), JsValue::TRUE);
    assert_eq!(eval("matchMedia('(prefers-color-scheme: dark)').matches"), JsValue::FALSE);
    assert_eq!(
        eval("matchMedia(new String('(prefers-color-scheme: dark)')).matches"),
        JsValue::FALSE
    );
}

#[wasm_bindgen_test]
fn uncommon_fonts_report_absent() {
    bootstrap();
    assert_eq!(eval("document.fonts.check('16px \"Fira Sans\"')"), JsValue::FALSE);
    assert_eq!(eval("document.fonts.check('700 16px \"Fira Sans\"')"), JsValue::FALSE);
    assert_eq!(
        eval("document.fonts.check(new String('16px \"Fira Sans\"'))"),
        JsValue::FALSE
    );
}

// ===== Frame Tests =====

#[wasm_bindgen_test]
fn child_frame_shares_profile() {
    bootstrap();
    let same = eval(
        "(function() { var f = document.createElement('iframe'); \
           document.body.appendChild(f); var w = f.contentWindow; \
           var out = w.navigator.platform === navigator.platform && \
                     w.navigator.userAgent === navigator.userAgent && \
                     w.screen.width === screen.width; \
           f.remove(); return out; })()",
    );
    assert_eq!(same, JsValue::TRUE, "A fresh iframe must not reveal the real values");
}

// ===== Test-Site Blocker Tests =====

#[wasm_bindgen_test]
fn test_site_blocker_disables_contexts() {
    bootstrap();
    let window = eval(
        "(function() { var f = document.createElement('iframe'); document.body.appendChild(f); \
           window.__blockedFrame = f; return f.contentWindow; })()",
    );
    let realm = Realm::from_window(&window).expect("frame window");
    let steps = test_site::block(&realm).expect("first block installs");
    assert!(steps.contains(&"canvasContexts"));
    assert!(test_site::block(&realm).is_none(), "A second block must be a no-op");

    let blocked = eval(
        "(function() { var f = window.__blockedFrame, w = f.contentWindow; \
           var c = w.document.createElement('canvas'); \
           var out = c.getContext('2d') === null && c.getContext(new String('webgl')) === null && \
                     typeof w.AudioContext === 'undefined' && \
                     typeof w.OfflineAudioContext === 'undefined'; \
           f.remove(); delete window.__blockedFrame; return out; })()",
    );
    assert_eq!(blocked, JsValue::TRUE);
}

// ===== Status Test =====

#[wasm_bindgen_test]
fn status_after_bootstrap() {
    bootstrap();
    let status = check_protection_status();
    assert!(!status.is_undefined());
    for name in ["applied", "navigator", "screen", "timezone", "timing", "canvas", "webgl"] {
        assert_eq!(field(&status, name), JsValue::TRUE, "{} should read as normalized", name);
    }
}
