//! Timing normalization.
//!
//! `performance.now()` is quantized into buckets and kept strictly
//! increasing. Coarse timestamps (`timeOrigin`, `performance.timing`) are
//! rounded on every read, including the `toJSON()` snapshots.

use std::cell::Cell;
use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use super::descriptor::define_value;
use super::proxy_helpers::{get_f64, wrap_getter, wrap_method, wrap_result, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

/// Bucket size for the high-resolution clock, in milliseconds.
pub const CLOCK_BUCKET_MS: f64 = 50.0;
/// Smallest step used to keep the clock strictly increasing.
pub const CLOCK_TICK_MS: f64 = 1.0;
/// `timeOrigin` is floored to this many milliseconds.
pub const TIME_ORIGIN_STEP_MS: f64 = 1000.0;
/// Navigation timing fields are rounded to this many milliseconds.
pub const NAVIGATION_STEP_MS: f64 = 100.0;

/// `PerformanceTiming` fields, all epoch milliseconds.
pub const NAVIGATION_TIMING_FIELDS: &[&str] = &[
    "navigationStart",
    "unloadEventStart",
    "unloadEventEnd",
    "redirectStart",
    "redirectEnd",
    "fetchStart",
    "domainLookupStart",
    "domainLookupEnd",
    "connectStart",
    "connectEnd",
    "secureConnectionStart",
    "requestStart",
    "responseStart",
    "responseEnd",
    "domLoading",
    "domInteractive",
    "domContentLoadedEventStart",
    "domContentLoadedEventEnd",
    "domComplete",
    "loadEventStart",
    "loadEventEnd",
];

/// Quantized clock that never repeats or goes backwards.
#[derive(Debug)]
pub struct MonotonicClock {
    bucket: f64,
    last: Cell<Option<f64>>,
}

impl MonotonicClock {
    pub fn new(bucket: f64) -> Self {
        Self {
            bucket,
            last: Cell::new(None),
        }
    }

    /// Map one raw reading to its output.
    pub fn read(&self, raw: f64) -> f64 {
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
        let quantized = (raw / self.bucket).floor() * self.bucket;
        let value = match self.last.get() {
            Some(last) if quantized <= last => last + CLOCK_TICK_MS,
            _ => quantized,
        };
        self.last.set(Some(value));
        value
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new(CLOCK_BUCKET_MS)
    }
}

/// Round to the nearest `step`. Zero stays zero ("has not happened").
pub fn round_to(value: f64, step: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    (value / step).round() * step
}

pub fn floor_to(value: f64, step: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    (value / step).floor() * step
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let performance = realm.require("performance")?;
    let clock_wrapped = isolated("performance.now", || wrap_now(realm));
    isolated("performance.timeOrigin", || apply_time_origin(&performance));
    isolated("performance.timing", || wrap_navigation_timing(realm));
    isolated("Performance.toJSON", || wrap_performance_json(realm));
    isolated("PerformanceTiming.toJSON", || wrap_timing_json(realm));
    if !clock_wrapped {
        return Err(FingerprintError::missing("performance.now"));
    }
    Ok(())
}

fn wrap_now(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("Performance")?;
    let clock = Rc::new(MonotonicClock::default());
    wrap_method(&proto, "now", move |original, this, args| {
        let raw = Reflect::apply(original, this, args)?
            .as_f64()
            .ok_or_else(|| FingerprintError::sanitizer("performance.now", "non-numeric reading"))?;
        Ok(JsValue::from_f64(clock.read(raw)))
    })
}

fn apply_time_origin(performance: &JsValue) -> Result<()> {
    let origin = get_f64(performance, "timeOrigin")
        .ok_or_else(|| FingerprintError::missing("performance.timeOrigin"))?;
    let record = define_value(
        performance,
        "timeOrigin",
        JsValue::from_f64(floor_to(origin, TIME_ORIGIN_STEP_MS)),
    );
    if record.landed() {
        Ok(())
    } else {
        Err(FingerprintError::refused("timeOrigin"))
    }
}

fn wrap_navigation_timing(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("PerformanceTiming")?;
    for field in NAVIGATION_TIMING_FIELDS {
        let wrapped = wrap_getter(&proto, field, |getter, this| {
            let raw = getter
                .call0(this)?
                .as_f64()
                .ok_or_else(|| FingerprintError::sanitizer("performance.timing", "non-numeric field"))?;
            Ok(JsValue::from_f64(round_to(raw, NAVIGATION_STEP_MS)))
        });
        if let Err(err) = wrapped {
            log::trace!("performance.timing.{}: {}", field, err);
        }
    }
    Ok(())
}

/// Round every navigation timing field present on `snapshot`.
fn round_timing_snapshot(snapshot: &JsValue) -> Result<()> {
    for field in NAVIGATION_TIMING_FIELDS {
        if let Some(raw) = get_f64(snapshot, field) {
            let rounded = JsValue::from_f64(round_to(raw, NAVIGATION_STEP_MS));
            Reflect::set(snapshot, &JsValue::from_str(field), &rounded)?;
        }
    }
    Ok(())
}

// The default toJSON reads the internal values, not the wrapped accessors.
fn wrap_timing_json(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("PerformanceTiming")?;
    wrap_result(&proto, "toJSON", |snapshot, _, _| {
        round_timing_snapshot(&snapshot)?;
        Ok(snapshot)
    })
}

fn wrap_performance_json(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("Performance")?;
    let realm = realm.clone();
    wrap_result(&proto, "toJSON", move |snapshot, _, _| {
        if let Some(origin) = get_f64(&snapshot, "timeOrigin") {
            Reflect::set(
                &snapshot,
                &JsValue::from_str("timeOrigin"),
                &JsValue::from_f64(floor_to(origin, TIME_ORIGIN_STEP_MS)),
            )?;
        }
        // a nested PerformanceTiming serializes through its own toJSON
        let timing = Reflect::get(&snapshot, &JsValue::from_str("timing"))?;
        if timing.is_object() && !realm.is_instance(&timing, "PerformanceTiming") {
            round_timing_snapshot(&timing)?;
        }
        Ok(snapshot)
    })
}
