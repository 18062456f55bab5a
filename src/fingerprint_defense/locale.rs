//! Timezone and locale normalization.
//!
//! Every `Date` reports the profile's offset. Its local fields, local
//! setters, component constructor and string forms all work in the
//! profile's zone. `Intl` formatters default to the profile's
//! locale and zone, and their resolved options say so.

use std::rc::Rc;

use js_sys::{Array, Date, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::profile::IdentityProfile;
use super::proxy_helpers::{
    install_value, to_number, wrap_constructor, wrap_constructor_with_call, wrap_method, wrap_result, Realm,
};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

const MS_PER_DAY: i64 = 86_400_000;
/// Largest absolute time value a `Date` can hold.
const MAX_TIME_VALUE: f64 = 8.64e15;
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Broken-down wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i64,
    /// 1-based.
    pub month: u32,
    pub day: u32,
    /// 0 is Sunday.
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl CivilTime {
    /// Break down an epoch-millisecond time value. `None` for NaN.
    pub fn from_epoch_ms(ms: f64) -> Option<Self> {
        if !ms.is_finite() {
            return None;
        }
        let ms = ms.floor() as i64;
        let days = ms.div_euclid(MS_PER_DAY);
        let in_day_ms = ms.rem_euclid(MS_PER_DAY);
        let in_day = in_day_ms / 1000;

        // days-from-civil inverse over 400-year eras
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + i64::from(month <= 2);

        Some(Self {
            year,
            month,
            day,
            weekday: (days + 4).rem_euclid(7) as u32,
            hour: (in_day / 3600) as u32,
            minute: (in_day / 60 % 60) as u32,
            second: (in_day % 60) as u32,
            millisecond: (in_day_ms % 1000) as u32,
        })
    }

    fn year_text(&self) -> String {
        if self.year < 0 {
            format!("-{:06}", -self.year)
        } else {
            format!("{:04}", self.year)
        }
    }
}

/// Days since the epoch for a proleptic Gregorian date, `month` 1-based.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year.rem_euclid(400);
    let mp = (i64::from(month) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// A local field of a `Date`, as the `get*` methods report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalField {
    FullYear,
    /// Legacy `getYear()`: years since 1900.
    Year,
    /// 0-based.
    Month,
    Date,
    Day,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

const LOCAL_GETTERS: [(&str, LocalField); 9] = [
    ("getFullYear", LocalField::FullYear),
    ("getYear", LocalField::Year),
    ("getMonth", LocalField::Month),
    ("getDate", LocalField::Date),
    ("getDay", LocalField::Day),
    ("getHours", LocalField::Hours),
    ("getMinutes", LocalField::Minutes),
    ("getSeconds", LocalField::Seconds),
    ("getMilliseconds", LocalField::Milliseconds),
];

/// Local setters and the UTC setter with the same arguments.
const LOCAL_SETTERS: [(&str, &str); 7] = [
    ("setFullYear", "setUTCFullYear"),
    ("setMonth", "setUTCMonth"),
    ("setDate", "setUTCDate"),
    ("setHours", "setUTCHours"),
    ("setMinutes", "setUTCMinutes"),
    ("setSeconds", "setUTCSeconds"),
    ("setMilliseconds", "setUTCMilliseconds"),
];

/// `field` of the time value `ms` in a zone with `offset_minutes`. NaN for
/// an invalid date.
pub fn local_field(ms: f64, offset_minutes: i32, field: LocalField) -> f64 {
    let t = match local_time(ms, offset_minutes) {
        Some(t) => t,
        None => return f64::NAN,
    };
    match field {
        LocalField::FullYear => t.year as f64,
        LocalField::Year => (t.year - 1900) as f64,
        LocalField::Month => f64::from(t.month - 1),
        LocalField::Date => f64::from(t.day),
        LocalField::Day => f64::from(t.weekday),
        LocalField::Hours => f64::from(t.hour),
        LocalField::Minutes => f64::from(t.minute),
        LocalField::Seconds => f64::from(t.second),
        LocalField::Milliseconds => f64::from(t.millisecond),
    }
}

/// Milliseconds to add to a local wall-clock value to get the time value.
fn zone_shift_ms(offset_minutes: i32) -> f64 {
    f64::from(offset_minutes) * 60_000.0
}

/// Time value of `new Date(year, month, day?, hours?, minutes?, seconds?, ms?)`
/// with already converted numbers, read in a zone with `offset_minutes`.
pub fn local_components_to_time(fields: &[f64], offset_minutes: i32) -> f64 {
    let field = |index: usize, default: f64| fields.get(index).copied().unwrap_or(default);
    let mut year = field(0, f64::NAN);
    if year.is_finite() {
        let whole = year.trunc();
        if (0.0..=99.0).contains(&whole) {
            year = 1900.0 + whole;
        }
    }
    let parts = [
        year,
        field(1, 0.0),
        field(2, 1.0),
        field(3, 0.0),
        field(4, 0.0),
        field(5, 0.0),
        field(6, 0.0),
    ];
    if parts.iter().any(|p| !p.is_finite()) {
        return f64::NAN;
    }
    let [year, month, date, hours, minutes, seconds, millis] = parts.map(f64::trunc);

    let year = year + (month / 12.0).floor();
    // anything this far out fails the time value range check anyway
    if year.abs() > 400_000.0 || date.abs() > 1e9 {
        return f64::NAN;
    }
    let month = month.rem_euclid(12.0) as u32 + 1;
    let day = days_from_civil(year as i64, month, 1) as f64 + date - 1.0;
    let time = hours * 3_600_000.0 + minutes * 60_000.0 + seconds * 1000.0 + millis;
    let value = day * MS_PER_DAY as f64 + time + zone_shift_ms(offset_minutes);
    if !value.is_finite() || value.abs() > MAX_TIME_VALUE {
        return f64::NAN;
    }
    value.trunc() + 0.0
}

/// `GMT+0000 (Coordinated Universal Time)` for the given offset, where
/// `offset_minutes` follows `getTimezoneOffset()` (positive west of UTC).
pub fn zone_suffix(offset_minutes: i32, time_zone: &str) -> String {
    let sign = if offset_minutes <= 0 { '+' } else { '-' };
    let abs = offset_minutes.unsigned_abs();
    let label = if offset_minutes == 0 && time_zone.eq_ignore_ascii_case("UTC") {
        "Coordinated Universal Time"
    } else {
        time_zone
    };
    format!("GMT{}{:02}{:02} ({})", sign, abs / 60, abs % 60, label)
}

fn local_time(ms: f64, offset_minutes: i32) -> Option<CivilTime> {
    CivilTime::from_epoch_ms(ms - zone_shift_ms(offset_minutes))
}

/// `Date.prototype.toString()` in the given zone.
pub fn format_date_string(ms: f64, offset_minutes: i32, time_zone: &str) -> String {
    match local_time(ms, offset_minutes) {
        Some(t) => format!(
            "{} {} {:02} {} {:02}:{:02}:{:02} {}",
            WEEKDAYS[t.weekday as usize],
            MONTHS[(t.month - 1) as usize],
            t.day,
            t.year_text(),
            t.hour,
            t.minute,
            t.second,
            zone_suffix(offset_minutes, time_zone)
        ),
        None => "Invalid Date".to_string(),
    }
}

/// `Date.prototype.toDateString()` in the given zone.
pub fn format_date_only(ms: f64, offset_minutes: i32, _time_zone: &str) -> String {
    match local_time(ms, offset_minutes) {
        Some(t) => format!(
            "{} {} {:02} {}",
            WEEKDAYS[t.weekday as usize],
            MONTHS[(t.month - 1) as usize],
            t.day,
            t.year_text()
        ),
        None => "Invalid Date".to_string(),
    }
}

/// `Date.prototype.toTimeString()` in the given zone.
pub fn format_time_string(ms: f64, offset_minutes: i32, time_zone: &str) -> String {
    match local_time(ms, offset_minutes) {
        Some(t) => format!(
            "{:02}:{:02}:{:02} {}",
            t.hour,
            t.minute,
            t.second,
            zone_suffix(offset_minutes, time_zone)
        ),
        None => "Invalid Date".to_string(),
    }
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm, &ctx.profile)
}

pub fn apply_to_realm(realm: &Realm, profile: &Rc<IdentityProfile>) -> Result<()> {
    let date_proto = realm.prototype("Date")?;
    isolated("Date.getTimezoneOffset", || wrap_offset(realm, &date_proto, profile));
    isolated("Date.toString", || wrap_date_strings(realm, &date_proto, profile));
    for (name, field) in LOCAL_GETTERS {
        isolated(name, || wrap_local_getter(realm, &date_proto, name, field, profile));
    }
    for (name, utc_name) in LOCAL_SETTERS {
        isolated(name, || wrap_local_setter(realm, &date_proto, name, utc_name, profile));
    }
    isolated("Date constructor", || wrap_date_constructor(realm, &date_proto, profile));
    for name in ["toLocaleString", "toLocaleDateString", "toLocaleTimeString"] {
        isolated(name, || wrap_locale_defaults(&date_proto, name, profile));
    }
    isolated("Intl.DateTimeFormat", || wrap_date_time_format(realm, profile));
    isolated("Intl.NumberFormat", || wrap_number_format(realm, profile));
    Ok(())
}

/// Time value of a `Date` from any realm, or an error for other receivers.
fn time_value(realm: &Realm, this: &JsValue) -> Result<f64> {
    if !realm.is_instance(this, "Date") {
        return Err(FingerprintError::sanitizer("Date", "receiver is not a Date"));
    }
    Ok(this.unchecked_ref::<Date>().get_time())
}

fn wrap_offset(realm: &Realm, date_proto: &Object, profile: &Rc<IdentityProfile>) -> Result<()> {
    let realm = realm.clone();
    let offset = profile.timezone_offset_minutes;
    wrap_method(date_proto, "getTimezoneOffset", move |_, this, _| {
        let time = time_value(&realm, this)?;
        if time.is_nan() {
            return Ok(JsValue::from_f64(f64::NAN));
        }
        Ok(JsValue::from_f64(f64::from(offset)))
    })
}

fn wrap_date_strings(realm: &Realm, date_proto: &Object, profile: &Rc<IdentityProfile>) -> Result<()> {
    let formatters: [(&str, fn(f64, i32, &str) -> String); 3] = [
        ("toString", format_date_string),
        ("toDateString", format_date_only),
        ("toTimeString", format_time_string),
    ];
    for (name, format) in formatters {
        let realm = realm.clone();
        let profile = Rc::clone(profile);
        wrap_method(date_proto, name, move |_, this, _| {
            let time = time_value(&realm, this)?;
            Ok(JsValue::from_str(&format(
                time,
                profile.timezone_offset_minutes,
                &profile.time_zone,
            )))
        })?;
    }
    Ok(())
}

fn wrap_local_getter(
    realm: &Realm,
    date_proto: &Object,
    name: &str,
    field: LocalField,
    profile: &Rc<IdentityProfile>,
) -> Result<()> {
    let realm = realm.clone();
    let offset = profile.timezone_offset_minutes;
    wrap_method(date_proto, name, move |_, this, _| {
        let time = time_value(&realm, this)?;
        Ok(JsValue::from_f64(local_field(time, offset, field)))
    })
}

/// `setHours` and friends: shift the time value into the profile zone, run
/// the UTC setter there, shift back.
fn wrap_local_setter(
    realm: &Realm,
    date_proto: &Object,
    name: &str,
    utc_name: &'static str,
    profile: &Rc<IdentityProfile>,
) -> Result<()> {
    let realm = realm.clone();
    let shift = zone_shift_ms(profile.timezone_offset_minutes);
    wrap_method(date_proto, name, move |_, this, args| {
        let time = time_value(&realm, this)?;
        let shifted = Date::new(&JsValue::from_f64(time - shift));
        let setter = Reflect::get(&shifted, &JsValue::from_str(utc_name))?;
        if !setter.is_function() {
            return Err(FingerprintError::missing(utc_name));
        }
        let local = Reflect::apply(setter.unchecked_ref::<js_sys::Function>(), &shifted, args)?
            .as_f64()
            .unwrap_or(f64::NAN);
        let updated = local + shift;
        this.unchecked_ref::<Date>().set_time(updated);
        Ok(JsValue::from_f64(this.unchecked_ref::<Date>().get_time()))
    })
}

/// `new Date(y, m, ...)` reads its components in the profile zone and
/// `Date()` renders the current time there. The other forms pass through.
fn wrap_date_constructor(realm: &Realm, date_proto: &Object, profile: &Rc<IdentityProfile>) -> Result<()> {
    let offset = profile.timezone_offset_minutes;
    let call_profile = Rc::clone(profile);
    let render_now = move |_: &js_sys::Function, _: &JsValue, _: &Array| -> Result<JsValue> {
        Ok(JsValue::from_str(&format_date_string(
            Date::now(),
            call_profile.timezone_offset_minutes,
            &call_profile.time_zone,
        )))
    };
    let proxy = wrap_constructor_with_call(realm.global(), "Date", move |args| {
        if args.length() < 2 {
            return Ok(args.clone());
        }
        let fields = args
            .iter()
            .take(7)
            .map(|arg| to_number(&arg))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array::of1(&JsValue::from_f64(local_components_to_time(&fields, offset))))
    }, render_now)?;
    install_value(date_proto, "constructor", &proxy)
}

/// Copy of `options` with `timeZone` filled in when the caller left it out.
fn with_time_zone(options: &JsValue, time_zone: &str) -> Result<JsValue> {
    let merged = Object::new();
    if options.is_object() {
        Object::assign(&merged, options.unchecked_ref());
    }
    let key = JsValue::from_str("timeZone");
    let current = Reflect::get(&merged, &key)?;
    if current.is_undefined() {
        Reflect::set(&merged, &key, &JsValue::from_str(time_zone))?;
    }
    Ok(merged.into())
}

/// `(locales, options)` with the profile's locale and zone as defaults.
fn default_arguments(args: &Array, profile: &IdentityProfile) -> Result<Array> {
    let locales = args.get(0);
    let locales = if locales.is_undefined() {
        JsValue::from_str(&profile.language)
    } else {
        locales
    };
    let options = with_time_zone(&args.get(1), &profile.time_zone)?;
    let rewritten = Array::of2(&locales, &options);
    for extra in 2..args.length() {
        rewritten.push(&args.get(extra));
    }
    Ok(rewritten)
}

fn wrap_locale_defaults(date_proto: &Object, name: &str, profile: &Rc<IdentityProfile>) -> Result<()> {
    let profile = Rc::clone(profile);
    wrap_method(date_proto, name, move |original, this, args| {
        let args = default_arguments(args, &profile)?;
        Ok(Reflect::apply(original, this, &args)?)
    })
}

fn wrap_date_time_format(realm: &Realm, profile: &Rc<IdentityProfile>) -> Result<()> {
    let intl: Object = realm.require("Intl")?.unchecked_into();
    let ctor_profile = Rc::clone(profile);
    let proxy = wrap_constructor(&intl, "DateTimeFormat", move |args| {
        default_arguments(args, &ctor_profile)
    })?;

    let proto: Object = Reflect::get(&proxy, &JsValue::from_str("prototype"))?.unchecked_into();
    install_value(&proto, "constructor", &proxy)?;

    let profile = Rc::clone(profile);
    wrap_result(&proto, "resolvedOptions", move |resolved, _, _| {
        Reflect::set(&resolved, &JsValue::from_str("locale"), &JsValue::from_str(&profile.language))?;
        Reflect::set(&resolved, &JsValue::from_str("timeZone"), &JsValue::from_str(&profile.time_zone))?;
        Ok(resolved)
    })
}

fn wrap_number_format(realm: &Realm, profile: &Rc<IdentityProfile>) -> Result<()> {
    let intl = realm.require("Intl")?;
    let ctor = Reflect::get(&intl, &JsValue::from_str("NumberFormat"))?;
    let proto = Reflect::get(&ctor, &JsValue::from_str("prototype"))?;
    if !proto.is_object() {
        return Err(FingerprintError::missing("Intl.NumberFormat"));
    }
    let profile = Rc::clone(profile);
    wrap_result(proto.unchecked_ref(), "resolvedOptions", move |resolved, _, _| {
        Reflect::set(&resolved, &JsValue::from_str("locale"), &JsValue::from_str(&profile.language))?;
        Ok(resolved)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        assert_eq!(
            format_date_string(0.0, 0, "UTC"),
            "Thu Jan 01 1970 00:00:00 GMT+0000 (Coordinated Universal Time)"
        );
    }

    #[test]
    fn test_known_dates() {
        assert_eq!(
            format_date_string(1_792_411_200_000.0, 0, "UTC"),
            "Mon Oct 19 2026 12:00:00 GMT+0000 (Coordinated Universal Time)"
        );
        assert_eq!(
            format_date_string(951_868_799_000.0, 0, "UTC"),
            "Tue Feb 29 2000 23:59:59 GMT+0000 (Coordinated Universal Time)"
        );
    }

    #[test]
    fn test_before_epoch() {
        assert_eq!(
            format_date_string(-3_600_000.0, 0, "UTC"),
            "Wed Dec 31 1969 23:00:00 GMT+0000 (Coordinated Universal Time)"
        );
    }

    #[test]
    fn test_time_string() {
        assert_eq!(
            format_time_string(1_792_411_200_000.0, 0, "UTC"),
            "12:00:00 GMT+0000 (Coordinated Universal Time)"
        );
    }

    #[test]
    fn test_invalid_date() {
        assert_eq!(format_date_string(f64::NAN, 0, "UTC"), "Invalid Date");
        assert_eq!(format_time_string(f64::NAN, 0, "UTC"), "Invalid Date");
    }

    #[test]
    fn test_non_utc_offset() {
        // offset -60 is one hour east of UTC
        assert_eq!(
            format_time_string(0.0, -60, "Europe/Berlin"),
            "01:00:00 GMT+0100 (Europe/Berlin)"
        );
        assert_eq!(zone_suffix(330, "X"), "GMT-0530 (X)");
    }

    #[test]
    fn test_civil_time_fields() {
        let t = CivilTime::from_epoch_ms(951_868_799_123.0).unwrap();
        assert_eq!((t.year, t.month, t.day), (2000, 2, 29));
        assert_eq!(t.weekday, 2);
        assert_eq!((t.hour, t.minute, t.second, t.millisecond), (23, 59, 59, 123));
    }

    #[test]
    fn test_local_fields_follow_the_offset() {
        // 1970-01-01T00:00Z is 19:00 on Dec 31 five hours west of UTC
        assert_eq!(local_field(0.0, 300, LocalField::Hours), 19.0);
        assert_eq!(local_field(0.0, 300, LocalField::Date), 31.0);
        assert_eq!(local_field(0.0, 300, LocalField::Month), 11.0);
        assert_eq!(local_field(0.0, 300, LocalField::FullYear), 1969.0);
        assert_eq!(local_field(0.0, 300, LocalField::Year), 69.0);
        assert_eq!(local_field(0.0, 300, LocalField::Day), 3.0);
        assert_eq!(local_field(0.0, -60, LocalField::Hours), 1.0);
        assert_eq!(local_field(90_061_001.0, 0, LocalField::Minutes), 1.0);
        assert_eq!(local_field(90_061_001.0, 0, LocalField::Seconds), 1.0);
        assert_eq!(local_field(90_061_001.0, 0, LocalField::Milliseconds), 1.0);
        assert!(local_field(f64::NAN, 0, LocalField::Hours).is_nan());
    }

    #[test]
    fn test_utc_profile_hides_the_host_offset() {
        // getHours() - getUTCHours() must give the profile offset, not the host's
        let now = 1_792_411_200_000.0;
        let utc_hours = CivilTime::from_epoch_ms(now).unwrap().hour;
        assert_eq!(local_field(now, 0, LocalField::Hours), f64::from(utc_hours));
    }

    #[test]
    fn test_date_string_agrees_with_to_string_near_midnight() {
        // 23:59:59.999 local, one millisecond before the date changes
        let ms = 86_400_000.0 - 1.0 + 300.0 * 60_000.0;
        let full = format_date_string(ms, 300, "America/New_York");
        let date_only = format_date_only(ms, 300, "America/New_York");
        assert_eq!(date_only, "Thu Jan 01 1970");
        assert!(full.starts_with(&date_only));
        assert_eq!(format_date_only(f64::NAN, 0, "UTC"), "Invalid Date");
    }

    #[test]
    fn test_components_read_in_profile_zone() {
        assert_eq!(local_components_to_time(&[1970.0, 0.0], 0), 0.0);
        assert_eq!(local_components_to_time(&[1970.0, 0.0, 1.0], 300), 5.0 * 3_600_000.0);
        assert_eq!(
            local_components_to_time(&[2000.0, 1.0, 29.0, 23.0, 59.0, 59.0], 0),
            951_868_799_000.0
        );
        // two-digit years and month overflow
        assert_eq!(
            local_components_to_time(&[99.0, 12.0], 0),
            local_components_to_time(&[2000.0, 0.0], 0)
        );
        assert_eq!(local_components_to_time(&[1970.0, -1.0], 0), -31.0 * 86_400_000.0);
        assert!(local_components_to_time(&[f64::NAN, 0.0], 0).is_nan());
        assert!(local_components_to_time(&[300_000.0, 0.0], 0).is_nan());
    }

    #[test]
    fn test_components_round_trip_through_local_fields() {
        let offset = -120;
        let time = local_components_to_time(&[2026.0, 9.0, 19.0, 8.0, 30.0], offset);
        assert_eq!(local_field(time, offset, LocalField::FullYear), 2026.0);
        assert_eq!(local_field(time, offset, LocalField::Month), 9.0);
        assert_eq!(local_field(time, offset, LocalField::Date), 19.0);
        assert_eq!(local_field(time, offset, LocalField::Hours), 8.0);
        assert_eq!(local_field(time, offset, LocalField::Minutes), 30.0);
    }
}
