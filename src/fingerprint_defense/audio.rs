//! Audio analysis sanitizer.
//!
//! Analyser readouts fill the caller's buffer with zeros instead of
//! computed data. Offline renders have every channel zeroed before the
//! caller sees the buffer, both through the `startRendering()` promise and
//! through `oncomplete` events.

use js_sys::{ArrayBuffer, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use super::proxy_helpers::{call_method, get_f64, wrap_getter, wrap_method, wrap_result, zero_typed_array, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

/// `AnalyserNode` readout methods. Each takes the output buffer first.
pub const ANALYSER_READOUTS: &[&str] = &[
    "getFloatFrequencyData",
    "getByteFrequencyData",
    "getFloatTimeDomainData",
    "getByteTimeDomainData",
];

/// Upper bound on channels walked in one buffer.
const MAX_CHANNELS: u32 = 32;

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let steps: [(&str, fn(&Realm) -> Result<()>); 3] = [
        ("audio.analyser", wrap_analyser),
        ("audio.startRendering", wrap_start_rendering),
        ("audio.renderedBuffer", wrap_rendered_buffer),
    ];
    let wrapped = steps
        .iter()
        .filter(|(step, wrap)| isolated(step, || wrap(realm)))
        .count();
    if wrapped == 0 {
        return Err(FingerprintError::missing("AudioContext"));
    }
    Ok(())
}

/// Zero every channel of an `AudioBuffer`.
pub fn zero_audio_buffer(buffer: &JsValue) -> Result<()> {
    let channels = get_f64(buffer, "numberOfChannels")
        .ok_or_else(|| FingerprintError::sanitizer("audio", "not an AudioBuffer"))?;
    for channel in 0..(channels as u32).min(MAX_CHANNELS) {
        let data = call_method(buffer, "getChannelData", &[JsValue::from_f64(channel as f64)])?;
        zero_typed_array(&data)?;
    }
    Ok(())
}

fn wrap_analyser(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("AnalyserNode")?;
    for name in ANALYSER_READOUTS {
        wrap_method(&proto, name, move |_, _, args| {
            let output = args.get(0);
            // non-buffers fall back to the host call, which throws its own TypeError
            if !ArrayBuffer::is_view(&output) {
                return Err(FingerprintError::sanitizer(*name, "argument is not a typed array"));
            }
            zero_typed_array(&output)?;
            Ok(JsValue::UNDEFINED)
        })?;
    }
    Ok(())
}

fn wrap_start_rendering(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("OfflineAudioContext")?;
    wrap_result(&proto, "startRendering", |rendering, _, _| {
        if !rendering.is_object() {
            return Err(FingerprintError::sanitizer("startRendering", "no promise returned"));
        }
        let rendering: Promise = rendering.unchecked_into();
        let sanitized = future_to_promise(async move {
            let buffer = JsFuture::from(rendering).await?;
            if let Err(err) = zero_audio_buffer(&buffer) {
                log::debug!("rendered buffer left as is: {}", err);
            }
            Ok(buffer)
        });
        Ok(sanitized.into())
    })
}

fn wrap_rendered_buffer(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("OfflineAudioCompletionEvent")?;
    wrap_getter(&proto, "renderedBuffer", |getter, this| {
        let buffer = getter.call0(this)?;
        zero_audio_buffer(&buffer)?;
        Ok(buffer)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readouts_cover_both_domains() {
        assert_eq!(ANALYSER_READOUTS.len(), 4);
        assert!(ANALYSER_READOUTS.iter().any(|m| m.contains("Frequency")));
        assert!(ANALYSER_READOUTS.iter().any(|m| m.contains("TimeDomain")));
    }
}
