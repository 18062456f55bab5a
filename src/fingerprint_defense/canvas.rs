//! Canvas extraction sanitizer.
//!
//! Only extraction APIs are intercepted; drawing and on-screen display are
//! untouched. Image exports are taken from a blank canvas of the same size
//! filled with `BLANK_FILL`, and raw pixel reads come back zeroed, so the
//! output depends on the canvas size alone.

use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;

use super::proxy_helpers::{call_method, get_f64, wrap_method, wrap_result, zero_typed_array, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

pub const BLANK_FILL: &str = "#ffffff";

/// Largest side used for a blank stand-in canvas.
const MAX_SIDE: f64 = 16384.0;

/// Index of the output buffer in `readPixels(x, y, w, h, format, type, pixels)`.
const READ_PIXELS_BUFFER: u32 = 6;

/// Integer size of a canvas as the stand-in canvas should have it.
pub fn export_size(width: Option<f64>, height: Option<f64>) -> (u32, u32) {
    let side = |v: Option<f64>| match v {
        Some(v) if v.is_finite() && v > 0.0 => v.min(MAX_SIDE).floor() as u32,
        _ => 0,
    };
    (side(width), side(height))
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let exports: [(&str, fn(&Realm) -> Result<()>); 2] = [
        ("canvas.export", wrap_element_exports),
        ("canvas.offscreen", wrap_offscreen_export),
    ];
    let mut wrapped = 0;
    for (step, wrap) in exports {
        if isolated(step, || wrap(realm)) {
            wrapped += 1;
        }
    }
    for ctx_name in [
        "CanvasRenderingContext2D",
        "OffscreenCanvasRenderingContext2D",
    ] {
        if isolated(ctx_name, || wrap_image_data(realm, ctx_name)) {
            wrapped += 1;
        }
    }
    for gl_name in ["WebGLRenderingContext", "WebGL2RenderingContext"] {
        if isolated(gl_name, || wrap_read_pixels(realm, gl_name)) {
            wrapped += 1;
        }
    }
    if wrapped == 0 {
        return Err(FingerprintError::missing("canvas"));
    }
    Ok(())
}

/// A blank canvas of the given size, painted with the fill color.
fn blank_canvas(realm: &Realm, width: u32, height: u32, offscreen: bool) -> Result<JsValue> {
    let canvas = if offscreen {
        realm.construct(
            "OffscreenCanvas",
            &[JsValue::from_f64(width as f64), JsValue::from_f64(height as f64)],
        )?
    } else {
        let canvas = realm.create_element("canvas")?;
        Reflect::set(&canvas, &JsValue::from_str("width"), &JsValue::from_f64(width as f64))?;
        Reflect::set(&canvas, &JsValue::from_str("height"), &JsValue::from_f64(height as f64))?;
        canvas
    };
    if width > 0 && height > 0 {
        let ctx = call_method(&canvas, "getContext", &[JsValue::from_str("2d")])?;
        if ctx.is_object() {
            Reflect::set(&ctx, &JsValue::from_str("fillStyle"), &JsValue::from_str(BLANK_FILL))?;
            call_method(
                &ctx,
                "fillRect",
                &[
                    JsValue::from_f64(0.0),
                    JsValue::from_f64(0.0),
                    JsValue::from_f64(width as f64),
                    JsValue::from_f64(height as f64),
                ],
            )?;
        }
    }
    Ok(canvas)
}

fn export_blank(
    realm: &Realm,
    original: &Function,
    this: &JsValue,
    args: &Array,
    offscreen: bool,
) -> Result<JsValue> {
    let (width, height) = export_size(get_f64(this, "width"), get_f64(this, "height"));
    let blank = blank_canvas(realm, width, height, offscreen)?;
    Ok(Reflect::apply(original, &blank, args)?)
}

fn wrap_element_exports(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("HTMLCanvasElement")?;
    for name in ["toDataURL", "toBlob"] {
        let realm = realm.clone();
        wrap_method(&proto, name, move |original, this, args| {
            export_blank(&realm, original, this, args, false)
        })?;
    }
    Ok(())
}

fn wrap_offscreen_export(realm: &Realm) -> Result<()> {
    let proto = realm.prototype("OffscreenCanvas")?;
    let realm = realm.clone();
    wrap_method(&proto, "convertToBlob", move |original, this, args| {
        export_blank(&realm, original, this, args, true)
    })
}

fn wrap_image_data(realm: &Realm, ctx_name: &str) -> Result<()> {
    let proto = realm.prototype(ctx_name)?;
    wrap_result(&proto, "getImageData", |image_data, _, _| {
        let data = Reflect::get(&image_data, &JsValue::from_str("data"))?;
        zero_typed_array(&data)?;
        Ok(image_data)
    })
}

fn wrap_read_pixels(realm: &Realm, gl_name: &str) -> Result<()> {
    let proto = realm.prototype(gl_name)?;
    wrap_result(&proto, "readPixels", |result, _, args| {
        if args.length() > READ_PIXELS_BUFFER {
            let pixels = args.get(READ_PIXELS_BUFFER);
            // the WebGL2 overload may pass a buffer offset instead of a view
            if !pixels.is_null() && !pixels.is_undefined() && pixels.is_object() {
                zero_typed_array(&pixels)?;
            }
        }
        Ok(result)
    })
}
