//! GPU capability normalization.
//!
//! `getParameter` answers a small table of fingerprint-relevant parameters
//! and passes every other id through. Only the debug-renderer-info
//! extension is hidden.

use js_sys::{Array, Float32Array, Int32Array, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::proxy_helpers::{to_dom_string, to_number, wrap_method, wrap_result, Realm};
use super::PassContext;
use crate::error::{isolated, FingerprintError, Result};

pub const DEBUG_RENDERER_INFO: &str = "WEBGL_debug_renderer_info";

pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const UNMASKED_VENDOR_WEBGL: u32 = 0x9245;
pub const UNMASKED_RENDERER_WEBGL: u32 = 0x9246;
pub const MAX_TEXTURE_SIZE: u32 = 0x0D33;
pub const MAX_VIEWPORT_DIMS: u32 = 0x0D3A;
pub const MAX_RENDERBUFFER_SIZE: u32 = 0x84E8;
pub const MAX_VERTEX_ATTRIBS: u32 = 0x8869;
pub const MAX_TEXTURE_IMAGE_UNITS: u32 = 0x8872;
pub const MAX_COMBINED_TEXTURE_IMAGE_UNITS: u32 = 0x8B4D;
pub const MAX_CUBE_MAP_TEXTURE_SIZE: u32 = 0x851C;
pub const MAX_VERTEX_UNIFORM_VECTORS: u32 = 0x8DFB;
pub const MAX_FRAGMENT_UNIFORM_VECTORS: u32 = 0x8DFD;
pub const MAX_VARYING_VECTORS: u32 = 0x8DFC;
pub const ALIASED_POINT_SIZE_RANGE: u32 = 0x846D;
pub const ALIASED_LINE_WIDTH_RANGE: u32 = 0x846E;

/// Normalized answer to a `getParameter` query.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuValue {
    Text(&'static str),
    Int(i32),
    /// `Float32Array` of two elements.
    Range(f32, f32),
    /// `Int32Array` of two elements.
    Dims(i32, i32),
    /// The parameter is reported as unsupported.
    Unsupported,
}

/// The normalized value for `id`, or `None` to pass it through.
pub fn gpu_parameter(id: u32) -> Option<GpuValue> {
    let value = match id {
        VENDOR => GpuValue::Text("WebKit"),
        RENDERER => GpuValue::Text("WebKit WebGL"),
        UNMASKED_VENDOR_WEBGL | UNMASKED_RENDERER_WEBGL => GpuValue::Unsupported,
        MAX_TEXTURE_SIZE | MAX_RENDERBUFFER_SIZE | MAX_CUBE_MAP_TEXTURE_SIZE => GpuValue::Int(16384),
        MAX_VIEWPORT_DIMS => GpuValue::Dims(32767, 32767),
        MAX_VERTEX_ATTRIBS | MAX_TEXTURE_IMAGE_UNITS => GpuValue::Int(16),
        MAX_COMBINED_TEXTURE_IMAGE_UNITS => GpuValue::Int(32),
        MAX_VERTEX_UNIFORM_VECTORS => GpuValue::Int(4096),
        MAX_FRAGMENT_UNIFORM_VECTORS => GpuValue::Int(1024),
        MAX_VARYING_VECTORS => GpuValue::Int(30),
        ALIASED_POINT_SIZE_RANGE => GpuValue::Range(1.0, 1024.0),
        ALIASED_LINE_WIDTH_RANGE => GpuValue::Range(1.0, 1.0),
        _ => return None,
    };
    Some(value)
}

/// WebIDL `GLenum` (`unsigned long`) from an already converted number:
/// truncate, then wrap modulo 2^32. NaN and infinities become 0.
pub fn gl_enum(number: f64) -> u32 {
    if !number.is_finite() {
        return 0;
    }
    number.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Case-insensitive match against the hidden extension.
pub fn is_blocked_extension(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEBUG_RENDERER_INFO)
}

pub fn filter_extensions<I: IntoIterator<Item = String>>(names: I) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !is_blocked_extension(name))
        .collect()
}

impl GpuValue {
    fn to_js(&self) -> JsValue {
        match self {
            GpuValue::Text(s) => JsValue::from_str(s),
            GpuValue::Int(n) => JsValue::from_f64(*n as f64),
            GpuValue::Range(lo, hi) => Float32Array::from(&[*lo, *hi][..]).into(),
            GpuValue::Dims(w, h) => Int32Array::from(&[*w, *h][..]).into(),
            GpuValue::Unsupported => JsValue::NULL,
        }
    }
}

pub fn apply(ctx: &PassContext) -> Result<()> {
    apply_to_realm(&ctx.realm)
}

pub fn apply_to_realm(realm: &Realm) -> Result<()> {
    let mut wrapped = 0;
    for gl_name in ["WebGLRenderingContext", "WebGL2RenderingContext"] {
        if isolated(gl_name, || apply_to_context(realm, gl_name)) {
            wrapped += 1;
        }
    }
    if wrapped == 0 {
        return Err(FingerprintError::missing("WebGLRenderingContext"));
    }
    Ok(())
}

fn apply_to_context(realm: &Realm, gl_name: &str) -> Result<()> {
    let proto = realm.prototype(gl_name)?;

    // convert once and hand the host the converted value
    wrap_method(&proto, "getParameter", |original, this, args| {
        if args.length() == 0 {
            return Ok(Reflect::apply(original, this, args)?);
        }
        let id = gl_enum(to_number(&args.get(0))?);
        match gpu_parameter(id) {
            Some(value) => Ok(value.to_js()),
            None => Ok(Reflect::apply(original, this, &Array::of1(&JsValue::from(id)))?),
        }
    })?;

    wrap_method(&proto, "getExtension", |original, this, args| {
        if args.length() == 0 {
            return Ok(Reflect::apply(original, this, args)?);
        }
        let name = to_dom_string(&args.get(0))?;
        if is_blocked_extension(&name) {
            return Ok(JsValue::NULL);
        }
        Ok(Reflect::apply(original, this, &Array::of1(&JsValue::from_str(&name)))?)
    })?;

    wrap_result(&proto, "getSupportedExtensions", |result, _, _| {
        if !Array::is_array(&result) {
            return Ok(result);
        }
        let list: &Array = result.unchecked_ref();
        // filter in place so the array stays owned by the page's realm
        let kept = filter_extensions(list.iter().filter_map(|v| v.as_string()));
        list.set_length(0);
        for name in kept {
            list.push(&JsValue::from_str(&name));
        }
        Ok(result)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_strings() {
        assert_eq!(gpu_parameter(VENDOR), Some(GpuValue::Text("WebKit")));
        assert_eq!(gpu_parameter(RENDERER), Some(GpuValue::Text("WebKit WebGL")));
        assert_eq!(gpu_parameter(UNMASKED_VENDOR_WEBGL), Some(GpuValue::Unsupported));
        assert_eq!(gpu_parameter(UNMASKED_RENDERER_WEBGL), Some(GpuValue::Unsupported));
    }

    #[test]
    fn test_limits() {
        assert_eq!(gpu_parameter(MAX_TEXTURE_SIZE), Some(GpuValue::Int(16384)));
        assert_eq!(gpu_parameter(MAX_RENDERBUFFER_SIZE), Some(GpuValue::Int(16384)));
        assert_eq!(gpu_parameter(MAX_VERTEX_ATTRIBS), Some(GpuValue::Int(16)));
        assert_eq!(gpu_parameter(MAX_VIEWPORT_DIMS), Some(GpuValue::Dims(32767, 32767)));
        assert_eq!(gpu_parameter(ALIASED_LINE_WIDTH_RANGE), Some(GpuValue::Range(1.0, 1.0)));
    }

    #[test]
    fn test_other_parameters_pass_through() {
        // VERSION, SHADING_LANGUAGE_VERSION, DEPTH_BITS, BLEND
        for id in [0x1F02, 0x8B8C, 0x0D56, 0x0BE2] {
            assert_eq!(gpu_parameter(id), None);
        }
    }

    #[test]
    fn test_gl_enum_wraps_like_unsigned_long() {
        assert_eq!(gl_enum(f64::from(MAX_TEXTURE_SIZE)), MAX_TEXTURE_SIZE);
        assert_eq!(gl_enum(3379.0 + 4_294_967_296.0), MAX_TEXTURE_SIZE);
        assert_eq!(gl_enum(37446.9), UNMASKED_RENDERER_WEBGL);
        assert_eq!(gl_enum(-1.0), u32::MAX);
        assert_eq!(gl_enum(f64::NAN), 0);
        assert_eq!(gl_enum(f64::INFINITY), 0);
    }

    #[test]
    fn test_extension_block_ignores_case() {
        assert!(is_blocked_extension("WEBGL_debug_renderer_info"));
        assert!(is_blocked_extension("webgl_debug_renderer_info"));
        assert!(is_blocked_extension("WebGL_Debug_Renderer_Info"));
        assert!(!is_blocked_extension("OES_texture_float"));
        assert!(!is_blocked_extension("WEBGL_debug_shaders"));
    }

    #[test]
    fn test_filter_extensions() {
        let names = vec![
            "ANGLE_instanced_arrays".to_string(),
            "WEBGL_debug_renderer_info".to_string(),
            "OES_texture_float".to_string(),
        ];
        assert_eq!(
            filter_extensions(names),
            vec!["ANGLE_instanced_arrays".to_string(), "OES_texture_float".to_string()]
        );
    }
}
