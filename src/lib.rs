//! # Fingerprint Shield
//!
//! A fingerprint surface normalization engine compiled to WebAssembly.
//!
//! The host injects this module into every document before page scripts
//! run. It derives one identity profile per document and makes every
//! device-specific surface (navigator attributes, screen geometry, canvas
//! and audio extraction, GPU parameters, layout probes, clocks, locale)
//! report that profile instead of the real device.
//!
//! ## Architecture
//!
//! ```text
//! apply_fingerprint_protection (bootstrap, one-shot guard)
//!   ↓
//! IdentityProfile (derived once from the unpatched host)
//!   ↓
//! Component pass: navigator → screen → canvas → webgl → audio
//!                 → layout → timing → locale → hardening → frames
//!   ↓
//! Override primitive / Proxy wrappers (page-visible effect)
//! ```
//!
//! The pure parts (profile derivation, quantization, probe classification,
//! the GPU table, settings planning, date formatting) have no browser
//! dependency and are tested natively.

use wasm_bindgen::prelude::*;

pub mod error;
pub mod fingerprint_defense;
pub mod settings;

pub use error::{ErrorCode, ErrorInfo, ErrorKind, FingerprintError, Result};
pub use fingerprint_defense::profile::{IdentityProfile, PlatformFamily};
pub use fingerprint_defense::{
    apply_fingerprint_protection, check_protection_status, get_identity_profile, PassContext,
    PassReport, SkippedStep,
};
pub use settings::{ComponentToggles, InjectionPlan, ProfileStrategy, ProtectionSettings};

#[wasm_bindgen(start)]
pub fn init() {
    if console_log::init_with_level(log::Level::Warn).is_err() {
        log::debug!("logger already installed");
    }
}
