//! Identity profile: the one consistent bundle of identity values a
//! document sees for its whole lifetime.
//!
//! The platform family always comes from the raw user agent so the
//! JS-visible values agree with the headers the host sends. Everything
//! else comes from `NormalizedDefaults` (stable strategy) or from small
//! allow-lists drawn once with the session seed (session strategy).

use std::cell::OnceCell;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::prng::{draw, SessionPrng};
use crate::settings::ProfileStrategy;

/// Fixed, low-entropy defaults shared by every profile.
pub struct NormalizedDefaults;

impl NormalizedDefaults {
    pub const BROWSER_MAJOR: &'static str = "120";
    pub const USER_AGENT: &'static str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const VENDOR: &'static str = "Google Inc.";
    pub const LANGUAGE: &'static str = "en-US";
    pub const LANGUAGES: &'static [&'static str] = &["en-US", "en"];
    pub const HARDWARE_CONCURRENCY: u32 = 8;
    pub const DEVICE_MEMORY_GIB: u32 = 8;
    pub const MAX_TOUCH_POINTS: u32 = 0;
    pub const COLOR_DEPTH: u32 = 24;
    pub const PIXEL_DEPTH: u32 = 24;
    pub const SCREEN_WIDTH: u32 = 1920;
    pub const SCREEN_HEIGHT: u32 = 1080;
    pub const VIEWPORT_STEP: f64 = 10.0;
    pub const TIMEZONE_OFFSET_MINUTES: i32 = 0;
    pub const TIME_ZONE: &'static str = "UTC";
}

/// Session strategy allow-lists. All are common real-world values.
const CONCURRENCY_CHOICES: &[u32] = &[4, 8, 12, 16];
const MEMORY_CHOICES: &[u32] = &[4, 8];
const SCREEN_CHOICES: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1366, 768),
    (1440, 900),
    (2560, 1440),
];

static CHROME_MAJOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Chrome/(\d+)\.").expect("valid regex"));
static CHROME_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Chrome/([0-9.]+)").expect("valid regex"));
static MAC_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Mac OS X (\d+)[_.](\d+)(?:[_.](\d+))?").expect("valid regex"));

/// Operating-system family read from the raw user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlatformFamily {
    Windows,
    MacOs,
    Linux,
}

impl PlatformFamily {
    pub fn classify(user_agent: &str) -> Self {
        let lower = user_agent.to_ascii_lowercase();
        if lower.contains("mac") {
            PlatformFamily::MacOs
        } else if lower.contains("linux") {
            PlatformFamily::Linux
        } else {
            PlatformFamily::Windows
        }
    }

    /// `navigator.platform`
    pub fn platform(&self) -> &'static str {
        match self {
            PlatformFamily::Windows => "Win32",
            PlatformFamily::MacOs => "MacIntel",
            PlatformFamily::Linux => "Linux x86_64",
        }
    }

    /// Client-hints platform label.
    pub fn label(&self) -> &'static str {
        match self {
            PlatformFamily::Windows => "Windows",
            PlatformFamily::MacOs => "macOS",
            PlatformFamily::Linux => "Linux",
        }
    }

    fn default_version(&self) -> &'static str {
        match self {
            PlatformFamily::Windows => "10.0.0",
            PlatformFamily::MacOs => "10.15.7",
            PlatformFamily::Linux => "0.0.0",
        }
    }
}

/// Real viewport size, read once before any override lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Round to the nearest multiple of `step`. Unusable input yields `None`.
pub fn quantize(value: f64, step: f64) -> Option<u32> {
    if !value.is_finite() || value <= 0.0 || step <= 0.0 {
        return None;
    }
    let rounded = (value / step).round() * step;
    if rounded < 1.0 {
        None
    } else {
        Some(rounded as u32)
    }
}

/// Browser version tokens parsed from the raw user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserVersion {
    pub major: String,
    pub full: String,
}

impl BrowserVersion {
    pub fn parse(user_agent: &str) -> Self {
        let major = CHROME_MAJOR
            .captures(user_agent)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| NormalizedDefaults::BROWSER_MAJOR.to_string());
        let full = CHROME_FULL
            .captures(user_agent)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_end_matches('.').to_string())
            .filter(|full| full.starts_with(&format!("{}.", major)))
            .unwrap_or_else(|| format!("{}.0.0.0", major));
        Self { major, full }
    }
}

fn platform_version(family: PlatformFamily, user_agent: &str) -> String {
    if family == PlatformFamily::MacOs {
        if let Some(caps) = MAC_VERSION.captures(user_agent) {
            let part = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("0");
            return format!("{}.{}.{}", part(1), part(2), part(3));
        }
    }
    family.default_version().to_string()
}

/// Immutable identity bundle. Every field agrees with every other one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub family: PlatformFamily,
    pub platform: String,
    pub ua_platform_label: String,
    pub platform_version: String,
    pub user_agent: String,
    pub app_version: String,
    pub vendor: String,
    pub browser_major: String,
    pub browser_full_version: String,
    pub language: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: u32,
    pub device_memory_gib: u32,
    pub max_touch_points: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone_offset_minutes: i32,
    pub time_zone: String,
}

impl IdentityProfile {
    /// Build a profile with the requested strategy.
    pub fn generate(
        strategy: ProfileStrategy,
        raw_user_agent: &str,
        viewport: Option<Viewport>,
        seed: impl FnOnce() -> u32,
    ) -> Self {
        match strategy {
            ProfileStrategy::Stable => Self::stable_derived(raw_user_agent, viewport),
            ProfileStrategy::Session => Self::session_randomized(seed(), raw_user_agent),
        }
    }

    /// Quantize real values into one common configuration.
    pub fn stable_derived(raw_user_agent: &str, viewport: Option<Viewport>) -> Self {
        let mut profile = Self::base(raw_user_agent);
        if let Some(viewport) = viewport {
            let step = NormalizedDefaults::VIEWPORT_STEP;
            if let (Some(w), Some(h)) = (quantize(viewport.width, step), quantize(viewport.height, step)) {
                profile.screen_width = w;
                profile.screen_height = h;
            }
        }
        profile
    }

    /// Draw hardware and screen from allow-lists with `seed`.
    pub fn session_randomized(seed: u32, raw_user_agent: &str) -> Self {
        let mut profile = Self::base(raw_user_agent);
        profile.hardware_concurrency =
            SessionPrng::pick(seed, draw::HARDWARE_CONCURRENCY, CONCURRENCY_CHOICES);
        profile.device_memory_gib = SessionPrng::pick(seed, draw::DEVICE_MEMORY, MEMORY_CHOICES);
        let (width, height) = SessionPrng::pick(seed, draw::SCREEN, SCREEN_CHOICES);
        profile.screen_width = width;
        profile.screen_height = height;
        profile
    }

    fn base(raw_user_agent: &str) -> Self {
        let user_agent = match raw_user_agent.trim() {
            "" => NormalizedDefaults::USER_AGENT.to_string(),
            ua => ua.to_string(),
        };
        let family = PlatformFamily::classify(&user_agent);
        let version = BrowserVersion::parse(&user_agent);
        let app_version = user_agent
            .strip_prefix("Mozilla/")
            .unwrap_or(&user_agent)
            .to_string();

        Self {
            family,
            platform: family.platform().to_string(),
            ua_platform_label: family.label().to_string(),
            platform_version: platform_version(family, &user_agent),
            user_agent,
            app_version,
            vendor: NormalizedDefaults::VENDOR.to_string(),
            browser_major: version.major,
            browser_full_version: version.full,
            language: NormalizedDefaults::LANGUAGE.to_string(),
            languages: NormalizedDefaults::LANGUAGES
                .iter()
                .map(|l| l.to_string())
                .collect(),
            hardware_concurrency: NormalizedDefaults::HARDWARE_CONCURRENCY,
            device_memory_gib: NormalizedDefaults::DEVICE_MEMORY_GIB,
            max_touch_points: NormalizedDefaults::MAX_TOUCH_POINTS,
            color_depth: NormalizedDefaults::COLOR_DEPTH,
            pixel_depth: NormalizedDefaults::PIXEL_DEPTH,
            screen_width: NormalizedDefaults::SCREEN_WIDTH,
            screen_height: NormalizedDefaults::SCREEN_HEIGHT,
            timezone_offset_minutes: NormalizedDefaults::TIMEZONE_OFFSET_MINUTES,
            time_zone: NormalizedDefaults::TIME_ZONE.to_string(),
        }
    }
}

/// Per-document memo. The first `get_or_generate` wins for the lifetime of
/// the cell.
#[derive(Default)]
pub struct ProfileCell {
    inner: OnceCell<Rc<IdentityProfile>>,
}

impl ProfileCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Rc<IdentityProfile>> {
        self.inner.get().cloned()
    }

    pub fn get_or_generate(&self, generate: impl FnOnce() -> IdentityProfile) -> Rc<IdentityProfile> {
        Rc::clone(self.inner.get_or_init(|| Rc::new(generate())))
    }
}
