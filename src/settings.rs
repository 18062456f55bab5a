//! Host-supplied protection settings and the per-document injection plan.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{FingerprintError, Result};

/// Hosts that get the aggressive blocker instead of the normalizer.
pub const DEFAULT_TEST_HOSTS: &[&str] = &[
    "coveryourtracks.eff.org",
    "firstpartysimulator.net",
    "firstpartysimulator.org",
];

/// How the identity profile is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStrategy {
    /// Quantize real values into one common, internally consistent profile.
    #[default]
    Stable,
    /// Draw hardware and geometry from small allow-lists, once per document.
    Session,
}

/// Which normalizer components run. All are on by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComponentToggles {
    pub navigator: bool,
    pub screen: bool,
    pub canvas: bool,
    pub webgl: bool,
    pub audio: bool,
    pub layout: bool,
    pub timing: bool,
    pub locale: bool,
    pub hardening: bool,
    pub iframe_protection: bool,
}

impl Default for ComponentToggles {
    fn default() -> Self {
        Self {
            navigator: true,
            screen: true,
            canvas: true,
            webgl: true,
            audio: true,
            layout: true,
            timing: true,
            locale: true,
            hardening: true,
            iframe_protection: true,
        }
    }
}

/// Settings read once per document before injection decides to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtectionSettings {
    pub block_fingerprinting: bool,
    pub block_fingerprint_tests: bool,
    pub strategy: ProfileStrategy,
    pub test_hosts: Vec<String>,
    pub log_level: Option<String>,
    pub components: ComponentToggles,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            block_fingerprinting: true,
            block_fingerprint_tests: false,
            strategy: ProfileStrategy::Stable,
            test_hosts: DEFAULT_TEST_HOSTS.iter().map(|h| h.to_string()).collect(),
            log_level: None,
            components: ComponentToggles::default(),
        }
    }
}

/// The parts of `location` the plan depends on.
#[derive(Debug, Clone, Copy)]
pub struct PageLocation<'a> {
    pub protocol: &'a str,
    pub hostname: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    InternalPage,
    Disabled,
}

/// What the bootstrap does for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "plan", content = "reason")]
pub enum InjectionPlan {
    Skip(SkipReason),
    Normalize,
    BlockTestSite,
}

impl InjectionPlan {
    pub fn name(&self) -> &'static str {
        match self {
            InjectionPlan::Skip(_) => "skip",
            InjectionPlan::Normalize => "normalize",
            InjectionPlan::BlockTestSite => "blockTestSite",
        }
    }
}

impl ProtectionSettings {
    /// Parse settings from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_test_host(&self, hostname: &str) -> bool {
        let host = hostname.trim_end_matches('.');
        self.test_hosts
            .iter()
            .any(|candidate| candidate.trim_end_matches('.').eq_ignore_ascii_case(host))
    }

    pub fn plan(&self, location: &PageLocation<'_>) -> InjectionPlan {
        if location.protocol.eq_ignore_ascii_case("file:") {
            return InjectionPlan::Skip(SkipReason::InternalPage);
        }
        if self.block_fingerprint_tests && self.is_test_host(location.hostname) {
            return InjectionPlan::BlockTestSite;
        }
        if self.block_fingerprinting {
            InjectionPlan::Normalize
        } else {
            InjectionPlan::Skip(SkipReason::Disabled)
        }
    }

    /// Requested log level, if any was given and it parses.
    pub fn log_filter(&self) -> Result<Option<log::LevelFilter>> {
        match &self.log_level {
            None => Ok(None),
            Some(level) => log::LevelFilter::from_str(level)
                .map(Some)
                .map_err(|_| FingerprintError::InvalidSettings(format!("unknown log level `{}`", level))),
        }
    }
}
