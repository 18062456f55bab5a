//! End-to-end scenarios over the host-independent core.
//!
//! Run with: cargo test --test profile_scenarios

use fingerprint_shield::fingerprint_defense::client_hints::{self, Brand};
use fingerprint_shield::fingerprint_defense::navigator::{identity_attributes, AttributeValue};
use fingerprint_shield::fingerprint_defense::profile::{IdentityProfile, ProfileCell, Viewport};
use fingerprint_shield::fingerprint_defense::screen::screen_values;
use fingerprint_shield::settings::{InjectionPlan, PageLocation, ProfileStrategy, ProtectionSettings};

const WINDOWS_CHROME_120: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn attribute<'a>(attrs: &'a [(&'static str, AttributeValue)], name: &str) -> &'a AttributeValue {
    &attrs.iter().find(|(n, _)| *n == name).expect("attribute present").1
}

#[test]
fn windows_chrome_120_end_to_end() {
    let settings = ProtectionSettings::default();
    let plan = settings.plan(&PageLocation {
        protocol: "https:",
        hostname: "example.com",
    });
    assert_eq!(plan, InjectionPlan::Normalize);

    let profile = IdentityProfile::generate(settings.strategy, WINDOWS_CHROME_120, None, || {
        unreachable!("the stable strategy never draws a seed")
    });
    assert_eq!(profile.platform, "Win32");
    assert!(profile.user_agent.contains("Chrome/120"));

    let brands = client_hints::brands(&profile);
    assert!(brands.contains(&Brand {
        brand: "Google Chrome".to_string(),
        version: "120".to_string(),
    }));

    // navigator, hints and UA all tell the same story
    let attrs = identity_attributes(&profile);
    assert_eq!(attribute(&attrs, "platform"), &AttributeValue::Text("Win32".into()));
    assert_eq!(
        attribute(&attrs, "userAgent"),
        &AttributeValue::Text(WINDOWS_CHROME_120.into())
    );
    assert_eq!(client_hints::low_entropy(&profile)["platform"], "Windows");
}

#[test]
fn profile_is_memoized_per_document() {
    let cell = ProfileCell::new();
    let first = cell.get_or_generate(|| IdentityProfile::stable_derived(WINDOWS_CHROME_120, None));
    let second = cell.get_or_generate(|| {
        IdentityProfile::stable_derived("Mozilla/5.0 (X11; Linux x86_64) Chrome/99.0.0.0", None)
    });
    assert_eq!(first, second);
    assert_eq!(second.platform, "Win32");
}

#[test]
fn screen_follows_quantized_viewport() {
    let viewport = Viewport {
        width: 1366.4,
        height: 657.0,
    };
    let profile = IdentityProfile::stable_derived(WINDOWS_CHROME_120, Some(viewport));
    let values = screen_values(&profile);
    let width = values.iter().find(|(n, _)| *n == "width").map(|(_, v)| *v);
    assert_eq!(width, Some(f64::from(profile.screen_width)));
    assert_eq!(profile.screen_width % 10, 0);
    assert_eq!(profile.screen_height % 10, 0);
}

#[test]
fn session_strategy_keeps_the_platform() {
    let settings = ProtectionSettings::from_json(r#"{"strategy": "session"}"#).unwrap();
    assert_eq!(settings.strategy, ProfileStrategy::Session);
    for seed in [1u32, 7, 4242, u32::MAX] {
        let profile = IdentityProfile::generate(settings.strategy, WINDOWS_CHROME_120, None, || seed);
        assert_eq!(profile.platform, "Win32");
        assert_eq!(
            profile,
            IdentityProfile::generate(settings.strategy, WINDOWS_CHROME_120, None, || seed),
            "the same seed must give the same profile"
        );
    }
}

#[test]
fn test_site_blocking_replaces_the_normalizer() {
    let settings =
        ProtectionSettings::from_json(r#"{"blockFingerprintTests": true}"#).unwrap();
    let plan = settings.plan(&PageLocation {
        protocol: "https:",
        hostname: "coveryourtracks.eff.org",
    });
    assert_eq!(plan, InjectionPlan::BlockTestSite);
}
