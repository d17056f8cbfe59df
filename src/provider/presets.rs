//! Named provider presets.
//!
//! Each preset carries the slot → unit table of one of the demo ad
//! network integrations. Unit ids are the networks' public test units.

use super::simulated::{LoadBehavior, SimulatedProvider};

/// Slot table for a named preset, or `None` if the name is unknown.
pub fn preset_tokens(name: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match name {
        "dummy-one" => Some(DUMMY_ONE),
        "dummy-two" => Some(DUMMY_TWO),
        "unity-ads" => Some(UNITY_ADS),
        "admob" => Some(ADMOB),
        _ => None,
    }
}

/// All preset names, in listing order.
pub const PRESET_NAMES: &[&str] = &["dummy-one", "dummy-two", "unity-ads", "admob"];

/// Build a simulated provider named after the preset, seeded with its
/// slot table. Returns `None` for unknown presets.
pub fn build(name: &str, behavior: LoadBehavior) -> Option<SimulatedProvider> {
    let tokens = preset_tokens(name)?;
    let provider = tokens
        .iter()
        .fold(SimulatedProvider::new(name, behavior), |p, (slot, unit)| {
            p.with_token(slot, unit)
        });
    Some(provider)
}

/// Interstitial network one.
const DUMMY_ONE: &[(&str, &str)] = &[("Full-Screen", "1234567")];

/// Interstitial network two.
const DUMMY_TWO: &[(&str, &str)] = &[("Full-Screen", "1234567")];

/// Unity Ads banner placements.
const UNITY_ADS: &[(&str, &str)] = &[
    ("Top-Banner-Ad", "1234567"),
    ("Bottom-Banner-Ad", "1234567"),
];

/// AdMob banner units (Google's sample banner unit).
const ADMOB: &[(&str, &str)] = &[
    ("Top-Banner-Ad", "ca-app-pub-3940256099942544/6300978111"),
    ("Bottom-Banner-Ad", "ca-app-pub-3940256099942544/6300978111"),
];
