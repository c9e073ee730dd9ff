//! Preset naming and ordering helpers

use std::cmp::Ordering;
use std::path::Path;

/// Display name of a preset: the file name without its extension
pub fn display_name(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
}

pub fn is_default(name: &str) -> bool {
    display_name(name).eq_ignore_ascii_case("default")
}

/// True when two names refer to the same preset, ignoring extension and case
pub fn same_preset(a: &str, b: &str) -> bool {
    display_name(a).eq_ignore_ascii_case(display_name(b))
}

fn compare(a: &str, b: &str) -> Ordering {
    is_default(b).cmp(&is_default(a)).then_with(|| {
        display_name(a)
            .to_lowercase()
            .cmp(&display_name(b).to_lowercase())
    })
}

/// "default" first, then alphabetical by display name
pub fn sort_presets(names: &mut [String]) {
    names.sort_by(|a, b| compare(a, b));
}

/// Sorted preset list together with the active preset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetListing {
    pub presets: Vec<String>,
    pub current: Option<String>,
}

impl PresetListing {
    pub fn new(mut presets: Vec<String>, current: Option<String>) -> Self {
        sort_presets(&mut presets);
        Self { presets, current }
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current
            .as_deref()
            .is_some_and(|current| same_preset(current, name))
    }
}

/// Outcome of a preset load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Preset loaded; carries the active preset name
    Loaded(String),
    /// Unsaved edits would be discarded; nothing was requested
    ConfirmationRequired,
    /// Invalid name or failed request; nothing changed
    Failed,
}
