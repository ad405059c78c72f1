//! Path eligibility rules.
//!
//! A path is a caching candidate when its extension is allow-listed and none
//! of the exclusion substrings occur in it. Both checks ignore case.

use std::collections::HashSet;
use std::path::Path;

/// Asset extensions cached when the host supplies no explicit allow-list.
pub const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    "mdl", "tex", "mtrl", "shpk", "avfx", "atex", "tmb", "pap", "sklb", "eid", "phyb", "scd",
    "skp", "atch",
];

pub fn default_asset_extensions_vec() -> Vec<String> {
    DEFAULT_ASSET_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

/// Normalised snapshot of the allow-list and exclusions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EligibilityRule {
    allowed_extensions: HashSet<String>,
    exclusion_substrings: Vec<String>,
}

impl EligibilityRule {
    pub fn new<E, X>(allowed_extensions: &[E], exclusion_substrings: &[X]) -> Self
    where
        E: AsRef<str>,
        X: AsRef<str>,
    {
        let allowed_extensions = allowed_extensions
            .iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        let exclusion_substrings = exclusion_substrings
            .iter()
            .map(|pattern| pattern.as_ref())
            .filter(|pattern| !pattern.trim().is_empty())
            .map(str::to_lowercase)
            .collect();

        Self {
            allowed_extensions,
            exclusion_substrings,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        is_eligible(path, self)
    }
}

/// Decide whether `path` is a caching candidate under `rule`.
pub fn is_eligible(path: &Path, rule: &EligibilityRule) -> bool {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    if !rule.allowed_extensions.contains(&extension.to_lowercase()) {
        return false;
    }

    if rule.exclusion_substrings.is_empty() {
        return true;
    }
    let haystack = path.to_string_lossy().to_lowercase();
    !rule
        .exclusion_substrings
        .iter()
        .any(|pattern| haystack.contains(pattern.as_str()))
}

/// Supplies the rule in force right now. Implementations must not cache.
pub trait RuleSource: Send + Sync {
    fn current_rule(&self) -> EligibilityRule;
}

impl RuleSource for EligibilityRule {
    fn current_rule(&self) -> EligibilityRule {
        self.clone()
    }
}
