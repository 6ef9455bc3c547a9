use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use rrad_core::{ReasonCategory, UNKNOWN_LABEL};
use serde::{Deserialize, Serialize};

/// A return reason as it is stored and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedReason {
    pub label: String,
    pub category: ReasonCategory,
}

/// The only rules file layout this build understands.
pub const RULES_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRulesFile {
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<ReasonRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRule {
    pub handle: String,
    pub category: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
struct ReasonEntry {
    label: String,
    category: ReasonCategory,
}

const BUILT_IN: &[(&str, &str, ReasonCategory)] = &[
    ("too-small", "Size too small", ReasonCategory::Sizing),
    ("size-too-small", "Size too small", ReasonCategory::Sizing),
    ("too-large", "Size too large", ReasonCategory::Sizing),
    ("size-too-large", "Size too large", ReasonCategory::Sizing),
    ("wrong-size", "Wrong size", ReasonCategory::Sizing),
    ("poor-fit", "Poor fit", ReasonCategory::Sizing),
    ("unwanted", "Unwanted", ReasonCategory::Preference),
    ("changed-mind", "Changed mind", ReasonCategory::Preference),
    ("style", "Style", ReasonCategory::Preference),
    ("color", "Color", ReasonCategory::Preference),
    ("ordered-by-mistake", "Ordered by mistake", ReasonCategory::Preference),
    ("found-better-price", "Found a better price", ReasonCategory::Preference),
    ("not-as-described", "Not as described", ReasonCategory::Accuracy),
    ("wrong-item", "Received wrong item", ReasonCategory::Accuracy),
    ("different-from-picture", "Different from picture", ReasonCategory::Accuracy),
    ("defective", "Defective", ReasonCategory::Quality),
    ("damaged", "Damaged", ReasonCategory::Quality),
    ("damaged-or-defective", "Damaged or defective", ReasonCategory::Quality),
    ("poor-quality", "Poor quality", ReasonCategory::Quality),
    ("stopped-working", "Stopped working", ReasonCategory::Quality),
    ("arrived-late", "Arrived too late", ReasonCategory::Fulfillment),
    ("missing-parts", "Missing parts", ReasonCategory::Fulfillment),
    ("damaged-in-transit", "Damaged in transit", ReasonCategory::Fulfillment),
    ("other", "Other", ReasonCategory::Other),
];

fn built_in_entries() -> &'static HashMap<String, ReasonEntry> {
    static TABLE: OnceLock<HashMap<String, ReasonEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        BUILT_IN
            .iter()
            .map(|(handle, label, category)| {
                (
                    handle.to_string(),
                    ReasonEntry {
                        label: label.to_string(),
                        category: *category,
                    },
                )
            })
            .collect()
    })
}

/// Lowercase, with `_` and spaces folded to `-`.
pub(crate) fn normalize_handle(handle: &str) -> String {
    handle
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Origin reason handle → (label, category) lookup.
///
/// The built-in table can be extended or overridden from a YAML rules file;
/// handles nobody knows about map to [`ReasonCategory::Other`].
#[derive(Debug, Clone, Default)]
pub struct ReasonTaxonomy {
    overrides: HashMap<String, ReasonEntry>,
}

impl ReasonTaxonomy {
    pub fn built_in() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: ReasonRulesFile) -> Result<Self> {
        if rules.version != RULES_VERSION {
            bail!(
                "unsupported reason rules version {} (expected {RULES_VERSION})",
                rules.version
            );
        }
        let mut overrides = HashMap::new();
        for rule in rules.rules {
            let handle = normalize_handle(&rule.handle);
            let category: ReasonCategory = rule
                .category
                .parse()
                .with_context(|| format!("rule for handle {handle}"))?;
            let label = rule
                .label
                .or_else(|| built_in_entries().get(&handle).map(|e| e.label.clone()))
                .unwrap_or_else(|| title_from_handle(&handle));
            overrides.insert(handle, ReasonEntry { label, category });
        }
        Ok(Self { overrides })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let rules: ReasonRulesFile = serde_yaml::from_str(yaml).context("parsing reason rules")?;
        Self::from_rules(rules)
    }

    pub fn with_rules_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    pub fn category_for(&self, handle: &str) -> ReasonCategory {
        self.lookup(&normalize_handle(handle))
            .map(|e| e.category)
            .unwrap_or_default()
    }

    /// Map an origin reason to its reporting label and category. Never fails.
    ///
    /// The label prefers the origin-supplied name, then the table label, then `Unknown`.
    pub fn map_return_reason(&self, handle: Option<&str>, name: Option<&str>) -> MappedReason {
        let entry = handle
            .map(normalize_handle)
            .filter(|h| !h.is_empty())
            .and_then(|h| self.lookup(&h).cloned());

        let label = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| entry.as_ref().map(|e| e.label.clone()))
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

        MappedReason {
            label,
            category: entry.map(|e| e.category).unwrap_or_default(),
        }
    }

    fn lookup(&self, normalized: &str) -> Option<&ReasonEntry> {
        self.overrides
            .get(normalized)
            .or_else(|| built_in_entries().get(normalized))
    }
}

fn title_from_handle(handle: &str) -> String {
    let spaced = handle.replace('-', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => UNKNOWN_LABEL.to_string(),
    }
}
