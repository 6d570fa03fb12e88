//! Policy Validator
//!
//! Static rule gate applied to submitted source before anything is compiled
//! or registered. Checks are accumulated, never short-circuited, so one pass
//! reports every violation at once.
//!
//! Current rules:
//! - a documentation block (triple-delimited string literal) must be present
//! - no module from the denylist may be imported

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::types::PolicyVerdict;

pub const MISSING_DOC_BLOCK: &str = "Missing documentation block.";

/// Policy rule configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Modules that may not be imported (prefix match on dotted paths)
    pub denied_modules: Vec<String>,
    /// Require a documentation block
    pub require_doc_block: bool,
    /// Delimiters that open and close a documentation block
    pub doc_markers: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denied_modules: vec!["os".to_string(), "subprocess".to_string()],
            require_doc_block: true,
            doc_markers: vec!["\"\"\"".to_string(), "'''".to_string()],
        }
    }
}

impl PolicyConfig {
    /// Parse a `[policy]` table from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct PolicyFile {
            #[serde(default)]
            policy: PolicyConfig,
        }

        let file: PolicyFile = toml::from_str(content)?;
        Ok(file.policy)
    }
}

// `import a, b.c as d` at a statement start: line start, after `;`, or after
// a compound-statement colon (`def f(): import os`)
static RE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[;:])[ \t]*import[ \t]+([^;\n#]+)").unwrap()
});

// `from a.b import c`, same statement starts as above
static RE_FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[;:])[ \t]*from[ \t]+([A-Za-z_][\w.]*)[ \t]+import\b").unwrap()
});

// `__import__("a")` and `importlib.import_module("a")`
static RE_DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:__import__|import_module)\(\s*['"]([A-Za-z_][\w.]*)['"]"#).unwrap()
});

/// Stateless validator over a fixed rule set
#[derive(Debug, Clone, Default)]
pub struct PolicyValidator {
    config: PolicyConfig,
}

impl PolicyValidator {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Check source text against every rule
    pub fn validate(&self, source_code: &str) -> PolicyVerdict {
        let mut errors = Vec::new();

        if self.config.require_doc_block && !self.has_doc_block(source_code) {
            errors.push(MISSING_DOC_BLOCK.to_string());
        }

        let mut reported = HashSet::new();
        for module in imported_modules(source_code) {
            if let Some(denied) = self.denied_entry(&module) {
                if reported.insert(denied) {
                    errors.push(format!("Disallowed import: '{}'", denied));
                }
            }
        }

        PolicyVerdict::from_errors(errors)
    }

    /// A marker must open and later close a block
    fn has_doc_block(&self, source_code: &str) -> bool {
        if source_code.trim().is_empty() {
            return false;
        }

        self.config.doc_markers.iter().any(|marker| {
            if marker.is_empty() {
                return false;
            }
            match source_code.find(marker.as_str()) {
                Some(start) => source_code[start + marker.len()..].contains(marker.as_str()),
                None => false,
            }
        })
    }

    fn denied_entry(&self, module: &str) -> Option<&str> {
        self.config
            .denied_modules
            .iter()
            .map(|d| d.as_str())
            .find(|denied| {
                module == *denied
                    || (module.starts_with(denied) && module[denied.len()..].starts_with('.'))
            })
    }
}

/// Dotted module paths referenced by import statements, in source order
fn imported_modules(source_code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for cap in RE_IMPORT.captures_iter(source_code) {
        let list = &cap[1];
        let base = cap.get(1).map(|m| m.start()).unwrap_or(0);
        for item in list.split(',') {
            // drop `as alias`
            let name = item.split_whitespace().next().unwrap_or("");
            if !name.is_empty() {
                found.push((base, name.trim_matches(|c| c == '(' || c == ')').to_string()));
            }
        }
    }

    for cap in RE_FROM_IMPORT.captures_iter(source_code) {
        if let Some(m) = cap.get(1) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }

    for cap in RE_DYNAMIC_IMPORT.captures_iter(source_code) {
        if let Some(m) = cap.get(1) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }

    // stable: preserves order of items within one import list
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}
