//! Capability Type Definitions
//!
//! Core data structures for the admission pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Durable record of an accepted capability.
///
/// Field names on disk are exactly
/// `{name, description, sourceCode, createdAt, version, usageCount}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    pub name: String,
    pub description: String,
    pub source_code: String,
    pub created_at: DateTime<Utc>,
    /// Starts at 1; reserved for future edits
    pub version: u32,
    pub usage_count: u64,
}

impl CapabilityRecord {
    /// Create a fresh record for a newly accepted capability
    pub fn new(name: &str, description: &str, source_code: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            source_code: source_code.to_string(),
            created_at: Utc::now(),
            version: 1,
            usage_count: 0,
        }
    }
}

/// Input to admission.
///
/// `approved` carries a prior reviewer decision across calls: absent means
/// nobody has been asked yet, `false` means the reviewer declined and the
/// code should be refined, `true` means the reviewer accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySubmission {
    pub name: String,
    pub description: String,
    pub source_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

impl CapabilitySubmission {
    pub fn new(name: &str, description: &str, source_code: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            source_code: source_code.to_string(),
            input_schema: None,
            approved: None,
        }
    }

    /// Attach an input schema
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Carry a reviewer decision forward
    pub fn with_approval(mut self, approved: bool) -> Self {
        self.approved = Some(approved);
        self
    }

    /// Schema to expose for the capability, defaulting to an empty object
    pub fn schema_or_default(&self) -> serde_json::Value {
        self.input_schema.clone().unwrap_or_else(empty_object_schema)
    }

    pub fn is_approved(&self) -> bool {
        self.approved == Some(true)
    }
}

/// JSON Schema accepting an object with no declared properties
pub fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
    })
}

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub approved: bool,
    /// Violations in the order they were found
    pub errors: Vec<String>,
}

impl PolicyVerdict {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            approved: errors.is_empty(),
            errors,
        }
    }
}

/// Callable half of a live capability, bound to an executor
#[async_trait]
pub trait CapabilityHandle: Send + Sync {
    /// Run the capability with JSON arguments and return its text output
    async fn invoke(&self, args: serde_json::Value) -> anyhow::Result<String>;
}

/// A live, invocable capability
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    handle: Arc<dyn CapabilityHandle>,
}

impl Capability {
    pub fn new(
        name: &str,
        description: &str,
        input_schema: serde_json::Value,
        handle: Arc<dyn CapabilityHandle>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            handle,
        }
    }

    pub async fn invoke(&self, args: serde_json::Value) -> anyhow::Result<String> {
        self.handle.invoke(args).await
    }

    /// Tool definition as advertised to MCP clients
    pub fn to_definition(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Which human interaction a turn performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Free-form modification instructions
    Refinement,
    /// YES/NO decision
    Approval,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refinement => "refinement",
            Self::Approval => "approval",
        }
    }

    /// Header shown to the reviewer
    pub fn label(&self) -> &'static str {
        match self {
            Self::Refinement => "REFINEMENT",
            Self::Approval => "APPROVAL",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "refinement" => Ok(Self::Refinement),
            "approval" => Ok(Self::Approval),
            other => Err(format!("Unknown scenario: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_exact_fields() {
        let record = CapabilityRecord::new("Greeter", "says hi", "\"\"\"hi\"\"\"");
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["createdAt", "description", "name", "sourceCode", "usageCount", "version"]
        );
        assert_eq!(value["version"], 1);
        assert_eq!(value["usageCount"], 0);
    }

    #[test]
    fn test_submission_from_camel_case_json() {
        let sub: CapabilitySubmission = serde_json::from_value(serde_json::json!({
            "name": "adder",
            "description": "adds numbers",
            "sourceCode": "\"\"\"doc\"\"\"",
            "approved": true,
        }))
        .unwrap();

        assert!(sub.is_approved());
        assert!(sub.input_schema.is_none());
        assert_eq!(sub.schema_or_default()["type"], "object");
    }

    #[test]
    fn test_scenario_parse() {
        assert_eq!("Approval".parse::<Scenario>().unwrap(), Scenario::Approval);
        assert_eq!(" refinement ".parse::<Scenario>().unwrap(), Scenario::Refinement);
        assert!("review".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_verdict_from_errors() {
        assert!(PolicyVerdict::from_errors(vec![]).approved);
        assert!(!PolicyVerdict::from_errors(vec!["x".into()]).approved);
    }
}
