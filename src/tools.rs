//! MCP Tool Registry
//!
//! Defines the built-in tools and dispatches calls. Built-ins cover the
//! admission pipeline; every other name resolves to a live capability.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::skills::{
    AdmissionController, ApprovalMachine, ApprovalSession, CapabilityRegistry, CapabilitySubmission,
    Scenario,
};

pub const CREATE_TOOL: &str = "create_tool";
pub const ASK_REVIEWER: &str = "ask_reviewer";
pub const LIST_CAPABILITIES: &str = "list_capabilities";

/// Names served by the host; runtime capabilities may not shadow them
pub const BUILTIN_TOOL_NAMES: [&str; 3] = [CREATE_TOOL, ASK_REVIEWER, LIST_CAPABILITIES];

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Result of a tool call
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    /// A capability was registered by this call
    pub list_changed: bool,
}

impl ToolOutput {
    fn text(text: String) -> Self {
        Self {
            text,
            list_changed: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewArgs {
    scenario: String,
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Tool registry wired to the admission pipeline
pub struct ToolRegistry {
    admission: Arc<AdmissionController>,
    capabilities: Arc<CapabilityRegistry>,
    approval: Option<ApprovalMachine>,
}

impl ToolRegistry {
    pub fn new(
        admission: Arc<AdmissionController>,
        capabilities: Arc<CapabilityRegistry>,
        approval: Option<ApprovalMachine>,
    ) -> Self {
        Self {
            admission,
            capabilities,
            approval,
        }
    }

    /// Built-in tools followed by a snapshot of the callable capabilities.
    /// Shadowed registrations and names taken by a built-in are not advertised.
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        let mut tools = builtin_definitions();
        let callable = self.capabilities.list_latest();
        tools.extend(
            callable
                .iter()
                .filter(|cap| !BUILTIN_TOOL_NAMES.contains(&cap.name.as_str()))
                .map(|cap| ToolDefinition {
                    name: cap.name.clone(),
                    description: cap.description.clone(),
                    input_schema: cap.input_schema.clone(),
                }),
        );
        tools
    }

    /// Execute a tool by name
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        match name {
            CREATE_TOOL => self.create_tool(arguments).await,
            ASK_REVIEWER => self.ask_reviewer(arguments, cancel).await,
            LIST_CAPABILITIES => Ok(ToolOutput::text(self.list_capabilities()?)),
            _ => {
                let capability = self
                    .capabilities
                    .lookup(name)
                    .with_context(|| format!("Unknown tool: {}", name))?;
                info!("Invoking capability '{}'", name);
                Ok(ToolOutput::text(capability.invoke(arguments).await?))
            }
        }
    }

    async fn create_tool(&self, arguments: serde_json::Value) -> Result<ToolOutput> {
        let submission: CapabilitySubmission =
            serde_json::from_value(arguments).context("Invalid create_tool arguments")?;

        let outcome = self
            .admission
            .submit(&submission)
            .await
            .context("create_tool failed")?;

        Ok(ToolOutput {
            text: serde_json::to_string_pretty(&outcome.to_payload())?,
            list_changed: outcome.is_registered(),
        })
    }

    async fn ask_reviewer(
        &self,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        let machine = self
            .approval
            .as_ref()
            .context("No reviewer is attached to this server")?;

        let args: ReviewArgs =
            serde_json::from_value(arguments).context("Invalid ask_reviewer arguments")?;
        let scenario: Scenario = args.scenario.parse().map_err(anyhow::Error::msg)?;

        let mut session = ApprovalSession::new(scenario, &args.message);
        if let Some(ref code) = args.code {
            session = session.with_code(code);
        }

        let answer = machine.run_turn(&mut session, cancel).await?;
        Ok(ToolOutput::text(answer))
    }

    fn list_capabilities(&self) -> Result<String> {
        let entries: Vec<_> = self
            .capabilities
            .list_latest()
            .iter()
            .map(|cap| json!({"name": cap.name, "description": cap.description}))
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}

fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CREATE_TOOL.to_string(),
            description: "Create a new tool from source code. The code must contain a \
                          documentation block and must not import denied modules. In \
                          interactive mode a reviewer must approve it first."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Tool name"
                    },
                    "description": {
                        "type": "string",
                        "description": "What the tool does"
                    },
                    "sourceCode": {
                        "type": "string",
                        "description": "Tool source code"
                    },
                    "inputSchema": {
                        "type": "object",
                        "description": "JSON Schema for the tool's arguments"
                    },
                    "approved": {
                        "type": "boolean",
                        "description": "Reviewer decision from a previous ask_reviewer call"
                    }
                },
                "required": ["name", "description", "sourceCode"]
            }),
        },
        ToolDefinition {
            name: ASK_REVIEWER.to_string(),
            description: "Ask the human reviewer one question. Scenario 'approval' returns YES \
                          or NO; 'refinement' returns free-form modification instructions."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "scenario": {
                        "type": "string",
                        "enum": ["refinement", "approval"]
                    },
                    "message": {
                        "type": "string",
                        "description": "Prompt shown to the reviewer"
                    },
                    "code": {
                        "type": "string",
                        "description": "Code under review"
                    }
                },
                "required": ["scenario", "message"]
            }),
        },
        ToolDefinition {
            name: LIST_CAPABILITIES.to_string(),
            description: "List capabilities created at runtime".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{PolicyValidator, PreviewExecutor, RecordStore};
    use tempfile::TempDir;

    fn registry(dir: &TempDir, interactive: bool) -> ToolRegistry {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let store = Arc::new(RecordStore::new(dir.path().join("library.json")));
        let admission = Arc::new(
            AdmissionController::new(
                PolicyValidator::default(),
                Arc::new(PreviewExecutor::default()),
                capabilities.clone(),
                store,
                interactive,
            )
            .with_reserved_names(BUILTIN_TOOL_NAMES),
        );
        ToolRegistry::new(admission, capabilities, None)
    }

    fn advertised(tools: &ToolRegistry) -> Vec<(String, String)> {
        tools
            .list_definitions()
            .into_iter()
            .map(|t| (t.name, t.description))
            .collect()
    }

    #[tokio::test]
    async fn test_list_advertises_only_callable_tools() {
        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, false);
        let cancel = CancellationToken::new();
        let source = "\"\"\"greets\"\"\"\ndef greet(): return 'hi'";

        for (name, description) in [("Greeter", "v1"), ("Greeter", "v2"), ("create_tool", "evil")] {
            tools
                .call(
                    CREATE_TOOL,
                    json!({"name": name, "description": description, "sourceCode": source}),
                    &cancel,
                )
                .await
                .unwrap();
        }

        let listed = advertised(&tools);
        let greeters: Vec<_> = listed.iter().filter(|(n, _)| n == "Greeter").collect();
        assert_eq!(greeters, vec![&("Greeter".to_string(), "v2".to_string())]);
        assert_eq!(listed.iter().filter(|(n, _)| n == CREATE_TOOL).count(), 1);
        assert!(!listed.iter().any(|(_, d)| d == "evil"));
        assert_eq!(listed.len(), BUILTIN_TOOL_NAMES.len() + 1);
    }

    #[tokio::test]
    async fn test_shadowing_builtin_is_never_advertised() {
        use crate::skills::types::empty_object_schema;
        use crate::skills::Executor;

        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, false);
        // Registered directly, as a record restored from an older library would be
        let restored = PreviewExecutor::default()
            .compile(CREATE_TOOL, "restored", empty_object_schema(), "\"\"\"x\"\"\"")
            .await
            .unwrap();
        tools.capabilities.register(restored);

        assert!(!advertised(&tools).iter().any(|(_, d)| d == "restored"));
    }

    #[tokio::test]
    async fn test_create_then_call() {
        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, false);
        let cancel = CancellationToken::new();

        let out = tools
            .call(
                CREATE_TOOL,
                json!({
                    "name": "Greeter",
                    "description": "says hi",
                    "sourceCode": "\"\"\"says hi\"\"\"\ndef greet(): return 'hi'"
                }),
                &cancel,
            )
            .await
            .unwrap();
        assert!(out.list_changed);
        let payload: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(payload["tool_name"], "Greeter");

        assert!(tools.list_definitions().iter().any(|t| t.name == "Greeter"));

        let out = tools.call("Greeter", json!({}), &cancel).await.unwrap();
        assert!(out.text.starts_with("Executing library snippet:"));
    }

    #[tokio::test]
    async fn test_rejection_is_structured() {
        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, false);

        let out = tools
            .call(
                CREATE_TOOL,
                json!({"name": "x", "description": "y", "sourceCode": "import os"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!out.list_changed);
        let payload: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(payload["status"], "rejected");
        assert_eq!(payload["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, false);
        let err = tools.call("nope", json!({}), &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_ask_reviewer_without_reviewer() {
        let dir = TempDir::new().unwrap();
        let tools = registry(&dir, true);
        let result = tools
            .call(
                ASK_REVIEWER,
                json!({"scenario": "approval", "message": "ok?"}),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_definitions() {
        let names: Vec<_> = builtin_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![CREATE_TOOL, ASK_REVIEWER, LIST_CAPABILITIES]);
    }
}
