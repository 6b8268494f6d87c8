use std::collections::BTreeMap;

use schemars::schema_for;
use serde::Serialize;
use serde_json::{json, Value};
use strum::VariantArray;
use tracing::{debug, error};

use crate::error::{ToolError, ToolResult};
use crate::tools::types::*;
use crate::tools::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Catalog of the available tools and their argument schemas.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
        };
        for name in ToolName::VARIANTS {
            registry.register_tool(*name);
        }
        registry
    }

    fn register_tool(&mut self, name: ToolName) {
        debug!(tool_name = %name, "Registering tool");
        self.tools.insert(
            name.as_str().to_string(),
            ToolDefinition {
                name: name.as_str().to_string(),
                description: name.description().to_string(),
                input_schema: input_schema(name),
            },
        );
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().cloned().collect()
    }

    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Turns a tool name and its raw JSON arguments into a typed call.
    pub fn parse_call(&self, name: &str, arguments: Value) -> ToolResult<ToolCall> {
        if !self.tools.contains_key(name) {
            error!(tool_name = %name, "Unknown tool");
            return Err(ToolError::InvalidInput(format!(
                "Unknown tool: {}. Available tools: {}",
                name,
                self.list_tools().join(", ")
            )));
        }

        serde_json::from_value(json!({ "tool": name, "arguments": arguments })).map_err(|e| {
            debug!(tool_name = %name, ?e, "Rejected tool arguments");
            ToolError::InvalidInput(format!("Invalid arguments for {name}: {e}"))
        })
    }
}

fn input_schema(name: ToolName) -> Value {
    let schema = match name {
        ToolName::RenameFile => schema_for!(RenameFileParams),
        ToolName::CopyFile => schema_for!(CopyFileParams),
        ToolName::DeleteFile => schema_for!(DeleteFileParams),
        ToolName::FileExists | ToolName::GetFileInfo => schema_for!(PathParams),
        ToolName::ReadFile => schema_for!(ReadFileParams),
        ToolName::WriteFile => schema_for!(WriteFileParams),
        ToolName::ListDirectory => schema_for!(ListDirectoryParams),
        ToolName::CreateDirectory => schema_for!(CreateDirectoryParams),
        ToolName::DeleteDirectory => schema_for!(DeleteDirectoryParams),
        ToolName::MoveDirectory => schema_for!(MoveDirectoryParams),
        ToolName::SearchFiles => schema_for!(SearchFilesParams),
        ToolName::SearchContent => schema_for!(SearchContentParams),
        ToolName::FindDuplicates => schema_for!(FindDuplicatesParams),
        ToolName::ListBackups => schema_for!(ListBackupsParams),
        ToolName::RestoreBackup => schema_for!(RestoreBackupParams),
    };
    serde_json::to_value(schema).unwrap_or(Value::Null)
}
