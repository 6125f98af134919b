//! Tools the agent can call: local file access and web search.

use std::path::PathBuf;

use chat_agent_core::{ToolError, ToolRegistry};

pub mod fs;
pub mod web;

pub use fs::{FileSearchTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use web::{TAVILY_ENDPOINT, WebSearchTool};

/// Settings for the default tool set.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Directory relative paths are resolved against.
    pub root: PathBuf,
    /// Enables `web_search` when set.
    pub tavily_api_key: Option<String>,
    pub tavily_endpoint: String,
}

impl ToolsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tavily_api_key: None,
            tavily_endpoint: TAVILY_ENDPOINT.into(),
        }
    }
}

/// Build the registry with every available tool.
pub fn default_registry(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool::new(&config.root))?;
    registry.register(WriteFileTool::new(&config.root))?;
    registry.register(ListFilesTool::new(&config.root))?;
    registry.register(FileSearchTool::new(&config.root))?;

    if let Some(key) = &config.tavily_api_key {
        registry.register(WebSearchTool::new(key, &config.tavily_endpoint))?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let config = ToolsConfig::new(".");
        let registry = default_registry(&config).unwrap();
        assert_eq!(
            registry.names(),
            vec!["read_file", "write_file", "list_files", "file_search"]
        );

        let config = ToolsConfig {
            tavily_api_key: Some("tvly-test".into()),
            ..ToolsConfig::new(".")
        };
        let registry = default_registry(&config).unwrap();
        assert!(registry.resolve("web_search").is_ok());
    }
}
