//! Filesystem tools.
//!
//! Relative paths are resolved against the tool's root directory. Missing
//! files are reported as plain results; other I/O failures become
//! [`ToolError::Execution`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use chat_agent_core::tool::parse_arguments;
use chat_agent_core::{Tool, ToolError};

/// Files larger than this are cut off before being handed to the model.
const MAX_READ_BYTES: usize = 200_000;

fn resolve(root: &Path, path: &str) -> PathBuf {
    root.join(path)
}

/// Largest cut point `<= limit` that does not split a UTF-8 sequence.
fn char_boundary(bytes: &[u8], limit: usize) -> usize {
    if bytes.len() <= limit {
        return bytes.len();
    }
    let mut end = limit;
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    end
}

/// Read a file's contents.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileArgs {
    file_path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string", "description": "The path to the file to read"}
            },
            "required": ["filePath"],
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: ReadFileArgs = parse_arguments(self.name(), arguments)?;
        let full_path = resolve(&self.root, &args.file_path);
        debug!(path = %full_path.display(), "Reading file");

        let bytes = match tokio::fs::read(&full_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(format!("File not found: {}", args.file_path));
            }
            Err(e) => return Err(ToolError::Execution(format!("Error reading file: {e}"))),
        };

        let total = bytes.len();
        let end = char_boundary(&bytes, MAX_READ_BYTES);
        let mut content = String::from_utf8_lossy(&bytes[..end]).into_owned();
        if total > MAX_READ_BYTES {
            content.push_str(&format!("\n... (truncated, {total} bytes total)"));
        }

        Ok(format!("Contents of {}:\n{content}", args.file_path))
    }
}

/// Write content to a file, replacing what was there.
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string", "description": "The path to the file to write"},
                "content": {"type": "string", "description": "The content to write to the file"}
            },
            "required": ["filePath", "content"],
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: WriteFileArgs = parse_arguments(self.name(), arguments)?;
        let full_path = resolve(&self.root, &args.file_path);
        info!(path = %full_path.display(), bytes = args.content.len(), "Writing file");

        tokio::fs::write(&full_path, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::Execution(format!("Error writing to file: {e}")))?;

        Ok(format!("Successfully wrote to file: {}", args.file_path))
    }
}

/// One directory entry as shown to the model.
struct Entry {
    name: String,
    is_dir: bool,
    path: PathBuf,
}

impl Entry {
    fn describe(&self) -> String {
        let kind = if self.is_dir { "directory" } else { "file" };
        format!("{kind}: {} ({})", self.name, self.path.display())
    }
}

/// Entries of `dir`, sorted by name.
async fn read_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            path: dir.join(entry.file_name()),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn format_entries(entries: &[Entry]) -> String {
    entries
        .iter()
        .map(Entry::describe)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Directory to operate on: the argument if given, else the root.
fn target_dir(root: &Path, directory: Option<&str>) -> PathBuf {
    match directory {
        Some(dir) if !dir.trim().is_empty() => resolve(root, dir),
        _ => root.to_path_buf(),
    }
}

/// List the entries of a directory.
pub struct ListFilesTool {
    root: PathBuf,
}

impl ListFilesTool {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
struct ListFilesArgs {
    directory: Option<String>,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List all files and directories in a specified directory"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "The directory to list (defaults to current working directory)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: ListFilesArgs = parse_arguments(self.name(), arguments)?;
        let dir = target_dir(&self.root, args.directory.as_deref());
        debug!(dir = %dir.display(), "Listing directory");

        let entries = read_entries(&dir)
            .await
            .map_err(|e| ToolError::Execution(format!("Error listing files: {e}")))?;

        Ok(format!(
            "Found {} files/directories in {}:\n{}",
            entries.len(),
            dir.display(),
            format_entries(&entries)
        ))
    }
}

/// Find directory entries whose name contains a query string.
pub struct FileSearchTool {
    root: PathBuf,
}

impl FileSearchTool {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
struct FileSearchArgs {
    query: String,
    directory: Option<String>,
}

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Search for files and directories by name in a specified directory"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query for file/directory names"},
                "directory": {
                    "type": "string",
                    "description": "The directory to search in (defaults to current working directory)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: FileSearchArgs = parse_arguments(self.name(), arguments)?;
        let dir = target_dir(&self.root, args.directory.as_deref());
        debug!(dir = %dir.display(), query = %args.query, "Searching directory");

        let needle = args.query.to_lowercase();
        let matches: Vec<Entry> = read_entries(&dir)
            .await
            .map_err(|e| ToolError::Execution(format!("Error searching directory: {e}")))?
            .into_iter()
            .filter(|entry| entry.name.to_lowercase().contains(&needle))
            .collect();

        Ok(format!(
            "Found {} files/directories matching \"{}\" in {}:\n{}",
            matches.len(),
            args.query,
            dir.display(),
            format_entries(&matches)
        ))
    }
}
