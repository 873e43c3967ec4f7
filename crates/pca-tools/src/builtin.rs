//! Built-in tools
//!
//! Diagnostics (`sys.*`, `net.*`) and file tools (`fs.*`). Everything is
//! read-only except `fs.delete_file`, which honours `dry_run`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use pca_core::{Arguments, ParamSpec, ToolDescriptor, ToolError, ToolOutput, ToolRisk};

use crate::registry::Tool;

const LIST_LIMIT: usize = 50;
const FIND_LIMIT: usize = 100;
const FIND_MAX_DEPTH: usize = 4;

/// Every built-in tool
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SystemInfo),
        Arc::new(NetworkConfig),
        Arc::new(CheckConnection),
        Arc::new(ListDir),
        Arc::new(FindOldFiles),
        Arc::new(DeleteFile),
    ]
}

/// Expand a leading `~` to the home directory
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME") {
            let rest = rest.trim_start_matches(['/', '\\']);
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

fn str_arg<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn u64_arg(args: &Arguments, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

fn bool_arg(args: &Arguments, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn blocking<F>(tool: &str, f: F) -> Result<ToolOutput, ToolError>
where
    F: FnOnce() -> ToolOutput + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Execution {
            tool: tool.to_string(),
            message: e.to_string(),
        })
}

// ============================================================================
// sys.get_info
// ============================================================================

pub struct SystemInfo;

#[async_trait]
impl Tool for SystemInfo {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("sys.get_info", ToolRisk::Safe)
            .describe("Get operating system, architecture, hostname and CPU count")
            .aliases(&["system info", "computer specs", "os version", "hardware", "system"])
    }

    async fn call(&self, _arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let uptime_secs = std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|s| s.split_whitespace().next().map(str::to_string))
            .and_then(|s| s.parse::<f64>().ok())
            .map(|s| s as u64);
        Ok(ToolOutput::success(json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "hostname": hostname(),
            "cpu_count": num_cpus::get(),
            "uptime_secs": uptime_secs,
        })))
    }
}

// ============================================================================
// net.get_config
// ============================================================================

pub struct NetworkConfig;

#[async_trait]
impl Tool for NetworkConfig {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("net.get_config", ToolRisk::Safe)
            .describe("Get the hostname and local IP address of this machine")
            .aliases(&["ip", "ip address", "my ip", "network config", "hostname", "network"])
    }

    async fn call(&self, _arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        blocking("net.get_config", || {
            // Connecting a UDP socket picks the outbound interface without sending anything
            let local_ip = UdpSocket::bind("0.0.0.0:0")
                .and_then(|socket| {
                    socket.connect("8.8.8.8:80")?;
                    socket.local_addr()
                })
                .map(|addr| addr.ip().to_string());
            match local_ip {
                Ok(ip) => ToolOutput::success(json!({
                    "hostname": hostname(),
                    "local_ip": ip,
                })),
                Err(e) => ToolOutput::failed(format!("could not determine local address: {}", e)),
            }
        })
        .await
    }
}

// ============================================================================
// net.check_connection
// ============================================================================

pub struct CheckConnection;

#[async_trait]
impl Tool for CheckConnection {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("net.check_connection", ToolRisk::Safe)
            .describe("Check whether the internet is reachable by opening a TCP connection")
            .param(ParamSpec::optional("host", "string").describe("defaults to 8.8.8.8"))
            .param(ParamSpec::optional("port", "integer").describe("defaults to 53"))
            .param(ParamSpec::optional("timeout_ms", "integer").describe("defaults to 3000"))
            .aliases(&["internet", "connection", "online", "connectivity", "ping"])
    }

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let host = str_arg(arguments, "host").unwrap_or("8.8.8.8").to_string();
        let port = u64_arg(arguments, "port").unwrap_or(53);
        let timeout = Duration::from_millis(u64_arg(arguments, "timeout_ms").unwrap_or(3000));

        let start = Instant::now();
        let connected = matches!(
            tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host.as_str(), port as u16))).await,
            Ok(Ok(_))
        );
        let latency_ms = connected.then(|| start.elapsed().as_millis() as u64);

        Ok(ToolOutput::success(json!({
            "connected": connected,
            "host": host,
            "port": port,
            "latency_ms": latency_ms,
        })))
    }
}

// ============================================================================
// fs.list_dir
// ============================================================================

pub struct ListDir;

#[async_trait]
impl Tool for ListDir {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("fs.list_dir", ToolRisk::Safe)
            .describe("List files and folders in a directory")
            .param(ParamSpec::required("path", "string"))
            .aliases(&["list files", "directory", "folder contents", "ls"])
    }

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let raw = str_arg(arguments, "path").unwrap_or(".").to_string();
        let path = expand_path(&raw);
        if !path.is_dir() {
            return Ok(ToolOutput::failed(format!("'{}' is not a directory", raw)));
        }

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutput::failed(format!("cannot read '{}': {}", raw, e))),
        };

        let mut items = Vec::new();
        let mut total = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            total += 1;
            if items.len() >= LIST_LIMIT {
                continue;
            }
            let metadata = entry.metadata().await.ok();
            let is_dir = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            items.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": is_dir,
                "size": metadata.filter(|m| m.is_file()).map(|m| m.len()).unwrap_or(0),
            }));
        }
        items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(ToolOutput::success(json!({
            "path": path.display().to_string(),
            "total_items": total,
            "items": items,
        })))
    }
}

// ============================================================================
// fs.find_old_files
// ============================================================================

fn collect_old_files(root: &Path, cutoff: SystemTime, depth: usize, out: &mut Vec<String>) {
    if depth > FIND_MAX_DEPTH || out.len() >= FIND_LIMIT {
        return;
    }
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if out.len() >= FIND_LIMIT {
            return;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            collect_old_files(&entry.path(), cutoff, depth + 1, out);
        } else if metadata.is_file() {
            if let Ok(modified) = metadata.modified() {
                if modified < cutoff {
                    out.push(entry.path().display().to_string());
                }
            }
        }
    }
}

pub struct FindOldFiles;

#[async_trait]
impl Tool for FindOldFiles {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("fs.find_old_files", ToolRisk::Safe)
            .describe("Find files under a directory not modified for a number of days")
            .param(ParamSpec::required("path", "string"))
            .param(ParamSpec::optional("days", "integer").describe("defaults to 365"))
            .aliases(&["old files", "stale files", "older than", "find"])
    }

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let raw = str_arg(arguments, "path").unwrap_or(".").to_string();
        let days = u64_arg(arguments, "days").unwrap_or(365);
        let root = expand_path(&raw);
        if !root.is_dir() {
            return Ok(ToolOutput::failed(format!("'{}' is not a directory", raw)));
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        blocking("fs.find_old_files", move || {
            let mut files = Vec::new();
            collect_old_files(&root, cutoff, 0, &mut files);
            files.sort();
            ToolOutput::success(json!({
                "path": root.display().to_string(),
                "days": days,
                "count": files.len(),
                "files": files,
            }))
        })
        .await
    }
}

// ============================================================================
// fs.delete_file
// ============================================================================

fn target_paths(arguments: &Arguments) -> Vec<String> {
    match arguments.get("paths") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

pub struct DeleteFile;

#[async_trait]
impl Tool for DeleteFile {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("fs.delete_file", ToolRisk::High)
            .describe("Delete one or more files; with dry_run only reports what would go")
            .confirms_action()
            .param(ParamSpec::required("paths", "array").describe("file paths to delete"))
            .param(ParamSpec::optional("dry_run", "boolean"))
            .aliases(&["delete", "remove", "erase files"])
    }

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let paths = target_paths(arguments);
        let dry_run = bool_arg(arguments, "dry_run");

        if dry_run {
            let existing: Vec<&String> = paths.iter().filter(|p| expand_path(p).is_file()).collect();
            return Ok(ToolOutput::success(json!({
                "dry_run": true,
                "would_delete": existing.len(),
                "files": existing,
            })));
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for path in &paths {
            match tokio::fs::remove_file(expand_path(path)).await {
                Ok(()) => deleted.push(path.clone()),
                Err(e) => failed.push(json!({ "path": path, "error": e.to_string() })),
            }
        }

        if deleted.is_empty() && !failed.is_empty() {
            return Ok(ToolOutput::failed(format!(
                "{} file(s) could not be deleted (in use or permission denied)",
                failed.len()
            )));
        }

        Ok(ToolOutput::success(json!({
            "dry_run": false,
            "deleted": deleted.len(),
            "failed": failed,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pca_core::ToolStatus;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_system_info() {
        let output = SystemInfo.call(&Arguments::new()).await.unwrap();
        let data = output.output.unwrap();
        assert_eq!(data["os"], std::env::consts::OS);
        assert!(data["cpu_count"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_list_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let output = ListDir
            .call(&args(json!({ "path": dir.path().to_str().unwrap() })))
            .await
            .unwrap();
        let data = output.output.unwrap();
        assert_eq!(data["total_items"], 2);
        assert_eq!(data["items"][0]["name"], "a.txt");
    }

    #[tokio::test]
    async fn test_list_missing_dir_fails() {
        let output = ListDir
            .call(&args(json!({ "path": "/definitely/not/here" })))
            .await
            .unwrap();
        assert_eq!(output.status, ToolStatus::Failed);
    }

    #[tokio::test]
    async fn test_find_old_files_with_zero_days_finds_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.log"), "x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let output = FindOldFiles
            .call(&args(json!({ "path": dir.path().to_str().unwrap(), "days": 0 })))
            .await
            .unwrap();
        assert_eq!(output.output.unwrap()["count"], 1);
    }

    #[tokio::test]
    async fn test_delete_dry_run_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("victim.txt");
        std::fs::write(&file, "x").unwrap();
        let output = DeleteFile
            .call(&args(json!({ "paths": [file.to_str().unwrap()], "dry_run": true })))
            .await
            .unwrap();
        assert_eq!(output.output.unwrap()["would_delete"], 1);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_delete_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("victim.txt");
        std::fs::write(&file, "x").unwrap();
        let output = DeleteFile
            .call(&args(json!({ "paths": [file.to_str().unwrap()] })))
            .await
            .unwrap();
        assert_eq!(output.status, ToolStatus::Success);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_nothing_deletable_fails() {
        let output = DeleteFile
            .call(&args(json!({ "paths": ["/definitely/not/here.txt"] })))
            .await
            .unwrap();
        assert_eq!(output.status, ToolStatus::Failed);
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_path("~/x"), PathBuf::from(home).join("x"));
        }
        assert_eq!(expand_path("/tmp"), PathBuf::from("/tmp"));
    }
}
