//! Scanners backed by external commands
//!
//! The command runs under `sh -c` with the artifact bytes on stdin and must
//! print a JSON array of findings on stdout:
//!
//! ```json
//! [{"severity": "high", "category": "secrets", "description": "AWS key in config.yml"}]
//! ```
//!
//! Empty output means no findings. The child is killed if the scan is
//! abandoned (timeout or cancellation).

use super::record::{ScanFinding, Severity};
use super::scanner::{ScanError, Scanner};
use crate::config::CommandScannerConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Finding as printed by an external scanner
#[derive(Debug, Deserialize)]
struct ReportedFinding {
    severity: Severity,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    description: String,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

#[derive(Debug, Clone)]
pub struct CommandScanner {
    name: String,
    version: String,
    command: String,
    timeout: Option<Duration>,
}

impl CommandScanner {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "unversioned".to_string(),
            command: command.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &CommandScannerConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            command: config.command.clone(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn parse_output(&self, stdout: &[u8]) -> Result<Vec<ScanFinding>, ScanError> {
        let text = String::from_utf8_lossy(stdout);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let reported: Vec<ReportedFinding> = serde_json::from_str(trimmed)
            .map_err(|e| ScanError::InvalidOutput(e.to_string()))?;

        Ok(reported
            .into_iter()
            .map(|f| ScanFinding::new(self.name.clone(), f.severity, f.category, f.description))
            .collect())
    }
}

#[async_trait]
impl Scanner for CommandScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn scan(&self, bytes: &[u8]) -> Result<Vec<ScanFinding>, ScanError> {
        debug!("Running scanner '{}': {}", self.name, self.command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::Failed(format!("failed to spawn '{}': {e}", self.command)))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The scanner may exit without reading all of its input
                let _ = stdin.write_all(bytes).await;
                let _ = stdin.shutdown().await;
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|e| ScanError::Failed(format!("failed to wait for scanner: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            debug!("Scanner '{}' failed with exit code {}", self.name, code);
            return Err(ScanError::Exited { code, stderr });
        }

        let findings = self.parse_output(&output.stdout)?;
        debug!("Scanner '{}' reported {} finding(s)", self.name, findings.len());
        Ok(findings)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_findings_are_parsed_and_stamped() {
        let scanner = CommandScanner::new(
            "grep-evil",
            r#"if grep -q EVIL; then echo '[{"severity":"critical","category":"malware","description":"marker found"}]'; fi"#,
        );

        let findings = scanner.scan(b"some EVIL payload").await.unwrap();
        assert_eq!(
            findings,
            vec![ScanFinding::new("grep-evil", Severity::Critical, "malware", "marker found")]
        );

        let clean = scanner.scan(b"harmless").await.unwrap();
        assert!(clean.is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let scanner = CommandScanner::new("broken", "echo oops >&2; exit 3");
        let err = scanner.scan(b"").await.unwrap_err();
        assert_eq!(
            err,
            ScanError::Exited {
                code: 3,
                stderr: "oops".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unparseable_output_is_an_error() {
        let scanner = CommandScanner::new("chatty", "cat >/dev/null; echo 'all good'");
        let err = scanner.scan(b"bytes").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidOutput(_)));
    }

    #[test]
    fn test_from_config() {
        let config = CommandScannerConfig {
            name: "secrets".to_string(),
            command: "./secrets.sh".to_string(),
            version: "2.1.0".to_string(),
            timeout_seconds: Some(5),
        };
        let scanner = CommandScanner::from_config(&config);
        assert_eq!(scanner.name(), "secrets");
        assert_eq!(scanner.version(), "2.1.0");
        assert_eq!(scanner.timeout(), Some(Duration::from_secs(5)));
    }
}
