//! Block/unblock adapter for the external firewall command.
//!
//! The command prints a single JSON object on stdout
//! (`{"success": bool, "message"?: str, "rule_id"?: str}`) and exits non-zero
//! on failure. Every outcome, including spawn failures and timeouts, comes
//! back as a [`CommandResult`]; nothing here returns an error.

use crate::config::FirewallConfig;
use crate::types::ConnectionRecord;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

const SUPPORTED_PROTOCOLS: [&str; 3] = ["TCP", "UDP", "ICMP"];

/// Flow to block. Unset addresses mean "any", unset ports mean 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub source_ip: Option<String>,
    pub source_port: Option<u16>,
    pub dest_ip: Option<String>,
    pub dest_port: Option<u16>,
    pub protocol: String,
}

impl BlockRequest {
    pub fn from_record(record: &ConnectionRecord) -> Self {
        Self {
            source_ip: Some(record.src_addr.clone()),
            source_port: Some(record.src_port),
            dest_ip: Some(record.dst_addr.clone()),
            dest_port: Some(record.dst_port),
            protocol: record.protocol.as_str().to_string(),
        }
    }

    fn normalized_protocol(&self) -> Result<String, String> {
        let protocol = self.protocol.to_ascii_uppercase();
        if SUPPORTED_PROTOCOLS.contains(&protocol.as_str()) {
            Ok(protocol)
        } else {
            Err(format!(
                "Unsupported protocol: {}. Use TCP, UDP, or ICMP.",
                protocol
            ))
        }
    }

    fn command_args(&self, protocol: &str) -> Vec<String> {
        vec![
            "--source-ip".to_string(),
            self.source_ip.clone().unwrap_or_else(|| "any".to_string()),
            "--source-port".to_string(),
            self.source_port.unwrap_or(0).to_string(),
            "--dest-ip".to_string(),
            self.dest_ip.clone().unwrap_or_else(|| "any".to_string()),
            "--dest-port".to_string(),
            self.dest_port.unwrap_or(0).to_string(),
            "--protocol".to_string(),
            protocol.to_string(),
        ]
    }
}

/// Outcome of a block or unblock command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl CommandResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            rule_id: None,
        }
    }
}

/// A rule currently installed by the firewall command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub source_port: u16,
    #[serde(default)]
    pub dest_ip: String,
    #[serde(default)]
    pub dest_port: u16,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default, rename = "blockedConnections")]
    blocked: Vec<BlockedRule>,
}

/// Runs the configured firewall command once per request.
#[derive(Debug, Clone)]
pub struct CommandBlocker {
    config: FirewallConfig,
}

impl CommandBlocker {
    pub fn new(config: FirewallConfig) -> Self {
        Self { config }
    }

    pub async fn block(&self, request: &BlockRequest) -> CommandResult {
        let protocol = match request.normalized_protocol() {
            Ok(p) => p,
            Err(msg) => return CommandResult::failure(msg),
        };

        let result = match self.invoke(request.command_args(&protocol)).await {
            Ok(reply) => to_result(reply),
            Err(msg) => CommandResult::failure(msg),
        };

        if result.success {
            info!(
                "Blocked {} {}:{} -> {}:{} (rule {})",
                protocol,
                request.source_ip.as_deref().unwrap_or("any"),
                request.source_port.unwrap_or(0),
                request.dest_ip.as_deref().unwrap_or("any"),
                request.dest_port.unwrap_or(0),
                result.rule_id.as_deref().unwrap_or("?")
            );
        } else {
            warn!(
                "Block request failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }

    pub async fn unblock(&self, rule_id: &str) -> CommandResult {
        if rule_id.is_empty() {
            return CommandResult::failure("Rule ID is required");
        }

        let args = vec![
            "--unblock".to_string(),
            "--rule-id".to_string(),
            rule_id.to_string(),
        ];
        let result = match self.invoke(args).await {
            Ok(reply) => to_result(reply),
            Err(msg) => CommandResult::failure(msg),
        };

        if result.success {
            info!("Unblocked rule {}", rule_id);
        } else {
            warn!(
                "Unblock of rule {} failed: {}",
                rule_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        CommandResult {
            rule_id: Some(rule_id.to_string()),
            ..result
        }
    }

    /// Rules currently installed, or the command's error message.
    pub async fn list(&self) -> Result<Vec<BlockedRule>, String> {
        let reply = self.invoke(vec!["--list".to_string()]).await?;
        if reply.success {
            Ok(reply.blocked)
        } else {
            Err(reply
                .message
                .unwrap_or_else(|| "listing blocked connections failed".to_string()))
        }
    }

    async fn invoke(&self, extra: Vec<String>) -> Result<CommandReply, String> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .args(&extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(format!(
                    "failed to run firewall command `{}`: {}",
                    self.config.program, e
                ))
            }
            Err(_) => {
                return Err(format!(
                    "firewall command timed out after {:?}",
                    self.config.timeout
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply_line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.starts_with('{'));

        match reply_line.map(serde_json::from_str::<CommandReply>) {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(format!("unreadable firewall reply: {}", e)),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(format!(
                    "firewall command produced no reply ({}): {}",
                    output.status,
                    stderr.trim()
                ))
            }
        }
    }
}

fn to_result(reply: CommandReply) -> CommandResult {
    if reply.success {
        CommandResult {
            success: true,
            error: None,
            rule_id: reply.rule_id,
        }
    } else {
        CommandResult {
            success: false,
            error: Some(
                reply
                    .message
                    .unwrap_or_else(|| "firewall command failed".to_string()),
            ),
            rule_id: reply.rule_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(protocol: &str) -> BlockRequest {
        BlockRequest {
            source_ip: Some("10.0.0.1".into()),
            source_port: Some(5000),
            dest_ip: None,
            dest_port: None,
            protocol: protocol.into(),
        }
    }

    fn script_blocker(script: &str) -> CommandBlocker {
        CommandBlocker::new(FirewallConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "firewall".into()],
            timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_unsupported_protocol_is_rejected_before_invoking() {
        let blocker = CommandBlocker::new(FirewallConfig {
            program: "/nonexistent/firewall".into(),
            ..FirewallConfig::default()
        });
        let result = blocker.block(&request("gre")).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Unsupported protocol: GRE. Use TCP, UDP, or ICMP.")
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failed_result() {
        let blocker = CommandBlocker::new(FirewallConfig {
            program: "/nonexistent/firewall".into(),
            args: vec![],
            timeout: Duration::from_secs(1),
        });
        let result = blocker.block(&request("tcp")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("/nonexistent/firewall"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_block_passes_defaults_for_missing_fields() {
        let blocker = script_blocker(r#"echo "{\"success\": true, \"rule_id\": \"$*\"}""#);
        let result = blocker.block(&request("udp")).await;
        assert!(result.success);
        assert_eq!(
            result.rule_id.as_deref(),
            Some("--source-ip 10.0.0.1 --source-port 5000 --dest-ip any --dest-port 0 --protocol UDP")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_reply_with_nonzero_exit() {
        let blocker =
            script_blocker(r#"echo '{"success": false, "message": "Rule ID not found"}'; exit 1"#);
        let result = blocker.unblock("r-404").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Rule ID not found"));
        assert_eq!(result.rule_id.as_deref(), Some("r-404"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_blocked_rules() {
        let blocker = script_blocker(
            r#"echo '{"success": true, "blockedConnections": [{"id": "r-1", "name": "NetworkMonitor_Block_r-1", "source_ip": "10.0.0.1", "source_port": 0, "dest_ip": "any", "dest_port": 0, "protocol": "TCP", "created_at": "2024-03-01 10:00:00"}]}'"#,
        );
        let rules = blocker.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "r-1");
        assert_eq!(rules[0].protocol, "TCP");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let blocker = CommandBlocker::new(FirewallConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 5".into(), "firewall".into()],
            timeout: Duration::from_millis(200),
        });
        let result = blocker.unblock("r-1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
