//! Safety gate: static screening of command strings before execution.
//!
//! The gate runs before any shell command, including recovery fixes,
//! operator substitutes and custom cleanup commands. Screening is purely
//! lexical; OS-level isolation is the runner's job.

use crate::config::SafetyMode;
use crate::error::{ErrorKind, ExecutionError};

/// Substrings rejected under `Basic` and stronger modes.
const BASIC_DENYLIST: &[&str] = &["rm -rf /", "dd if=", "mkfs", "fdisk", "format"];

/// Additional substrings rejected under `Restrictive` and stronger modes.
const RESTRICTIVE_DENYLIST: &[&str] = &["sudo", "su ", "chmod 777", "chown root"];

/// First tokens permitted under `Paranoid` when no allowlist is
/// configured.
const DEFAULT_ALLOWLIST: &[&str] = &["echo", "ls", "cat", "grep", "mkdir", "touch", "cp", "mv"];

/// Screens command strings against a [`SafetyMode`].
#[derive(Debug, Clone)]
pub struct SafetyGate {
    mode: SafetyMode,
}

impl SafetyGate {
    /// Create a gate for the given mode.
    pub fn new(mode: SafetyMode) -> Self {
        Self { mode }
    }

    /// The active mode.
    pub fn mode(&self) -> &SafetyMode {
        &self.mode
    }

    /// Screen a command string. A rejection is a `permission` error with
    /// `recoverable = false`; no subprocess is spawned for rejected
    /// commands.
    pub fn screen(&self, command: &str) -> Result<(), ExecutionError> {
        match &self.mode {
            SafetyMode::None => Ok(()),
            SafetyMode::Basic => deny_substrings(command, BASIC_DENYLIST),
            SafetyMode::Restrictive => {
                deny_substrings(command, BASIC_DENYLIST)?;
                deny_substrings(command, RESTRICTIVE_DENYLIST)
            }
            SafetyMode::Paranoid { allowlist } => {
                let first_token = command.split_whitespace().next().unwrap_or("");
                let allowed = if allowlist.is_empty() {
                    DEFAULT_ALLOWLIST.iter().any(|t| *t == first_token)
                } else {
                    allowlist.iter().any(|t| t == first_token)
                };
                if allowed {
                    Ok(())
                } else {
                    Err(rejection(command, format!("leading token {first_token:?} is not allowlisted")))
                }
            }
        }
    }
}

fn deny_substrings(command: &str, denylist: &[&str]) -> Result<(), ExecutionError> {
    let lowered = command.to_lowercase();
    for pattern in denylist {
        if lowered.contains(&pattern.to_lowercase()) {
            return Err(rejection(command, format!("contains forbidden pattern {pattern:?}")));
        }
    }
    Ok(())
}

fn rejection(command: &str, reason: String) -> ExecutionError {
    ExecutionError::new(
        ErrorKind::Permission,
        "safety",
        format!("command {command:?} rejected: {reason}"),
    )
    .recoverable(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_screens_nothing() {
        let gate = SafetyGate::new(SafetyMode::None);
        assert!(gate.screen("rm -rf / --no-preserve-root").is_ok());
    }

    #[test]
    fn basic_rejects_destructive_patterns() {
        let gate = SafetyGate::new(SafetyMode::Basic);
        assert!(gate.screen("rm -rf /tmp/x").is_ok());
        assert!(gate.screen("rm -rf /").is_err());
        assert!(gate.screen("dd if=/dev/zero of=/dev/sda").is_err());
        assert!(gate.screen("MKFS.ext4 /dev/sda1").is_err());
        assert!(gate.screen("echo format").is_err());
        assert!(gate.screen("echo hello").is_ok());
    }

    #[test]
    fn restrictive_adds_privilege_patterns() {
        let gate = SafetyGate::new(SafetyMode::Restrictive);
        let err = gate.screen("sudo rm -rf /tmp/x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permission);
        assert!(!err.recoverable);
        assert!(gate.screen("chmod 777 file").is_err());
        assert!(gate.screen("chown root file").is_err());
        assert!(gate.screen("su -").is_err());
        assert!(gate.screen("mkdir demo").is_ok());
    }

    #[test]
    fn paranoid_uses_default_allowlist_when_unconfigured() {
        let gate = SafetyGate::new(SafetyMode::Paranoid { allowlist: vec![] });
        assert!(gate.screen("echo hi").is_ok());
        assert!(gate.screen("ls -la").is_ok());
        assert!(gate.screen("curl https://example.com").is_err());
        assert!(gate.screen("").is_err());
    }

    #[test]
    fn paranoid_honors_configured_allowlist() {
        let gate = SafetyGate::new(SafetyMode::Paranoid {
            allowlist: vec!["git".into(), "cargo".into()],
        });
        assert!(gate.screen("git status").is_ok());
        assert!(gate.screen("cargo metadata").is_ok());
        // The default set no longer applies once a list is configured
        assert!(gate.screen("echo hi").is_err());
    }
}
