//! Tunables of a debug session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Memory access strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAccessConfig {
    /// Use System Bus Access when `sbcs` reports a usable block, abstract memory commands otherwise.
    #[default]
    Auto,
    /// Always use abstract memory commands.
    Abstract,
    /// Always use System Bus Access.
    SystemBus,
}

/// Configuration of a RISC-V debug session.
///
/// Usually embedded in a target description:
///
/// ```yaml
/// command_timeout: 250
/// memory_access: system_bus
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Maximum time in milliseconds to wait for an abstract command or a system bus access.
    pub command_timeout: u64,
    /// Maximum time in milliseconds to wait for a hart to acknowledge a halt or resume request.
    pub halt_timeout: u64,
    /// How often a DMI scan answered with "busy" is re-issued before giving up.
    pub dmi_busy_retries: u32,
    /// Memory access strategy.
    pub memory_access: MemoryAccessConfig,
    /// Maximum number of Debug Modules followed through the `nextdm` chain.
    pub max_debug_modules: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            command_timeout: 500,
            halt_timeout: 100,
            dmi_busy_retries: 16,
            memory_access: MemoryAccessConfig::Auto,
            max_debug_modules: 8,
        }
    }
}

/// The configuration could not be parsed.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum ConfigError {
    /// Failed to parse the debug configuration.
    Yaml(#[from] serde_yaml::Error),
}

impl DebugConfig {
    /// Parse a configuration from YAML. Missing keys take their default value.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout)
    }

    pub(crate) fn halt_timeout(&self) -> Duration {
        Duration::from_millis(self.halt_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = DebugConfig::from_yaml("command_timeout: 250\nmemory_access: system_bus\n")
            .unwrap();

        assert_eq!(
            config,
            DebugConfig {
                command_timeout: 250,
                memory_access: MemoryAccessConfig::SystemBus,
                ..DebugConfig::default()
            }
        );
    }

    #[test]
    fn unknown_memory_access_is_rejected() {
        assert!(DebugConfig::from_yaml("memory_access: dma\n").is_err());
    }
}
