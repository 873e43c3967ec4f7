//! Engine configuration
//!
//! Loaded from YAML, then overlaid with `PCA_*` environment variables.
//! Loop bounds are hard-capped at 3 regardless of what the file says.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::context::{MAX_DRIFT_RETRIES, MAX_PLAN_ATTEMPTS};
use crate::error::ConfigError;

/// How aggressively the Permission Gate asks for confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Every tool needs confirmation
    Safe,
    /// Medium/high risk tools and confirming actions need confirmation
    #[default]
    SemiAutonomous,
    /// Nothing needs confirmation
    Autonomous,
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SafetyMode::Safe => write!(f, "safe"),
            SafetyMode::SemiAutonomous => write!(f, "semi_autonomous"),
            SafetyMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl FromStr for SafetyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "safe" => Ok(SafetyMode::Safe),
            "semi_autonomous" | "semi" => Ok(SafetyMode::SemiAutonomous),
            "autonomous" | "auto" => Ok(SafetyMode::Autonomous),
            other => Err(ConfigError::InvalidValue {
                key: "safety_mode".into(),
                value: other.into(),
            }),
        }
    }
}

/// What to do when the Risk Assessor itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentFallback {
    /// Treat the plan as HIGH risk and force manual confirmation
    #[default]
    RequireConfirmation,
    /// Abort the request
    Abort,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_risky_keywords() -> Vec<String> {
    [
        "delete", "remove", "kill", "format", "wipe", "erase", "shutdown", "reboot", "registry",
        "uninstall",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_attempts() -> u32 {
    3
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_diagnostic_tools() -> Vec<String> {
    vec!["sys.get_info".into(), "net.check_connection".into()]
}

fn default_router_threshold() -> f64 {
    0.47
}

fn default_history_capacity() -> usize {
    500
}

fn default_unknown_tool_penalty() -> f64 {
    0.3
}

fn default_safety_rules() -> Vec<String> {
    [
        "Never delete system files without explicit backup",
        "Always create restore point before registry changes",
        "Halt execution if admin rights are required but not granted",
        "Do not modify network settings without user confirmation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_memory_depth() -> usize {
    5
}

/// `value` when finite, else `fallback`
fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn parse_finite(key: &str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.into(),
            value: raw.into(),
        })
}

/// Tunables for one Orchestrator instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub safety_mode: SafetyMode,
    /// Plans scoring below this go through the Risk Validation Loop
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_risky_keywords")]
    pub risky_keywords: Vec<String>,
    #[serde(default = "default_attempts")]
    pub max_plan_attempts: u32,
    #[serde(default = "default_attempts")]
    pub max_drift_retries: u32,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default)]
    pub assessment_fallback: AssessmentFallback,
    /// Tools the Permission Gate always denies
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// Safe tools run during DIAGNOSE
    #[serde(default = "default_diagnostic_tools")]
    pub diagnostic_tools: Vec<String>,
    #[serde(default = "default_router_threshold")]
    pub router_threshold: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Confidence subtracted in SCORE per step naming an unregistered tool
    #[serde(default = "default_unknown_tool_penalty")]
    pub unknown_tool_penalty: f64,
    /// Curated rules handed to the Planner with every request
    #[serde(default = "default_safety_rules")]
    pub safety_rules: Vec<String>,
    /// Archived requests recalled for the Planner; 0 disables recall
    #[serde(default = "default_memory_depth")]
    pub memory_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_mode: SafetyMode::default(),
            confidence_threshold: default_confidence_threshold(),
            risky_keywords: default_risky_keywords(),
            max_plan_attempts: default_attempts(),
            max_drift_retries: default_attempts(),
            tool_timeout_ms: default_tool_timeout_ms(),
            assessment_fallback: AssessmentFallback::default(),
            denied_tools: Vec::new(),
            diagnostic_tools: default_diagnostic_tools(),
            router_threshold: default_router_threshold(),
            history_capacity: default_history_capacity(),
            unknown_tool_penalty: default_unknown_tool_penalty(),
            safety_rules: default_safety_rules(),
            memory_depth: default_memory_depth(),
        }
    }
}

impl EngineConfig {
    /// Parse YAML content
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        Ok(config.normalized())
    }

    /// Read and parse a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay `PCA_SAFETY_MODE`, `PCA_TOOL_TIMEOUT_MS` and
    /// `PCA_CONFIDENCE_THRESHOLD` from `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("PCA_SAFETY_MODE") {
            self.safety_mode = mode.parse()?;
        }
        if let Some(timeout) = lookup("PCA_TOOL_TIMEOUT_MS") {
            self.tool_timeout_ms = timeout.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PCA_TOOL_TIMEOUT_MS".into(),
                value: timeout.clone(),
            })?;
        }
        if let Some(threshold) = lookup("PCA_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_finite("PCA_CONFIDENCE_THRESHOLD", &threshold)?;
        }
        Ok(self.normalized())
    }

    /// Clamp every bound into its legal range. Non-finite ratios fall back
    /// to their defaults, since `clamp` lets NaN through.
    pub fn normalized(mut self) -> Self {
        self.max_plan_attempts = self.max_plan_attempts.clamp(1, MAX_PLAN_ATTEMPTS);
        self.max_drift_retries = self.max_drift_retries.clamp(1, MAX_DRIFT_RETRIES);
        self.confidence_threshold =
            finite_or(self.confidence_threshold, default_confidence_threshold()).clamp(0.0, 1.0);
        self.router_threshold =
            finite_or(self.router_threshold, default_router_threshold()).clamp(0.0, 1.0);
        self.unknown_tool_penalty =
            finite_or(self.unknown_tool_penalty, default_unknown_tool_penalty()).clamp(0.0, 1.0);
        self.tool_timeout_ms = self.tool_timeout_ms.max(1);
        self.history_capacity = self.history_capacity.max(1);
        self
    }

    pub fn with_safety_mode(mut self, mode: SafetyMode) -> Self {
        self.safety_mode = mode;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_ms = (timeout.as_millis() as u64).max(1);
        self
    }

    pub fn with_assessment_fallback(mut self, fallback: AssessmentFallback) -> Self {
        self.assessment_fallback = fallback;
        self
    }

    pub fn with_diagnostic_tools(mut self, tools: Vec<String>) -> Self {
        self.diagnostic_tools = tools;
        self
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}
