//! Project stack detection for automatic configuration

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::config::AutoconfigConfig;
use crate::deploy::DeployResult;
use crate::sync::SyncResult;

/// A project ecosystem recognised by its marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stack {
    Rust,
    Node,
    Python,
    Go,
}

impl Stack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Node => "node",
            Self::Python => "python",
            Self::Go => "go",
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MARKERS: [(&str, Stack); 5] = [
    ("Cargo.toml", Stack::Rust),
    ("package.json", Stack::Node),
    ("pyproject.toml", Stack::Python),
    ("requirements.txt", Stack::Python),
    ("go.mod", Stack::Go),
];

/// Stacks whose markers sit in `project_root`, in marker order.
pub fn detect_stacks(project_root: &Path) -> Vec<Stack> {
    let mut stacks = Vec::new();
    for (marker, stack) in MARKERS {
        if project_root.join(marker).is_file() && !stacks.contains(&stack) {
            stacks.push(stack);
        }
    }
    stacks
}

/// Profile mapped to the first detected stack that has one.
pub fn choose_profile(config: &AutoconfigConfig, stacks: &[Stack]) -> Option<String> {
    stacks
        .iter()
        .find_map(|stack| config.profiles.get(stack.as_str()).cloned())
}

/// What an autoconfig run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoconfigReport {
    pub stacks: Vec<Stack>,
    /// Profile applied; `None` means the default profile.
    pub profile: Option<String>,
    pub synced: Vec<SyncResult>,
    /// Sources that failed to sync; their cached copies were used.
    pub sync_errors: Vec<String>,
    pub deploy: DeployResult,
}

impl AutoconfigReport {
    pub fn summary(&self) -> String {
        let stacks = if self.stacks.is_empty() {
            "no known stack".to_string()
        } else {
            self.stacks
                .iter()
                .map(Stack::as_str)
                .collect::<Vec<_>>()
                .join("+")
        };
        format!(
            "{stacks}, profile {}, {}",
            self.profile.as_deref().unwrap_or("default"),
            self.deploy.summary()
        )
    }
}
