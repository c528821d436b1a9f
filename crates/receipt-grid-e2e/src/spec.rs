//! Declarative scenario model, loadable from YAML

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};
use crate::fixture::ReceiptSummary;

/// A complete scenario parsed from YAML or built in code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Viewport,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,

    /// Compare the evidence screenshot against a baseline
    #[serde(default)]
    pub visual_regression: bool,

    /// Threshold for visual diff (0.0 - 100.0 percent)
    #[serde(default = "default_threshold")]
    pub visual_threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1280, height: 720 }
    }
}

/// How an element is located on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Target {
    /// Visible text, optionally matched exactly
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },

    /// ARIA role plus accessible name
    Role { role: String, name: String },

    /// Raw CSS selector
    Css { selector: String },
}

impl Target {
    pub fn text(text: impl Into<String>) -> Self {
        Target::Text { text: text.into(), exact: false }
    }

    pub fn exact_text(text: impl Into<String>) -> Self {
        Target::Text { text: text.into(), exact: true }
    }

    pub fn button(name: impl Into<String>) -> Self {
        Target::Role { role: "button".to_string(), name: name.into() }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Target::Css { selector: selector.into() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Text { text, exact: true } => write!(f, "text={:?}", text),
            Target::Text { text, exact: false } => write!(f, "text~{:?}", text),
            Target::Role { role, name } => write!(f, "{} {:?}", role, name),
            Target::Css { selector } => write!(f, "css={}", selector),
        }
    }
}

/// Synthesized response for an intercepted route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Receipt returned as the JSON body
    pub receipt: ReceiptSummary,
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "application/json".to_string()
}

impl MockResponse {
    /// 200 JSON response with a permissive CORS header
    pub fn json(receipt: ReceiptSummary) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        Self {
            status: default_status(),
            content_type: default_content_type(),
            headers,
            receipt,
        }
    }
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL (relative to base) and wait for an element
    Navigate {
        url: String,
        #[serde(default)]
        wait_for: Option<Target>,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Wait for an element to be visible, then click it
    Click {
        target: Target,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Fulfil matching requests with a canned response
    Intercept {
        pattern: String,
        response: MockResponse,
    },

    /// Click a trigger that opens the native file chooser and pick files
    Upload {
        trigger: Target,
        files: Vec<PathBuf>,
    },

    /// Wait for an element to become visible
    ExpectVisible {
        target: Target,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Check the class attribute of a visible element
    AssertClasses {
        target: Target,
        rule: ClassRule,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Take a screenshot
    Screenshot {
        path: PathBuf,
        #[serde(default)]
        full_page: bool,
    },

    /// Log a message
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    5000
}

impl TestStep {
    /// Short label used in logs, reports and failure diagnostics
    pub fn name(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate:{}", url),
            TestStep::Click { target, .. } => format!("click:{}", target),
            TestStep::Intercept { pattern, .. } => format!("intercept:{}", pattern),
            TestStep::Upload { files, .. } => format!("upload:{} file(s)", files.len()),
            TestStep::ExpectVisible { target, .. } => format!("expect_visible:{}", target),
            TestStep::AssertClasses { target, .. } => format!("assert_classes:{}", target),
            TestStep::Screenshot { path, .. } => format!("screenshot:{}", path.display()),
            TestStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

/// Expected CSS class tokens on an element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Every token must be present
    #[serde(default)]
    pub all_of: Vec<String>,

    /// At least one token must be present (ignored when empty)
    #[serde(default)]
    pub any_of: Vec<String>,

    /// No token may be present
    #[serde(default)]
    pub none_of: Vec<String>,
}

/// Why a class attribute did not satisfy a [`ClassRule`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassMismatch {
    pub missing: Vec<String>,
    pub missing_any_of: Vec<String>,
    pub forbidden: Vec<String>,
}

impl fmt::Display for ClassMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing {}", self.missing.join(", ")));
        }
        if !self.missing_any_of.is_empty() {
            parts.push(format!("none of [{}] present", self.missing_any_of.join(", ")));
        }
        if !self.forbidden.is_empty() {
            parts.push(format!("unexpected {}", self.forbidden.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl ClassRule {
    /// Check a raw `class` attribute value
    pub fn check(&self, class_attr: &str) -> Result<(), ClassMismatch> {
        let tokens: Vec<&str> = class_attr.split_whitespace().collect();
        let has = |t: &String| tokens.contains(&t.as_str());

        let mismatch = ClassMismatch {
            missing: self.all_of.iter().filter(|t| !has(*t)).cloned().collect(),
            missing_any_of: if self.any_of.is_empty() || self.any_of.iter().any(has) {
                vec![]
            } else {
                self.any_of.clone()
            },
            forbidden: self.none_of.iter().filter(|t| has(*t)).cloned().collect(),
        };

        if mismatch == ClassMismatch::default() {
            Ok(())
        } else {
            Err(mismatch)
        }
    }
}

impl TestSpec {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!("scenario '{}' has no steps", self.name)));
        }
        if !(0.0..=100.0).contains(&self.visual_threshold) {
            return Err(E2eError::SpecParse(format!(
                "visual_threshold {} outside 0-100",
                self.visual_threshold
            )));
        }
        for step in &self.steps {
            if let TestStep::Upload { files, .. } = step {
                if files.is_empty() {
                    return Err(E2eError::SpecParse("upload step without files".to_string()));
                }
            }
        }
        Ok(())
    }
}
