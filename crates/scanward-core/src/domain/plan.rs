//! Stage vocabulary, depth levels and validated plan sequences.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;

/// The five pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Scan,
    Explain,
    Compliance,
    Report,
    Narrate,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::Scan,
        StageId::Explain,
        StageId::Compliance,
        StageId::Report,
        StageId::Narrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Explain => "explain",
            Self::Compliance => "compliance",
            Self::Report => "report",
            Self::Narrate => "narrate",
        }
    }

    /// Parse a plan token. Accepts the canonical names in any case, and the
    /// legacy `<Name>Agent` spelling (`ScanAgent`, `NarrationAgent`).
    pub fn parse_token(token: &str) -> std::result::Result<Self, ConfigurationError> {
        let lower = token.trim().to_ascii_lowercase();
        let name = lower.strip_suffix("agent").unwrap_or(&lower);
        match name {
            "scan" => Ok(Self::Scan),
            "explain" => Ok(Self::Explain),
            "compliance" => Ok(Self::Compliance),
            "report" => Ok(Self::Report),
            "narrate" | "narration" => Ok(Self::Narrate),
            _ => Err(ConfigurationError::UnknownStage {
                token: token.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse_token(s)
    }
}

/// How much analysis a request implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthLevel {
    Minimal,
    Cve,
    Fixes,
    #[default]
    Full,
}

impl DepthLevel {
    pub const ALL: [DepthLevel; 4] = [
        DepthLevel::Minimal,
        DepthLevel::Cve,
        DepthLevel::Fixes,
        DepthLevel::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Cve => "cve",
            Self::Fixes => "fixes",
            Self::Full => "full",
        }
    }

    pub fn stages(&self) -> &'static [StageId] {
        match self {
            Self::Minimal => &[StageId::Scan, StageId::Report],
            Self::Cve => &[StageId::Scan, StageId::Compliance, StageId::Report],
            Self::Fixes => &[StageId::Scan, StageId::Explain, StageId::Report],
            Self::Full => &StageId::ALL,
        }
    }
}

impl std::fmt::Display for DepthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DepthLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "cve" => Ok(Self::Cve),
            "fixes" => Ok(Self::Fixes),
            "full" => Ok(Self::Full),
            other => Err(ConfigurationError::Invalid(format!(
                "unknown depth level: {other}"
            ))),
        }
    }
}

/// Ordered, non-empty, repeat-free list of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PlanSequence(Vec<StageId>);

impl PlanSequence {
    pub fn new(stages: Vec<StageId>) -> std::result::Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::EmptyPlan);
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(ConfigurationError::DuplicateStage { stage: *stage });
            }
        }
        Ok(Self(stages))
    }

    /// Parse raw stage tokens. Any unknown token rejects the whole plan.
    pub fn from_tokens<I, S>(tokens: I) -> std::result::Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stages = tokens
            .into_iter()
            .map(|t| StageId::parse_token(t.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(stages)
    }

    pub fn for_depth(depth: DepthLevel) -> Self {
        Self(depth.stages().to_vec())
    }

    pub fn full() -> Self {
        Self::for_depth(DepthLevel::Full)
    }

    pub fn stages(&self) -> &[StageId] {
        &self.0
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.0.contains(&stage)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for PlanSequence {
    type Error = ConfigurationError;

    fn try_from(tokens: Vec<String>) -> std::result::Result<Self, Self::Error> {
        Self::from_tokens(tokens)
    }
}

impl From<PlanSequence> for Vec<String> {
    fn from(plan: PlanSequence) -> Self {
        plan.0.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl std::fmt::Display for PlanSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", names.join(" -> "))
    }
}
