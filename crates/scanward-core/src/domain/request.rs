//! Pipeline request and scan categories.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ValidationError;

/// Kind of scan a source can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCategory {
    Code,
    Web,
}

impl ScanCategory {
    pub const ALL: [ScanCategory; 2] = [ScanCategory::Code, ScanCategory::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Web => "web",
        }
    }

    /// Route a source identifier to the category whose tool accepts it.
    ///
    /// Repository identifiers (`https://host/owner/repo.git`, `git@host:owner/repo.git`)
    /// go to `Code`; other `http(s)://host...` addresses go to `Web`.
    pub fn for_source(source: &str) -> Option<ScanCategory> {
        let source = source.trim();
        if source.is_empty() {
            return None;
        }

        let is_repo = source.ends_with(".git")
            && (source.starts_with("git@")
                || source.starts_with("ssh://")
                || has_http_host(source));
        if is_repo {
            return Some(Self::Code);
        }

        if has_http_host(source) {
            return Some(Self::Web);
        }

        None
    }
}

fn has_http_host(source: &str) -> bool {
    let rest = source
        .strip_prefix("https://")
        .or_else(|| source.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}

impl std::fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "web" => Ok(Self::Web),
            _ => Err(ValidationError::UnknownCategory {
                value: s.to_string(),
            }),
        }
    }
}

/// Structured pipeline input. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPipelineRequest")]
pub struct PipelineRequest {
    sources: Vec<String>,
    categories: BTreeSet<ScanCategory>,
    prompt: String,
}

#[derive(Deserialize)]
struct RawPipelineRequest {
    sources: Vec<String>,
    categories: Vec<ScanCategory>,
    #[serde(default)]
    prompt: String,
}

impl TryFrom<RawPipelineRequest> for PipelineRequest {
    type Error = ValidationError;

    fn try_from(raw: RawPipelineRequest) -> std::result::Result<Self, Self::Error> {
        PipelineRequest::new(raw.sources, raw.categories, raw.prompt)
    }
}

impl PipelineRequest {
    pub fn new(
        sources: Vec<String>,
        categories: impl IntoIterator<Item = ScanCategory>,
        prompt: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        if sources.is_empty() {
            return Err(ValidationError::NoSources);
        }
        if let Some(index) = sources.iter().position(|s| s.trim().is_empty()) {
            return Err(ValidationError::EmptySource { index });
        }
        // Sources become scan tool arguments; embedded control characters
        // (newlines, NUL) cannot be passed through intact.
        if let Some(source) = sources.iter().find(|s| s.trim().chars().any(char::is_control)) {
            return Err(ValidationError::MalformedSource {
                identifier: source.trim().escape_debug().to_string(),
                reason: "contains control characters".to_string(),
            });
        }

        let categories: BTreeSet<ScanCategory> = categories.into_iter().collect();
        if categories.is_empty() {
            return Err(ValidationError::NoCategories);
        }

        Ok(Self {
            sources: sources.into_iter().map(|s| s.trim().to_string()).collect(),
            categories,
            prompt: prompt.into(),
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn categories(&self) -> &BTreeSet<ScanCategory> {
        &self.categories
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn requests(&self, category: ScanCategory) -> bool {
        self.categories.contains(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_urls_route_to_code() {
        assert_eq!(
            ScanCategory::for_source("https://github.com/acme/app.git"),
            Some(ScanCategory::Code)
        );
        assert_eq!(
            ScanCategory::for_source("git@github.com:acme/app.git"),
            Some(ScanCategory::Code)
        );
    }

    #[test]
    fn website_urls_route_to_web() {
        assert_eq!(
            ScanCategory::for_source("https://www.example.com"),
            Some(ScanCategory::Web)
        );
        assert_eq!(
            ScanCategory::for_source("http://10.0.0.5:8080/login"),
            Some(ScanCategory::Web)
        );
    }

    #[test]
    fn unroutable_sources_match_nothing() {
        assert_eq!(ScanCategory::for_source("ftp://example.com"), None);
        assert_eq!(ScanCategory::for_source("https://"), None);
        assert_eq!(ScanCategory::for_source("just text"), None);
    }

    #[test]
    fn request_rejects_empty_sources_and_categories() {
        assert_eq!(
            PipelineRequest::new(vec![], [ScanCategory::Code], "").unwrap_err(),
            ValidationError::NoSources
        );
        assert_eq!(
            PipelineRequest::new(vec!["https://a.com".into()], [], "").unwrap_err(),
            ValidationError::NoCategories
        );
        assert_eq!(
            PipelineRequest::new(vec!["https://a.com".into(), "  ".into()], [ScanCategory::Web], "")
                .unwrap_err(),
            ValidationError::EmptySource { index: 1 }
        );
    }

    #[test]
    fn request_rejects_sources_with_control_characters() {
        let err = PipelineRequest::new(
            vec!["https://a.com".into(), "https://b.com\n--flag".into()],
            [ScanCategory::Web],
            "",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedSource { .. }));
        assert!(err.to_string().contains("control characters"));

        // surrounding whitespace is trimmed, not rejected
        let req = PipelineRequest::new(vec![" https://a.com\n".into()], [ScanCategory::Web], "").unwrap();
        assert_eq!(req.sources(), ["https://a.com".to_string()]);
    }

    #[test]
    fn request_deserializes_and_validates() {
        let req: PipelineRequest = serde_json::from_str(
            r#"{"sources":["https://example.com/repo.git"],"categories":["code","code"],"prompt":"quick"}"#,
        )
        .unwrap();
        assert_eq!(req.categories().len(), 1);
        assert!(req.requests(ScanCategory::Code));
        assert!(!req.requests(ScanCategory::Web));

        let bad = serde_json::from_str::<PipelineRequest>(r#"{"sources":[],"categories":["web"]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!("WEB".parse::<ScanCategory>().unwrap(), ScanCategory::Web);
        assert!("dast".parse::<ScanCategory>().is_err());
    }
}
