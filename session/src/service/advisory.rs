//! Advisory hints for backend failure messages
//!
//! Backend wording differs between deployments, so matching is pluggable
//! and the marker strings come from [`Config`](crate::config::Config).

/// Produces extra transcript lines for a failure message
pub trait AdvisoryMatcher: Send + Sync {
    /// Lines to append after `message`, or `None` when nothing matches
    fn advise(&self, message: &str, details: Option<&str>) -> Option<Vec<String>>;
}

/// Case-insensitive substring match against a list of markers
#[derive(Debug, Clone, Default)]
pub struct SignatureMatcher {
    patterns: Vec<String>,
}

impl SignatureMatcher {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Appends a fixed checklist when a start failure marker is seen
#[derive(Debug, Clone)]
pub struct StartFailureAdvisor {
    markers: SignatureMatcher,
}

const START_FAILURE_CHECKLIST: &[&str] = &[
    "---",
    "The start script failed. Check:",
    "  1. the script has no syntax errors",
    "  2. the script and server binary are executable",
    "  3. the working directory in the script is correct",
    "---",
];

impl StartFailureAdvisor {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: SignatureMatcher::new(markers),
        }
    }
}

impl AdvisoryMatcher for StartFailureAdvisor {
    fn advise(&self, message: &str, details: Option<&str>) -> Option<Vec<String>> {
        let hit = self.markers.matches(message) || details.is_some_and(|d| self.markers.matches(d));
        hit.then(|| START_FAILURE_CHECKLIST.iter().map(|s| s.to_string()).collect())
    }
}
