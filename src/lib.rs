use std::fmt;

pub mod analysis;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod github;
pub mod report;
pub mod teams;
pub mod users;

pub use analysis::{AccessAnalyzer, AnalysisResult, FetchFailure, RepositoryTeamsFetcher, TeamMatch};
pub use error::{AnalysisError, ConfigError, FetchError, PolicyError};

/// The default organization every repository and team is resolved in.
pub const DEFAULT_ORG: &str = "mdsol";
pub const DEFAULT_TEAM: &str = "Team Medidata";

/// A team's access grant on a single repository.
///
/// Teams are organization-scoped, so `slug` identifies the same team across
/// every repository it appears on.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub url: String,
    pub access: AccessLevel,
}

/// Repository permission granted to a team, ordered by privilege.
///
/// Custom repository roles keep their role name. Their base role is not
/// reported alongside the team, so they sort below every built-in level.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(from = "String", into = "String")]
pub enum AccessLevel {
    Custom(String),
    Read,
    Triage,
    Write,
    Maintain,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &str {
        match self {
            AccessLevel::Custom(role) => role.as_str(),
            AccessLevel::Read => "read",
            AccessLevel::Triage => "triage",
            AccessLevel::Write => "write",
            AccessLevel::Maintain => "maintain",
            AccessLevel::Admin => "admin",
        }
    }
}

/// Accepts both the UI names and the REST API's legacy `pull`/`push`.
impl From<&str> for AccessLevel {
    fn from(s: &str) -> Self {
        match s {
            "admin" => AccessLevel::Admin,
            "maintain" => AccessLevel::Maintain,
            "push" | "write" => AccessLevel::Write,
            "triage" => AccessLevel::Triage,
            "pull" | "read" => AccessLevel::Read,
            other => AccessLevel::Custom(other.to_string()),
        }
    }
}

impl From<String> for AccessLevel {
    fn from(s: String) -> Self {
        AccessLevel::from(s.as_str())
    }
}

impl From<AccessLevel> for String {
    fn from(level: AccessLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
