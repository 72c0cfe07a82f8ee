use std::path::PathBuf;

use thiserror::Error;

use crate::analysis::FetchFailure;

/// Failure to fetch the teams of a single repository.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("repository {repo} not found")]
    NotFound { repo: String },

    #[error("access denied to repository {repo}")]
    AccessDenied { repo: String },

    #[error("deadline exceeded before teams were fetched")]
    DeadlineExceeded,

    #[error("GitHub API request failed: {0}")]
    Api(#[from] octocrab::Error),
}

/// Fatal outcomes of a cross-repository access analysis.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("no repository names provided")]
    EmptyInput,

    #[error("could not get teams for any of the {requested} specified repositories")]
    NoDataAvailable {
        requested: usize,
        failures: Vec<FetchFailure>,
    },
}

/// A user or repository that does not satisfy organization policy, or an
/// API failure while checking.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("user {login} not found")]
    UserNotFound { login: String },

    #[error("unable to resolve email {email} to a user in {org}")]
    UnresolvedEmail { email: String, org: String },

    #[error("user {login} has no public email")]
    NoPublicEmail { login: String },

    #[error("user {login} has no public name")]
    NoPublicName { login: String },

    #[error("user {login} has non-conformant email address {email}")]
    NonConformantEmail { login: String, email: String },

    #[error("user {login} is not a member of organization {org}")]
    NotOrgMember { login: String, org: String },

    #[error("user {login} is not SSO enabled in {org}")]
    NotSsoLinked { login: String, org: String },

    #[error("unable to find team {team} in {org}")]
    TeamNotFound { team: String, org: String },

    #[error("repository {repo} not found in {org}")]
    RepositoryNotFound { repo: String, org: String },

    #[error("GraphQL query failed: {0}")]
    GraphQl(String),

    #[error("GitHub API request failed")]
    Api(#[from] octocrab::Error),
}

impl PolicyError {
    /// Remediation text to hand back to the account owner, if any.
    pub fn hint(&self) -> Option<String> {
        const PROFILE: &str = "( fix on https://github.com/settings/profile )";
        match self {
            PolicyError::NoPublicEmail { login } => Some(format!(
                "The account {login} is non-conformant (no-public-email), please check the instructions in the room topic. {PROFILE}"
            )),
            PolicyError::NoPublicName { login } => Some(format!(
                "The account {login} is non-conformant (no-name), please check the instructions in the room topic. {PROFILE}"
            )),
            PolicyError::NonConformantEmail { login, email } => Some(format!(
                "The account {login} (email {email}) is non-conformant (incorrect mail domain), please check the instructions in the room topic."
            )),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no GitHub token found; pass --token, set GITHUB_AUTH_TOKEN, or add one to {path}")]
    MissingToken { path: String },
}
