//! Cross-repository team access analysis.
//!
//! Given a set of repositories, finds the teams that can reach all of them
//! (exact matches) and the teams that can reach a strict majority of them
//! (close matches), reporting which repositories the latter are missing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, FetchError};
use crate::Team;

/// Source of the teams that have access to a repository.
///
/// Called once per repository per analysis, possibly from several
/// concurrent fetches at once.
#[async_trait]
pub trait RepositoryTeamsFetcher: Send + Sync {
    async fn fetch_teams(&self, repo: &str) -> Result<Vec<Team>, FetchError>;
}

#[async_trait]
impl<F: RepositoryTeamsFetcher + ?Sized> RepositoryTeamsFetcher for Arc<F> {
    async fn fetch_teams(&self, repo: &str) -> Result<Vec<Team>, FetchError> {
        (**self).fetch_teams(repo).await
    }
}

/// Teams granted access to one successfully fetched repository.
#[derive(Debug, Clone)]
pub struct RepositoryTeams {
    pub name: String,
    pub teams: Vec<Team>,
}

/// A repository whose teams could not be fetched.
#[derive(Debug, Serialize)]
pub struct FetchFailure {
    pub repository: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: FetchError,
}

/// A team with access to a strict majority, but not all, of the repositories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMatch {
    pub team: Team,
    pub access_count: usize,
    pub access_percent: f64,
    pub missing_repos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResult {
    /// Teams with access to every analysed repository, in discovery order.
    pub exact_matches: Vec<Team>,
    pub close_matches: Vec<TeamMatch>,
    /// Distinct repositories whose teams were fetched, in input order.
    pub repositories: Vec<String>,
    pub failures: Vec<FetchFailure>,
}

impl AnalysisResult {
    /// Denominator used for every coverage figure in the result.
    pub fn effective_total(&self) -> usize {
        self.repositories.len()
    }

    pub fn requested(&self) -> usize {
        self.repositories.len() + self.failures.len()
    }
}

pub struct AccessAnalyzer<F> {
    fetcher: F,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl<F: RepositoryTeamsFetcher> AccessAnalyzer<F> {
    /// Analyzer that fetches every repository at once with no deadline.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_concurrency: None,
            timeout: None,
        }
    }

    /// Caps the number of in-flight fetches. A limit of zero is treated as one.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Deadline for the whole fetch phase. Fetches still outstanding when it
    /// passes are recorded as failures.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn analyze_access<S: AsRef<str>>(
        &self,
        repositories: &[S],
    ) -> Result<AnalysisResult, AnalysisError> {
        if repositories.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let limit = self.max_concurrency.unwrap_or(repositories.len());

        let mut outcomes: Vec<_> = stream::iter(repositories.iter().enumerate())
            .map(|(index, repo)| {
                let repo = repo.as_ref();
                async move { (index, repo, self.fetch_one(repo, deadline).await) }
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        // Completion order is arbitrary; aggregate in input order.
        outcomes.sort_by_key(|(index, _, _)| *index);

        // Repeated names are all fetched, but each repository contributes
        // one entry: its first success, else its first failure.
        let mut fetched: Vec<RepositoryTeams> = Vec::with_capacity(outcomes.len());
        let mut failures: Vec<FetchFailure> = vec![];
        for (_, repo, outcome) in outcomes {
            let seen = fetched.iter().any(|entry| entry.name == repo);
            match outcome {
                Ok(_) if seen => debug!("Repository {repo} was already fetched"),
                Ok(teams) => {
                    debug!("Repository {repo} has {} teams with access", teams.len());
                    failures.retain(|failure| failure.repository != repo);
                    fetched.push(RepositoryTeams {
                        name: repo.to_string(),
                        teams,
                    });
                }
                Err(error) => {
                    warn!("Error getting teams for repo {repo}: {error}");
                    if !seen && !failures.iter().any(|failure| failure.repository == repo) {
                        failures.push(FetchFailure {
                            repository: repo.to_string(),
                            error,
                        });
                    }
                }
            }
        }
        let requested = fetched.len() + failures.len();

        if fetched.is_empty() {
            return Err(AnalysisError::NoDataAvailable {
                requested,
                failures,
            });
        }

        let (exact_matches, close_matches) = classify(&fetched);
        info!(
            "Found {} exact and {} close matches across {} of {requested} repositories",
            exact_matches.len(),
            close_matches.len(),
            fetched.len(),
        );

        Ok(AnalysisResult {
            exact_matches,
            close_matches,
            repositories: fetched.into_iter().map(|repo| repo.name).collect(),
            failures,
        })
    }

    async fn fetch_one(&self, repo: &str, deadline: Option<Instant>) -> Result<Vec<Team>, FetchError> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.fetcher.fetch_teams(repo))
                .await
                .unwrap_or_else(|_| Err(FetchError::DeadlineExceeded)),
            None => self.fetcher.fetch_teams(repo).await,
        }
    }
}

struct TeamAccessRecord<'a> {
    team: &'a Team,
    access_count: usize,
    last_repo: usize,
}

/// Splits the teams seen across `repos` into exact and close matches.
///
/// The first record seen for a slug is kept as the team's details. Both
/// collections are in discovery order.
pub fn classify(repos: &[RepositoryTeams]) -> (Vec<Team>, Vec<TeamMatch>) {
    let total = repos.len();
    let mut order: Vec<&str> = vec![];
    let mut records: HashMap<&str, TeamAccessRecord> = HashMap::new();

    for (index, repo) in repos.iter().enumerate() {
        for team in &repo.teams {
            match records.entry(team.slug.as_str()) {
                Entry::Occupied(mut entry) => {
                    let record = entry.get_mut();
                    if record.last_repo == index {
                        continue;
                    }
                    if !same_team(record.team, team) {
                        warn!(
                            "Team {} is described differently on {}; keeping the first description seen",
                            team.slug, repo.name
                        );
                    }
                    record.access_count += 1;
                    record.last_repo = index;
                }
                Entry::Vacant(entry) => {
                    order.push(team.slug.as_str());
                    entry.insert(TeamAccessRecord {
                        team,
                        access_count: 1,
                        last_repo: index,
                    });
                }
            }
        }
    }

    let mut exact_matches = vec![];
    let mut close_matches = vec![];
    for slug in order {
        let record = &records[slug];
        let count = record.access_count;
        if count == total {
            exact_matches.push(record.team.clone());
        } else if count * 2 > total {
            close_matches.push(TeamMatch {
                team: record.team.clone(),
                access_count: count,
                access_percent: count as f64 / total as f64 * 100.0,
                missing_repos: missing_repos(slug, repos),
            });
        }
    }

    (exact_matches, close_matches)
}

fn missing_repos(slug: &str, repos: &[RepositoryTeams]) -> Vec<String> {
    repos
        .iter()
        .filter(|repo| !repo.teams.iter().any(|team| team.slug == slug))
        .map(|repo| repo.name.clone())
        .collect()
}

// Access level is a per-repository grant and may legitimately differ.
fn same_team(a: &Team, b: &Team) -> bool {
    a.name == b.name && a.description == b.description && a.url == b.url
}

fn serialize_display<S: Serializer>(error: &FetchError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessLevel;

    fn team(slug: &str, access: AccessLevel) -> Team {
        Team {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            description: None,
            url: format!("https://github.com/orgs/mdsol/teams/{slug}"),
            access,
        }
    }

    fn repo(name: &str, slugs: &[&str]) -> RepositoryTeams {
        RepositoryTeams {
            name: name.to_string(),
            teams: slugs.iter().map(|slug| team(slug, AccessLevel::Write)).collect(),
        }
    }

    #[test]
    fn classification_keeps_discovery_order() {
        let repos = vec![repo("r1", &["c", "a", "b"]), repo("r2", &["b", "a", "c"])];
        let (exact, close) = classify(&repos);
        let slugs: Vec<_> = exact.iter().map(|team| team.slug.as_str()).collect();
        assert_eq!(slugs, vec!["c", "a", "b"]);
        assert!(close.is_empty());
    }

    #[test]
    fn repeated_slug_within_one_repository_counts_once() {
        let repos = vec![
            repo("r1", &["a", "a"]),
            repo("r2", &["b"]),
            repo("r3", &["b"]),
        ];
        let (exact, close) = classify(&repos);
        assert!(exact.is_empty());
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].team.slug, "b");
        assert_eq!(close[0].missing_repos, vec!["r1".to_string()]);
    }

    #[test]
    fn first_seen_team_details_win() {
        let mut second = repo("r2", &[]);
        let mut renamed = team("a", AccessLevel::Admin);
        renamed.name = "Renamed".to_string();
        second.teams.push(renamed);
        let repos = vec![
            RepositoryTeams {
                name: "r1".to_string(),
                teams: vec![team("a", AccessLevel::Read)],
            },
            second,
        ];

        let (exact, _) = classify(&repos);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].name, "A");
        assert_eq!(exact[0].access, AccessLevel::Read);
    }

    #[test]
    fn single_repository_makes_every_team_exact() {
        let (exact, close) = classify(&[repo("r1", &["a", "b"])]);
        assert_eq!(exact.len(), 2);
        assert!(close.is_empty());
    }
}
