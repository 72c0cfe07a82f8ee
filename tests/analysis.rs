use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gh_policy::{
    AccessAnalyzer, AccessLevel, AnalysisError, AnalysisResult, FetchError, RepositoryTeamsFetcher,
    Team,
};
use pretty_assertions::assert_eq;

/// In-memory fetcher; repositories without an entry are not found.
#[derive(Default)]
struct StaticFetcher {
    repos: HashMap<String, Vec<Team>>,
    slow: HashMap<String, Duration>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticFetcher {
    fn new(repos: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            repos: repos
                .into_iter()
                .map(|(name, slugs)| (name.to_string(), slugs.into_iter().map(team).collect()))
                .collect(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_slow_repo(mut self, repo: &str, delay: Duration) -> Self {
        self.slow.insert(repo.to_string(), delay);
        self
    }
}

#[async_trait]
impl RepositoryTeamsFetcher for StaticFetcher {
    async fn fetch_teams(&self, repo: &str) -> Result<Vec<Team>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.slow.get(repo).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.repos
            .get(repo)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                repo: repo.to_string(),
            })
    }
}

fn team(slug: &str) -> Team {
    Team {
        name: format!("Team {slug}"),
        slug: slug.to_string(),
        description: Some(format!("The {slug} team")),
        url: format!("https://github.com/orgs/mdsol/teams/{slug}"),
        access: AccessLevel::Write,
    }
}

fn slugs(teams: &[Team]) -> Vec<&str> {
    teams.iter().map(|team| team.slug.as_str()).collect()
}

/// Exact and close matches never overlap, and nothing at or below half
/// coverage is reported.
fn assert_partition(result: &AnalysisResult) {
    let total = result.effective_total();
    for close in &result.close_matches {
        assert!(!result
            .exact_matches
            .iter()
            .any(|team| team.slug == close.team.slug));
        assert!(close.access_count * 2 > total);
        assert!(close.access_count < total);
        let expected = 100.0 * close.access_count as f64 / total as f64;
        assert!((close.access_percent - expected).abs() < 1e-9);
        assert_eq!(close.missing_repos.len(), total - close.access_count);
    }
}

#[tokio::test]
async fn exact_and_close_matches_across_three_repositories() {
    let fetcher = StaticFetcher::new(vec![
        ("r1", vec!["a", "b"]),
        ("r2", vec!["a", "b", "c"]),
        ("r3", vec!["a", "c"]),
    ]);
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer.analyze_access(&["r1", "r2", "r3"]).await.unwrap();
    assert_partition(&result);

    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert_eq!(result.close_matches.len(), 2);

    let b = &result.close_matches[0];
    assert_eq!(b.team.slug, "b");
    assert_eq!(b.access_count, 2);
    assert!((b.access_percent - 66.666_666).abs() < 1e-3);
    assert_eq!(b.missing_repos, vec!["r3".to_string()]);

    let c = &result.close_matches[1];
    assert_eq!(c.team.slug, "c");
    assert_eq!(c.access_count, 2);
    assert_eq!(c.missing_repos, vec!["r1".to_string()]);

    assert_eq!(result.effective_total(), 3);
    assert!(result.failures.is_empty());
}

#[tokio::test]
async fn failed_repository_is_excluded_from_the_total() {
    let fetcher = StaticFetcher::new(vec![("r1", vec!["a"])]);
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer.analyze_access(&["r1", "r2"]).await.unwrap();

    assert_eq!(result.effective_total(), 1);
    assert_eq!(result.requested(), 2);
    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert!(result.close_matches.is_empty());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].repository, "r2");
    assert!(matches!(result.failures[0].error, FetchError::NotFound { .. }));
}

#[tokio::test]
async fn half_coverage_is_not_a_close_match() {
    let fetcher = StaticFetcher::new(vec![
        ("r1", vec!["a", "d"]),
        ("r2", vec!["a", "d"]),
        ("r3", vec!["a"]),
        ("r4", vec!["a", "e"]),
    ]);
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer
        .analyze_access(&["r1", "r2", "r3", "r4"])
        .await
        .unwrap();
    assert_partition(&result);

    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert!(result.close_matches.is_empty());
}

#[tokio::test]
async fn empty_input_fails_without_fetching() {
    let fetcher = Arc::new(StaticFetcher::new(vec![("r1", vec!["a"])]));
    let analyzer = AccessAnalyzer::new(Arc::clone(&fetcher));

    let err = analyzer.analyze_access::<&str>(&[]).await.unwrap_err();

    assert!(matches!(err, AnalysisError::EmptyInput));
    assert_eq!(err.to_string(), "no repository names provided");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_fetch_failing_is_fatal() {
    let analyzer = AccessAnalyzer::new(StaticFetcher::new(vec![]));

    let err = analyzer.analyze_access(&["r1", "r2"]).await.unwrap_err();

    match err {
        AnalysisError::NoDataAvailable { requested, failures } => {
            assert_eq!(requested, 2);
            let repos: Vec<_> = failures.iter().map(|f| f.repository.as_str()).collect();
            assert_eq!(repos, vec!["r1", "r2"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn duplicate_repositories_are_fetched_but_counted_once() {
    let fetcher = Arc::new(StaticFetcher::new(vec![
        ("r1", vec!["a", "b"]),
        ("r2", vec!["a"]),
    ]));
    let analyzer = AccessAnalyzer::new(Arc::clone(&fetcher));

    let result = analyzer.analyze_access(&["r1", "r1", "r2"]).await.unwrap();
    assert_partition(&result);

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.repositories, vec!["r1", "r2"]);
    assert_eq!(result.effective_total(), 2);
    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert!(result.close_matches.is_empty());
}

#[tokio::test]
async fn repeating_a_repository_does_not_inflate_coverage() {
    let fetcher = StaticFetcher::new(vec![("r1", vec!["a"]), ("r2", vec![])]);
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer.analyze_access(&["r1", "r1", "r2"]).await.unwrap();

    assert_eq!(result.effective_total(), 2);
    assert!(result.exact_matches.is_empty());
    assert!(result.close_matches.is_empty());
}

#[tokio::test]
async fn repeated_failing_repository_is_reported_once() {
    let analyzer = AccessAnalyzer::new(StaticFetcher::new(vec![("r1", vec!["a"])]));

    let result = analyzer
        .analyze_access(&["gone", "r1", "gone"])
        .await
        .unwrap();

    assert_eq!(result.requested(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].repository, "gone");
}

#[tokio::test]
async fn custom_role_team_keeps_its_repository_in_the_total() {
    let mut fetcher = StaticFetcher::new(vec![
        ("r1", vec!["a", "b"]),
        ("r2", vec!["a", "b"]),
        ("r3", vec!["b"]),
    ]);
    let mut auditors = team("a");
    auditors.access = AccessLevel::from("security-auditor");
    fetcher.repos.get_mut("r3").unwrap().push(auditors);
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer.analyze_access(&["r1", "r2", "r3"]).await.unwrap();

    assert!(result.failures.is_empty());
    assert_eq!(result.effective_total(), 3);
    assert_eq!(slugs(&result.exact_matches), vec!["a", "b"]);
}

#[tokio::test]
async fn results_do_not_depend_on_completion_order() {
    let fetcher = StaticFetcher::new(vec![("r1", vec!["x", "y"]), ("r2", vec!["y", "x"]), ("r3", vec!["y"])])
        .with_slow_repo("r1", Duration::from_millis(60))
        .with_slow_repo("r2", Duration::from_millis(30));
    let analyzer = AccessAnalyzer::new(fetcher);

    let result = analyzer.analyze_access(&["r1", "r2", "r3"]).await.unwrap();

    assert_eq!(result.repositories, vec!["r1", "r2", "r3"]);
    assert_eq!(slugs(&result.exact_matches), vec!["y"]);
    assert_eq!(result.close_matches[0].team.slug, "x");
    assert_eq!(result.close_matches[0].missing_repos, vec!["r3".to_string()]);
}

fn uniform_fetcher(repos: &[&'static str]) -> Arc<StaticFetcher> {
    let fixtures = repos.iter().map(|repo| (*repo, vec!["a"])).collect();
    Arc::new(StaticFetcher::new(fixtures).with_delay(Duration::from_millis(20)))
}

#[tokio::test]
async fn concurrency_cap_bounds_in_flight_fetches() {
    let repos = ["r1", "r2", "r3", "r4", "r5", "r6"];
    let fetcher = uniform_fetcher(&repos);
    let analyzer = AccessAnalyzer::new(Arc::clone(&fetcher)).with_max_concurrency(2);

    let result = analyzer.analyze_access(&repos).await.unwrap();

    assert_eq!(result.effective_total(), 6);
    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 6);
    assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn fetches_are_issued_concurrently() {
    let repos = ["r1", "r2", "r3", "r4"];
    let fetcher = uniform_fetcher(&repos);
    let analyzer = AccessAnalyzer::new(Arc::clone(&fetcher));

    analyzer.analyze_access(&repos).await.unwrap();

    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fetches_outstanding_at_the_deadline_become_failures() {
    let fetcher = StaticFetcher::new(vec![("fast", vec!["a"]), ("slow", vec!["a", "b"])])
        .with_slow_repo("slow", Duration::from_secs(30));
    let analyzer = AccessAnalyzer::new(fetcher).with_timeout(Duration::from_millis(200));

    let result = analyzer.analyze_access(&["fast", "slow"]).await.unwrap();

    assert_eq!(result.repositories, vec!["fast"]);
    assert_eq!(slugs(&result.exact_matches), vec!["a"]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].repository, "slow");
    assert!(matches!(result.failures[0].error, FetchError::DeadlineExceeded));
}

#[tokio::test]
async fn result_serializes_failures_as_messages() {
    let analyzer = AccessAnalyzer::new(StaticFetcher::new(vec![("r1", vec!["a"])]));
    let result = analyzer.analyze_access(&["r1", "gone"]).await.unwrap();

    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["exact_matches"][0]["slug"], "a");
    assert_eq!(json["exact_matches"][0]["access"], "write");
    assert_eq!(json["failures"][0]["repository"], "gone");
    assert_eq!(json["failures"][0]["error"], "repository gone not found");
}
