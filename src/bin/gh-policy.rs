use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use gh_policy::config::{self, Config};
use gh_policy::github::{self, GitHubTeamsFetcher};
use gh_policy::teams::{self, MembershipChange};
use gh_policy::{collaborators, report, users, AccessAnalyzer, RepositoryTeamsFetcher};
use octocrab::Octocrab;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gh-policy")]
#[command(about = "Enforce organization access policy on GitHub users, teams and repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Organization to operate on (default: config `org`, then mdsol)
    #[arg(long, global = true)]
    org: Option<String>,

    /// GitHub token (default: GITHUB_AUTH_TOKEN, config, then ~/.netrc)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Config file (default: <config dir>/gh-policy/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Check that a user satisfies the email, organization and SSO policy
    CheckUser {
        /// GitHub login or SSO email address
        user: String,
    },

    /// Validate a user, then add them to a team
    AddUser {
        /// GitHub login or SSO email address
        user: String,

        /// Team display name (default: config `default_team`)
        #[arg(long)]
        team: Option<String>,
    },

    /// List the teams with access to a repository
    RepoTeams { repo: String },

    /// Find teams with access to all, or most, of the given repositories
    CommonTeams {
        #[arg(required = true)]
        repos: Vec<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Maximum number of repositories fetched at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Give up on repositories not fetched within this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Audit the direct collaborators of a repository
    Collaborators { repo: String },

    /// Add a user as a direct admin collaborator on a repository
    AddAdmin { repo: String, user: String },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gh_policy={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().or_else(config::config_path);
    let config = match &config_path {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let org = cli.org.clone().unwrap_or_else(|| config.org().to_string());
    let token = config::resolve_token(cli.token.as_deref(), &config)?;
    let client = github::client(&token)?;

    match cli.command {
        Command::CheckUser { user } => {
            let validated = validate(&client, &org, &user, &config).await?;
            println!(
                "User {} ({}) is a {} of {org} and meets all prerequisites",
                validated.login, validated.email, validated.org_role
            );
        }
        Command::AddUser { user, team } => {
            let validated = validate(&client, &org, &user, &config).await?;
            let team_name = team.unwrap_or_else(|| config.default_team().to_string());
            let team = teams::team_by_name(&client, &org, &team_name).await?;
            match teams::add_member(&client, &org, &team, &validated.login).await? {
                MembershipChange::Added { state } => {
                    println!("User {} added to {} ({state})", validated.login, team.name)
                }
                MembershipChange::AlreadyMember { .. } => {
                    println!("User {} is already a member of {}", validated.login, team.name)
                }
            }
        }
        Command::RepoTeams { repo } => {
            let fetcher = GitHubTeamsFetcher::new(client, org.clone());
            let teams = fetcher
                .fetch_teams(&repo)
                .await
                .with_context(|| format!("Unable to get teams for {org}/{repo}"))?;
            print!("{}", report::render_repo_teams(&org, &repo, &teams));
        }
        Command::CommonTeams {
            repos,
            format,
            max_concurrency,
            timeout,
        } => {
            let mut analyzer = AccessAnalyzer::new(GitHubTeamsFetcher::new(client, org.clone()));
            if let Some(limit) = max_concurrency.or(config.max_concurrency) {
                analyzer = analyzer.with_max_concurrency(limit);
            }
            if let Some(secs) = timeout.or(config.fetch_timeout_secs) {
                analyzer = analyzer.with_timeout(Duration::from_secs(secs));
            }

            if let OutputFormat::Text = format {
                println!("Analyzing team access patterns for {} repositories...", repos.len());
                println!("Repositories: {}\n", repos.join(", "));
            }
            let result = analyzer.analyze_access(repos.as_slice()).await?;
            match format {
                OutputFormat::Text => print!("{}", report::render_analysis(&result)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
        }
        Command::Collaborators { repo } => {
            let audits = collaborators::audit_collaborators(&client, &org, &repo).await?;
            print!(
                "{}",
                report::render_collaborators(&org, &repo, &audits, chrono::Utc::now())
            );
        }
        Command::AddAdmin { repo, user } => {
            let login = users::resolve_login(&client, &org, &user).await?;
            let grant = collaborators::add_admin(&client, &org, &repo, &login).await?;
            print!(
                "{}",
                report::render_admin_grant(&org, &repo, &login, &grant, chrono::Utc::now())
            );
        }
    }

    Ok(())
}

async fn validate(
    client: &Octocrab,
    org: &str,
    user: &str,
    config: &Config,
) -> anyhow::Result<users::ValidatedUser> {
    match users::validate_user(client, org, user, &config.email_domains()).await {
        Ok(validated) => Ok(validated),
        Err(error) => {
            if let Some(hint) = error.hint() {
                println!("{hint}");
            }
            Err(error.into())
        }
    }
}
