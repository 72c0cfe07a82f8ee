use async_trait::async_trait;
use octocrab::{FromResponse, Octocrab, Page};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::analysis::RepositoryTeamsFetcher;
use crate::error::{FetchError, PolicyError};
use crate::{AccessLevel, Team};

const PER_PAGE: u8 = 100;
const NOT_FOUND: u16 = 404;
const FORBIDDEN: u16 = 403;

pub fn client(token: &str) -> anyhow::Result<Octocrab> {
    let client = octocrab::OctocrabBuilder::new()
        .personal_token(token.to_string())
        .build()?;
    Ok(client)
}

pub fn team_url(org: &str, slug: &str) -> String {
    format!("https://github.com/orgs/{org}/teams/{slug}")
}

/// Error hook for requests that only care about the generic API error.
pub(crate) fn unmapped<E>(_status: u16) -> Option<E> {
    None
}

/// GETs `route`, giving `on_status` the first look at an unsuccessful
/// response status before it is turned into an API error.
pub(crate) async fn get_checked<R, E, F>(client: &Octocrab, route: &str, on_status: F) -> Result<R, E>
where
    R: FromResponse,
    E: From<octocrab::Error>,
    F: Fn(u16) -> Option<E>,
{
    let response = client._get(route).await?;
    if !response.status().is_success() {
        if let Some(error) = on_status(response.status().as_u16()) {
            return Err(error);
        }
    }
    let response = octocrab::map_github_error(response).await?;
    Ok(R::from_response(response).await?)
}

/// GETs `route`; a 404 yields `None`.
pub(crate) async fn get_optional<R: FromResponse>(
    client: &Octocrab,
    route: &str,
) -> octocrab::Result<Option<R>> {
    let response = client._get(route).await?;
    if response.status().as_u16() == NOT_FOUND {
        return Ok(None);
    }
    let response = octocrab::map_github_error(response).await?;
    R::from_response(response).await.map(Some)
}

fn page_route(route: &str, page: u32, affiliation: Option<&str>) -> String {
    let mut route = format!("{route}?per_page={PER_PAGE}&page={page}");
    if let Some(affiliation) = affiliation {
        route.push_str("&affiliation=");
        route.push_str(affiliation);
    }
    route
}

/// Collects every page of a REST list endpoint, following the `next` link.
pub(crate) async fn list_all<T, E, F>(
    client: &Octocrab,
    route: &str,
    affiliation: Option<&str>,
    on_status: F,
) -> Result<Vec<T>, E>
where
    T: DeserializeOwned,
    E: From<octocrab::Error>,
    F: Fn(u16) -> Option<E>,
{
    let mut items = vec![];
    let mut page = 1u32;
    loop {
        let mut response: Page<T> =
            get_checked(client, &page_route(route, page, affiliation), &on_status).await?;
        items.extend(response.take_items());
        if response.next.is_none() {
            break;
        } else {
            page += 1;
        }
    }
    Ok(items)
}

/// Fetches only the first page of a REST list endpoint, for feeds such as
/// repository events where older entries are not needed.
pub(crate) async fn first_page<T: DeserializeOwned>(
    client: &Octocrab,
    route: &str,
) -> octocrab::Result<Vec<T>> {
    let route = page_route(route, 1, None);
    let mut response: Page<T> = get_checked(client, &route, unmapped::<octocrab::Error>).await?;
    Ok(response.take_items())
}

#[derive(Deserialize)]
struct RepoTeam {
    name: String,
    slug: String,
    description: Option<String>,
    permission: String,
}

/// Fetches repository team grants from the GitHub REST API.
#[derive(Clone)]
pub struct GitHubTeamsFetcher {
    client: Octocrab,
    org: String,
}

impl GitHubTeamsFetcher {
    pub fn new(client: Octocrab, org: impl Into<String>) -> Self {
        Self {
            client,
            org: org.into(),
        }
    }
}

fn repo_status_error(repo: &str, status: u16) -> Option<FetchError> {
    let repo = repo.to_string();
    match status {
        NOT_FOUND => Some(FetchError::NotFound { repo }),
        FORBIDDEN => Some(FetchError::AccessDenied { repo }),
        _ => None,
    }
}

#[async_trait]
impl RepositoryTeamsFetcher for GitHubTeamsFetcher {
    async fn fetch_teams(&self, repo: &str) -> Result<Vec<Team>, FetchError> {
        let on_status = |status: u16| repo_status_error(repo, status);

        // Check the repo exists
        let route = format!("/repos/{}/{}", self.org, repo);
        get_checked::<serde_json::Value, _, _>(&self.client, &route, on_status).await?;

        let records: Vec<RepoTeam> =
            list_all(&self.client, &format!("{route}/teams"), None, on_status).await?;
        debug!("Fetched {} teams for {}/{}", records.len(), self.org, repo);

        Ok(records
            .into_iter()
            .map(|team| Team {
                url: team_url(&self.org, &team.slug),
                access: AccessLevel::from(team.permission),
                name: team.name,
                slug: team.slug,
                description: team.description.filter(|d| !d.is_empty()),
            })
            .collect())
    }
}

const EXTERNAL_IDENTITIES: &str = r#"query($login: String!, $cursor: String) {
  organization(login: $login) {
    samlIdentityProvider {
      externalIdentities(first: 100, after: $cursor) {
        nodes {
          guid
          user { login }
          samlIdentity { nameId }
        }
        pageInfo { endCursor hasNextPage }
      }
    }
  }
}"#;

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationData {
    organization: Option<Organization>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organization {
    saml_identity_provider: Option<IdentityProvider>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityProvider {
    external_identities: ExternalIdentities,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalIdentities {
    nodes: Vec<ExternalIdentity>,
    page_info: PageInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

/// A SAML identity linked to the organization.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub guid: String,
    pub user: Option<Login>,
    pub saml_identity: Option<SamlIdentity>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Login {
    pub login: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SamlIdentity {
    pub name_id: Option<String>,
}

impl ExternalIdentity {
    pub fn login(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.login.as_str())
    }

    pub fn name_id(&self) -> Option<&str> {
        self.saml_identity
            .as_ref()
            .and_then(|identity| identity.name_id.as_deref())
    }
}

/// Walks the organization's SAML identities until `matches` accepts one.
///
/// Organizations without a SAML provider have no identities.
pub async fn find_external_identity<P>(
    client: &Octocrab,
    org: &str,
    matches: P,
) -> Result<Option<ExternalIdentity>, PolicyError>
where
    P: Fn(&ExternalIdentity) -> bool,
{
    let mut cursor: Option<String> = None;
    loop {
        let request = serde_json::json!({
            "query": EXTERNAL_IDENTITIES,
            "variables": { "login": org, "cursor": cursor },
        });
        let response: GraphQlResponse<OrganizationData> = client.graphql(&request).await?;
        if let Some(error) = response.errors.into_iter().next() {
            return Err(PolicyError::GraphQl(error.message));
        }
        let Some(provider) = response
            .data
            .and_then(|data| data.organization)
            .and_then(|org| org.saml_identity_provider)
        else {
            return Ok(None);
        };

        let identities = provider.external_identities;
        if let Some(found) = identities.nodes.into_iter().find(|node| matches(node)) {
            return Ok(Some(found));
        }
        if !identities.page_info.has_next_page {
            return Ok(None);
        }
        cursor = identities.page_info.end_cursor;
    }
}
