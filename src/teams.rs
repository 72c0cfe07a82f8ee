use octocrab::Octocrab;
use serde::Deserialize;
use tracing::info;

use crate::error::PolicyError;
use crate::github;

/// An organization team as returned by the teams API.
#[derive(Deserialize, Debug, Clone)]
pub struct OrgTeam {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Deserialize, Debug)]
struct TeamMembership {
    state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Added { state: String },
    AlreadyMember { state: String },
}

/// Slug GitHub generates for a team name.
pub fn slugify(team_name: &str) -> String {
    team_name.to_lowercase().replace(' ', "-")
}

/// Looks a team up by its display name.
pub async fn team_by_name(client: &Octocrab, org: &str, team_name: &str) -> Result<OrgTeam, PolicyError> {
    let slug = slugify(team_name);
    github::get_optional(client, &format!("/orgs/{org}/teams/{slug}"))
        .await?
        .ok_or_else(|| PolicyError::TeamNotFound {
            team: team_name.to_string(),
            org: org.to_string(),
        })
}

/// Adds `login` to `team` as a member unless they already belong to it.
pub async fn add_member(
    client: &Octocrab,
    org: &str,
    team: &OrgTeam,
    login: &str,
) -> Result<MembershipChange, PolicyError> {
    let route = format!("/orgs/{org}/teams/{}/memberships/{login}", team.slug);
    if let Some(membership) = github::get_optional::<TeamMembership>(client, &route).await? {
        info!("User {login} is already a member of {}", team.name);
        return Ok(MembershipChange::AlreadyMember {
            state: membership.state,
        });
    }

    let body = serde_json::json!({ "role": "member" });
    let membership: TeamMembership = client.put(&route, Some(&body)).await?;
    info!("User {login} added to {}", team.name);
    Ok(MembershipChange::Added {
        state: membership.state,
    })
}
