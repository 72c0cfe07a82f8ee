//! Direct repository collaborators and how long they have held access.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use octocrab::Octocrab;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::PolicyError;
use crate::github::{first_page, list_all, unmapped};

/// Admin grants older than this should be reviewed.
pub const STALE_AFTER_HOURS: i64 = 24;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CollaboratorPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub triage: bool,
    #[serde(default)]
    pub pull: bool,
}

impl CollaboratorPermissions {
    /// Granted permissions, most privileged first.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.admin, "admin"),
            (self.maintain, "maintain"),
            (self.push, "push"),
            (self.triage, "triage"),
            (self.pull, "pull"),
        ]
        .into_iter()
        .filter_map(|(granted, name)| granted.then_some(name))
        .collect()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Collaborator {
    pub login: String,
    pub html_url: Option<String>,
    #[serde(default)]
    pub permissions: CollaboratorPermissions,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Account {
    pub login: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Invitation {
    pub invitee: Option<Account>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RepoEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RepoEvent {
    /// Login of the member added by a `MemberEvent`.
    fn added_member(&self) -> Option<&str> {
        if self.kind != "MemberEvent" {
            return None;
        }
        if self.payload.get("action").and_then(|action| action.as_str()) != Some("added") {
            return None;
        }
        self.payload
            .get("member")
            .and_then(|member| member.get("login"))
            .and_then(|login| login.as_str())
    }
}

#[derive(Deserialize, Debug)]
struct PermissionLevel {
    permission: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddedSource {
    /// The invitation has not been accepted yet.
    Invitation,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub at: DateTime<Utc>,
    pub source: AddedSource,
}

impl Added {
    pub fn hours_ago(&self, now: DateTime<Utc>) -> f64 {
        (now - self.at).num_seconds() as f64 / 3600.0
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.at > Duration::hours(STALE_AFTER_HOURS)
    }
}

/// When each login was granted access, as far as the API still remembers.
#[derive(Debug, Default)]
pub struct GrantHistory {
    invitations: HashMap<String, DateTime<Utc>>,
    member_events: HashMap<String, DateTime<Utc>>,
}

impl GrantHistory {
    pub fn new(invitations: &[Invitation], events: &[RepoEvent]) -> Self {
        let mut history = GrantHistory::default();
        for invitation in invitations {
            if let Some(invitee) = &invitation.invitee {
                history
                    .invitations
                    .entry(invitee.login.clone())
                    .or_insert(invitation.created_at);
            }
        }
        for event in events {
            if let Some(login) = event.added_member() {
                history
                    .member_events
                    .entry(login.to_string())
                    .or_insert(event.created_at);
            }
        }
        history
    }

    /// Pending invitations take precedence over member events.
    pub fn added(&self, login: &str) -> Option<Added> {
        if let Some(at) = self.invitations.get(login) {
            return Some(Added {
                at: *at,
                source: AddedSource::Invitation,
            });
        }
        self.member_events.get(login).map(|at| Added {
            at: *at,
            source: AddedSource::Event,
        })
    }

    async fn fetch(client: &Octocrab, org: &str, repo: &str) -> Self {
        let route = format!("/repos/{org}/{repo}/invitations");
        let invitations: Vec<Invitation> = list_all(client, &route, None, unmapped::<octocrab::Error>)
            .await
            .unwrap_or_else(|error| {
                debug!("Unable to list invitations for {org}/{repo}: {error}");
                vec![]
            });
        let events: Vec<RepoEvent> = first_page(client, &format!("/repos/{org}/{repo}/events"))
            .await
            .unwrap_or_else(|error| {
                debug!("Unable to list events for {org}/{repo}: {error}");
                vec![]
            });
        GrantHistory::new(&invitations, &events)
    }
}

#[derive(Debug, Clone)]
pub struct CollaboratorAudit {
    pub login: String,
    pub permissions: CollaboratorPermissions,
    pub access_level: Option<String>,
    pub added: Option<Added>,
    pub profile: Option<String>,
}

async fn direct_collaborators(
    client: &Octocrab,
    org: &str,
    repo: &str,
) -> Result<Vec<Collaborator>, PolicyError> {
    let route = format!("/repos/{org}/{repo}/collaborators");
    list_all(client, &route, Some("direct"), |status| {
        (status == 404).then(|| PolicyError::RepositoryNotFound {
            repo: repo.to_string(),
            org: org.to_string(),
        })
    })
    .await
}

async fn permission_level(client: &Octocrab, org: &str, repo: &str, login: &str) -> Option<String> {
    let route = format!("/repos/{org}/{repo}/collaborators/{login}/permission");
    match client.get::<PermissionLevel, _, _>(route, None::<&()>).await {
        Ok(level) => Some(level.permission),
        Err(error) => {
            debug!("Unable to read permission level of {login} on {org}/{repo}: {error}");
            None
        }
    }
}

/// Lists direct collaborators of a repository. Team members are not included.
pub async fn audit_collaborators(
    client: &Octocrab,
    org: &str,
    repo: &str,
) -> Result<Vec<CollaboratorAudit>, PolicyError> {
    info!("Fetching collaborators for repository {org}/{repo}");
    let collaborators = direct_collaborators(client, org, repo).await?;
    if collaborators.is_empty() {
        return Ok(vec![]);
    }

    let history = GrantHistory::fetch(client, org, repo).await;
    let mut audits = Vec::with_capacity(collaborators.len());
    for collaborator in collaborators {
        audits.push(CollaboratorAudit {
            access_level: permission_level(client, org, repo, &collaborator.login).await,
            added: history.added(&collaborator.login),
            login: collaborator.login,
            permissions: collaborator.permissions,
            profile: collaborator.html_url,
        });
    }
    Ok(audits)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingAdmin {
    pub login: String,
    pub added: Option<Added>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The user was already a direct admin; nothing was changed.
    AlreadyAdmin {
        added: Option<Added>,
        level: Option<String>,
    },
    Invited,
    AlreadyHadAccess,
    Updated,
}

#[derive(Debug, Clone)]
pub struct AdminGrant {
    pub outcome: GrantOutcome,
    /// Other direct admins found on the repository.
    pub other_admins: Vec<ExistingAdmin>,
}

impl AdminGrant {
    pub fn has_stale_admin(&self, now: DateTime<Utc>) -> bool {
        self.other_admins
            .iter()
            .any(|admin| admin.added.map_or(false, |added| added.is_stale(now)))
    }
}

/// Adds `login` as a direct admin collaborator, reporting the admins that
/// already hold the role.
pub async fn add_admin(
    client: &Octocrab,
    org: &str,
    repo: &str,
    login: &str,
) -> Result<AdminGrant, PolicyError> {
    info!("Checking existing collaborators for repository {org}/{repo}");
    let collaborators = direct_collaborators(client, org, repo).await?;
    let history = GrantHistory::fetch(client, org, repo).await;

    let mut target_is_admin = false;
    let mut other_admins = vec![];
    for collaborator in collaborators.iter().filter(|c| c.permissions.admin) {
        if collaborator.login == login {
            target_is_admin = true;
        } else {
            info!("Found existing admin collaborator: {}", collaborator.login);
            other_admins.push(ExistingAdmin {
                login: collaborator.login.clone(),
                added: history.added(&collaborator.login),
            });
        }
    }

    if target_is_admin {
        return Ok(AdminGrant {
            outcome: GrantOutcome::AlreadyAdmin {
                added: history.added(login),
                level: permission_level(client, org, repo, login).await,
            },
            other_admins,
        });
    }

    info!("Adding user {login} as admin collaborator to repository {org}/{repo}");
    let route = format!("/repos/{org}/{repo}/collaborators/{login}");
    let body = serde_json::json!({ "permission": "admin" });
    let response = client._put(route.as_str(), Some(&body)).await?;
    let response = octocrab::map_github_error(response).await?;
    let outcome = match response.status().as_u16() {
        201 => GrantOutcome::Invited,
        204 => GrantOutcome::AlreadyHadAccess,
        _ => GrantOutcome::Updated,
    };

    Ok(AdminGrant {
        outcome,
        other_admins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn member_event(login: &str, action: &str, created_at: DateTime<Utc>) -> RepoEvent {
        RepoEvent {
            kind: "MemberEvent".to_string(),
            created_at,
            payload: serde_json::json!({ "action": action, "member": { "login": login } }),
        }
    }

    #[test]
    fn permission_names_are_ordered_by_privilege() {
        let permissions = CollaboratorPermissions {
            admin: true,
            maintain: false,
            push: true,
            triage: true,
            pull: true,
        };
        assert_eq!(permissions.names(), vec!["admin", "push", "triage", "pull"]);
        assert!(CollaboratorPermissions::default().names().is_empty());
    }

    #[test]
    fn invitation_takes_precedence_over_events() {
        let invitations = vec![Invitation {
            invitee: Some(Account {
                login: "octocat".to_string(),
            }),
            created_at: at(10),
        }];
        let events = vec![member_event("octocat", "added", at(2))];
        let history = GrantHistory::new(&invitations, &events);

        let added = history.added("octocat").unwrap();
        assert_eq!(added.source, AddedSource::Invitation);
        assert_eq!(added.at, at(10));
    }

    #[test]
    fn only_added_member_events_count() {
        let events = vec![
            member_event("hubot", "removed", at(9)),
            member_event("hubot", "added", at(5)),
            member_event("hubot", "added", at(1)),
            RepoEvent {
                kind: "PushEvent".to_string(),
                created_at: at(8),
                payload: serde_json::json!({ "member": { "login": "monalisa" } }),
            },
        ];
        let history = GrantHistory::new(&[], &events);

        assert_eq!(
            history.added("hubot"),
            Some(Added {
                at: at(5),
                source: AddedSource::Event,
            })
        );
        assert_eq!(history.added("monalisa"), None);
    }

    #[test]
    fn grants_older_than_a_day_are_stale() {
        let added = Added {
            at: at(0),
            source: AddedSource::Event,
        };
        assert!(!added.is_stale(at(23)));
        assert!(added.is_stale(at(0) + Duration::hours(25)));
        assert_eq!(added.hours_ago(at(12)), 12.0);
    }

    #[test]
    fn collaborator_without_permissions_decodes() {
        let collaborator: Collaborator = serde_json::from_value(serde_json::json!({
            "login": "octocat",
            "id": 1,
            "html_url": "https://github.com/octocat"
        }))
        .unwrap();
        assert_eq!(collaborator.permissions, CollaboratorPermissions::default());
    }

    #[test]
    fn stale_admin_detection_ignores_unknown_dates() {
        let now = at(0) + Duration::hours(48);
        let grant = AdminGrant {
            outcome: GrantOutcome::Invited,
            other_admins: vec![ExistingAdmin {
                login: "hubot".to_string(),
                added: None,
            }],
        };
        assert!(!grant.has_stale_admin(now));

        let grant = AdminGrant {
            other_admins: vec![ExistingAdmin {
                login: "hubot".to_string(),
                added: Some(Added {
                    at: at(0),
                    source: AddedSource::Event,
                }),
            }],
            ..grant
        };
        assert!(grant.has_stale_admin(now));
    }
}
