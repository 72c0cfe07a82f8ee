//! Account checks a user has to pass before joining organization teams.

use octocrab::Octocrab;
use serde::Deserialize;
use tracing::info;

use crate::error::PolicyError;
use crate::github::{self, find_external_identity};

/// Public profile fields the policy checks look at.
#[derive(Deserialize, Debug, Clone)]
pub struct GitHubUser {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OrgMembership {
    role: String,
    state: String,
}

/// A user that passed every policy check.
#[derive(Debug, Clone)]
pub struct ValidatedUser {
    pub login: String,
    pub email: String,
    pub org_role: String,
}

/// Domain part of an email address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_ascii_lowercase())
    }
}

/// Checks the public profile: email present, name present, email in an
/// allowed domain. Returns the conformant email.
pub fn check_profile<'a>(user: &'a GitHubUser, domains: &[String]) -> Result<&'a str, PolicyError> {
    let Some(email) = user.email.as_deref().filter(|email| !email.is_empty()) else {
        return Err(PolicyError::NoPublicEmail {
            login: user.login.clone(),
        });
    };
    if user.name.as_deref().map_or(true, str::is_empty) {
        return Err(PolicyError::NoPublicName {
            login: user.login.clone(),
        });
    }
    let conformant = email_domain(email)
        .map(|domain| domains.iter().any(|allowed| allowed.eq_ignore_ascii_case(&domain)))
        .unwrap_or(false);
    if !conformant {
        return Err(PolicyError::NonConformantEmail {
            login: user.login.clone(),
            email: email.to_string(),
        });
    }
    Ok(email)
}

/// Turns an email address into a login through the organization's SAML
/// identities. Anything without an `@` is already a login.
pub async fn resolve_login(client: &Octocrab, org: &str, entity: &str) -> Result<String, PolicyError> {
    if !entity.contains('@') {
        return Ok(entity.to_string());
    }
    let identity = find_external_identity(client, org, |identity| {
        identity
            .name_id()
            .map_or(false, |name_id| name_id.eq_ignore_ascii_case(entity))
    })
    .await?;
    match identity.as_ref().and_then(|identity| identity.login()) {
        Some(login) => {
            info!("Resolved email {entity} to user {login}");
            Ok(login.to_string())
        }
        None => Err(PolicyError::UnresolvedEmail {
            email: entity.to_string(),
            org: org.to_string(),
        }),
    }
}

pub async fn get_user(client: &Octocrab, login: &str) -> Result<GitHubUser, PolicyError> {
    github::get_optional(client, &format!("/users/{login}"))
        .await?
        .ok_or_else(|| PolicyError::UserNotFound {
            login: login.to_string(),
        })
}

/// Returns the user's role in `org`.
pub async fn org_role(client: &Octocrab, org: &str, login: &str) -> Result<String, PolicyError> {
    let membership: OrgMembership =
        github::get_optional(client, &format!("/orgs/{org}/memberships/{login}"))
            .await?
            .ok_or_else(|| PolicyError::NotOrgMember {
                login: login.to_string(),
                org: org.to_string(),
            })?;
    if membership.state != "active" {
        info!("Membership of {login} in {org} is {}", membership.state);
    }
    Ok(membership.role)
}

pub async fn is_sso_linked(client: &Octocrab, org: &str, login: &str) -> Result<bool, PolicyError> {
    let identity = find_external_identity(client, org, |identity| identity.login() == Some(login)).await?;
    Ok(identity.is_some())
}

/// Runs every account check in order and stops at the first failure.
pub async fn validate_user(
    client: &Octocrab,
    org: &str,
    entity: &str,
    domains: &[String],
) -> Result<ValidatedUser, PolicyError> {
    let login = resolve_login(client, org, entity).await?;
    let user = get_user(client, &login).await?;
    let email = check_profile(&user, domains)?.to_string();
    info!("Validated Pre-requisites for {} GitHub Email: {email}", user.login);

    let org_role = org_role(client, org, &user.login).await?;
    info!("User {} is a {org_role} of {org}", user.login);

    if !is_sso_linked(client, org, &user.login).await? {
        return Err(PolicyError::NotSsoLinked {
            login: user.login,
            org: org.to_string(),
        });
    }

    Ok(ValidatedUser {
        login: user.login,
        email,
        org_role,
    })
}
