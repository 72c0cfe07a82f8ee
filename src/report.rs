//! Human-readable renderings of analysis and audit results.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::analysis::AnalysisResult;
use crate::collaborators::{AddedSource, AdminGrant, CollaboratorAudit, GrantOutcome};
use crate::Team;

fn write_team(out: &mut String, index: usize, team: &Team) {
    let _ = writeln!(out, "{}. Team: {}", index + 1, team.name);
    let _ = writeln!(out, "   Slug: {}", team.slug);
    if let Some(description) = &team.description {
        let _ = writeln!(out, "   Description: {description}");
    }
    let _ = writeln!(out, "   Access Level: {}", team.access);
    let _ = writeln!(out, "   URL: {}", team.url);
}

pub fn render_analysis(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let total = result.effective_total();

    if !result.failures.is_empty() {
        let _ = writeln!(
            out,
            "⚠️  Could not get teams for {} of {} repositories:",
            result.failures.len(),
            result.requested()
        );
        for failure in &result.failures {
            let _ = writeln!(out, "   - {}: {}", failure.repository, failure.error);
        }
        let _ = writeln!(
            out,
            "   Coverage below is based on the {total} repositories that could be read: {}\n",
            result.repositories.join(", ")
        );
    }

    if result.exact_matches.is_empty() {
        let _ = writeln!(out, "🎯 EXACT MATCHES: No teams found with access to ALL repositories.\n");
    } else {
        let _ = writeln!(out, "🎯 EXACT MATCHES - Teams with access to ALL {total} repositories:\n");
        for (index, team) in result.exact_matches.iter().enumerate() {
            write_team(&mut out, index, team);
            let _ = writeln!(out, "   Coverage: 100% ({total}/{total} repositories)\n");
        }
    }

    if result.close_matches.is_empty() {
        let _ = writeln!(
            out,
            "🔍 CLOSE MATCHES: No teams found with access to more than half of the repositories.\n"
        );
    } else {
        let _ = writeln!(
            out,
            "🔍 CLOSE MATCHES - Teams with access to more than half of the repositories:\n"
        );
        for (index, close) in result.close_matches.iter().enumerate() {
            write_team(&mut out, index, &close.team);
            let _ = writeln!(
                out,
                "   Coverage: {:.1}% ({}/{total} repositories)",
                close.access_percent, close.access_count
            );
            let _ = writeln!(out, "   Missing access to: {}\n", close.missing_repos.join(", "));
        }
    }

    if result.exact_matches.is_empty() && result.close_matches.is_empty() {
        let _ = writeln!(out, "📊 SUMMARY: No teams found with significant access coverage.");
        let _ = writeln!(
            out,
            "To find teams with access to individual repositories, use `repo-teams` with each repository name."
        );
    } else {
        let _ = writeln!(
            out,
            "📊 SUMMARY: Found {} exact matches and {} close matches.",
            result.exact_matches.len(),
            result.close_matches.len()
        );
    }
    out
}

pub fn render_repo_teams(org: &str, repo: &str, teams: &[Team]) -> String {
    let mut out = String::new();
    if teams.is_empty() {
        let _ = writeln!(out, "No teams have access to {org}/{repo}");
        return out;
    }
    let _ = writeln!(out, "Teams with access to {org}/{repo}:\n");
    for (index, team) in teams.iter().enumerate() {
        write_team(&mut out, index, team);
        out.push('\n');
    }
    out
}

pub fn render_collaborators(
    org: &str,
    repo: &str,
    audits: &[CollaboratorAudit],
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    if audits.is_empty() {
        let _ = writeln!(out, "📋 No direct collaborators found for repository {org}/{repo}");
        let _ = writeln!(out, "   (Note: Team members are not included in this list)");
        return out;
    }

    let _ = writeln!(out, "📋 Collaborators for repository {org}/{repo}:\n");
    for (index, audit) in audits.iter().enumerate() {
        let _ = writeln!(out, "{}. 👤 User: {}", index + 1, audit.login);
        let permissions = audit.permissions.names();
        if !permissions.is_empty() {
            let _ = writeln!(out, "   🔐 Permissions: {}", permissions.join(", "));
        }
        if let Some(level) = &audit.access_level {
            let _ = writeln!(out, "   📊 Access Level: {level}");
        }
        match audit.added {
            Some(added) => {
                let _ = writeln!(
                    out,
                    "   📅 Added: {} ({:.1} hours ago)",
                    added.at.format("%Y-%m-%d %H:%M:%S"),
                    added.hours_ago(now)
                );
                if added.source == AddedSource::Invitation {
                    let _ = writeln!(out, "   ℹ️  Status: Invitation pending");
                }
                if audit.permissions.admin && added.is_stale(now) {
                    let _ = writeln!(
                        out,
                        "   ⚠️  WARNING: Admin access granted >24 hours ago - consider reviewing"
                    );
                }
            }
            None => {
                let _ = writeln!(out, "   📅 Added: Unknown (not found in recent events)");
            }
        }
        if let Some(profile) = &audit.profile {
            let _ = writeln!(out, "   🔗 Profile: {profile}");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "📊 Total: {} direct collaborator(s)", audits.len());
    out
}

pub fn render_admin_grant(
    org: &str,
    repo: &str,
    login: &str,
    grant: &AdminGrant,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    for admin in &grant.other_admins {
        match admin.added {
            Some(added) if added.is_stale(now) => {
                let _ = writeln!(
                    out,
                    "⚠️  WARNING: User {} has admin access and was added {:.1} hours ago (>24h) - should be removed",
                    admin.login,
                    added.hours_ago(now)
                );
            }
            Some(added) => {
                let _ = writeln!(
                    out,
                    "⚠️  WARNING: User {} already has admin access (added {:.1} hours ago)",
                    admin.login,
                    added.hours_ago(now)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "⚠️  WARNING: User {} has admin access (added date unknown) - consider reviewing",
                    admin.login
                );
            }
        }
    }

    match &grant.outcome {
        GrantOutcome::AlreadyAdmin { added, level } => {
            if let Some(level) = level {
                let _ = writeln!(out, "ℹ️  User {login} has {level} access to repository {org}/{repo}");
            }
            match added {
                Some(added) if !added.is_stale(now) => {
                    let _ = writeln!(
                        out,
                        "⚠️  WARNING: User {login} already has admin access (added {:.1} hours ago)",
                        added.hours_ago(now)
                    );
                }
                _ => {
                    let _ = writeln!(out, "ℹ️  User {login} already has admin access to this repository");
                }
            }
        }
        GrantOutcome::Invited => {
            let _ = writeln!(
                out,
                "✅ Successfully sent admin collaboration invitation to user {login} for repository {org}/{repo}"
            );
        }
        GrantOutcome::AlreadyHadAccess => {
            let _ = writeln!(out, "✅ User {login} already had admin access to repository {org}/{repo}");
        }
        GrantOutcome::Updated => {
            let _ = writeln!(out, "✅ Updated permissions for user {login} on repository {org}/{repo}");
        }
    }

    if grant.has_stale_admin(now) {
        let _ = writeln!(
            out,
            "\n💡 TIP: Consider removing admin users that were added more than 24 hours ago"
        );
    }
    out
}
