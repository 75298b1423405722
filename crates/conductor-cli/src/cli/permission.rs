//! `cndr check-permission`: evaluate RBAC for one user.

use anyhow::{Result, anyhow};
use console::style;

use conductor_types::policy::Permission;

use crate::state::AppState;

pub fn check_permission(
    state: &AppState,
    user: &str,
    resource: &str,
    permission: &str,
    json: bool,
) -> Result<bool> {
    let permission: Permission = permission.parse().map_err(|e: String| anyhow!(e))?;
    let policies = state.plane.router().policies();
    let allowed = policies.check_permission(user, resource, permission);
    let roles = policies.roles_for(user);

    if json {
        let result = serde_json::json!({
            "user": user,
            "resource": resource,
            "permission": permission.to_string(),
            "roles": roles,
            "allowed": allowed,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(allowed);
    }

    let verdict = if allowed {
        style("allowed").green().bold()
    } else {
        style("denied").red().bold()
    };
    println!();
    println!(
        "  {} {} {} on '{}'",
        style(user).cyan(),
        verdict,
        style(permission).bold(),
        resource,
    );
    if roles.is_empty() {
        println!("  Roles: {}", style("none").dim());
    } else {
        println!("  Roles: {}", roles.join(", "));
    }
    println!();
    Ok(allowed)
}
