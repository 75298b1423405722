//! `cndr route`: push one request through the policy router, optionally
//! dispatching it to the bound worker.

use anyhow::{Context, Result};
use console::style;
use tracing::{Instrument, info_span};

use conductor_observe::span_attrs::{OP_DISPATCH, OP_ROUTE, SPAN_DISPATCH, user_label};
use conductor_types::policy::RouteRequest;

use crate::state::AppState;

/// Route `method path` for `user`. The plane is brought up first so the
/// configured agents exist.
///
/// With a payload the request is dispatched and the worker's reply printed;
/// without one only the routing decision is shown.
pub async fn route(
    state: &AppState,
    path: &str,
    method: &str,
    user: Option<&str>,
    payload: Option<&str>,
    json: bool,
) -> Result<()> {
    state.plane.bring_up().context("bring-up failed")?;
    let request = RouteRequest::new(path, method, user);

    let Some(payload) = payload else {
        let span = info_span!(
            SPAN_DISPATCH,
            conductor.operation = OP_ROUTE,
            conductor.route.path = %request.path,
            conductor.route.method = %request.method,
            conductor.user.id = user_label(user),
        );
        let decision = span.in_scope(|| state.plane.router().route(&request))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&decision)?);
        } else {
            println!();
            println!(
                "  {} {} {} -> {}",
                style("ok").green(),
                style(&decision.method).bold(),
                decision.path,
                style(&decision.agent_id).cyan(),
            );
            println!();
        }
        return Ok(());
    };

    // Parse as JSON, fallback to string
    let payload: serde_json::Value = serde_json::from_str(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

    let span = info_span!(
        SPAN_DISPATCH,
        conductor.operation = OP_DISPATCH,
        conductor.route.path = %request.path,
        conductor.route.method = %request.method,
        conductor.user.id = user_label(user),
    );
    let reply = state
        .plane
        .dispatch(&request, payload)
        .instrument(span)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        println!();
        println!("  {} Worker reply", style("ok").green());
        println!("{}", serde_json::to_string_pretty(&reply)?);
        println!();
    }
    Ok(())
}
