//! Span names and operation values for control-plane instrumentation.
//!
//! Spans carry these fields (tracing field names are literal, so they are
//! listed here rather than exported as constants):
//!
//! - `conductor.operation`: one of the `OP_*` values below
//! - `conductor.route.path` / `conductor.route.method`: the routed request
//! - `conductor.user.id`: calling user, or `"anonymous"`
//! - `conductor.agent.id` / `conductor.agent.type`: the selected agent

/// Span emitted around a full bring-up of systems and configured agents.
pub const SPAN_BRING_UP: &str = "conductor.bring_up";

/// Span emitted around a route-and-dispatch of one request.
pub const SPAN_DISPATCH: &str = "conductor.dispatch";

/// Span emitted around the long-running serve loop.
pub const SPAN_SERVE: &str = "conductor.serve";

pub const OP_BRING_UP: &str = "bring_up";

pub const OP_ROUTE: &str = "route";

pub const OP_DISPATCH: &str = "dispatch";

pub const OP_SERVE: &str = "serve";

/// Label recorded for `conductor.user.id` when the request has no user.
pub fn user_label(user_id: Option<&str>) -> &str {
    user_id.unwrap_or("anonymous")
}
