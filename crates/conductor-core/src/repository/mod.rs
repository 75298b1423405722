//! Port traits implemented by conductor-infra.

pub mod secret;
