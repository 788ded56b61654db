//! HTTP route handlers outside the auth endpoints.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document; auth routes live in [`crate::auth::routes`].

pub mod accounts;
pub mod health;
