//! HTTP administration surface for the skill runtime.
//!
//! Thin adapters over [`SkillEngine`](crate::skills::SkillEngine) and its
//! stores.
//!
//! # Endpoints
//!
//! - `GET    /health`               - Liveness probe
//! - `GET    /skills`               - List skills
//! - `GET    /skills/:name`         - Fetch one definition (`?version=`)
//! - `POST   /skills/:name/invoke`  - Invoke a skill
//! - `POST   /skills/reload`        - Reload definitions from the store
//! - `GET    /invocations`          - Audit history (`org_id`, `skill`, `limit`, `offset`)
//! - `GET    /bindings`             - Bindings of an org (`org_id`)
//! - `POST   /bindings`             - Create or replace a binding
//! - `DELETE /bindings/:id`         - Delete a binding
//! - `GET    /stats`                - Usage rollup (`org_id`, `window_hours`)

pub mod routes;

pub use routes::{app_router, AppState};
