//! Completion backend implementations.
//!
//! | Provider | Module |
//! |----------|--------|
//! | Anthropic | [`anthropic`] |
//! | Static / scripted | [`canned`] |

pub mod anthropic;
pub mod canned;
