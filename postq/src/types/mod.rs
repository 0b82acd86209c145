//! Type integration with external types
//!
//! Implementation [`Decode`][d] for external types.
//!
//! Available for:
//!
//! - [`serde`]'s [`Deserialize`][sd] via [`Json`] and [`serde_json::Value`], requires `json` feature
//!
//! [d]: crate::Decode
//! [sd]: serde::Deserialize

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "json")]
pub use json::Json;
