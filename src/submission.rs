//! The submission processing pipeline: per-submission context, the ordered
//! validation stages, and the finalizer that commits the outcome.

pub mod context;
pub mod dynamic;
pub mod extract;
pub mod finalizer;
pub mod formula;
pub mod header;
pub mod metadata;
pub mod processor;
pub mod schema;
pub mod stage;
pub mod templates;
