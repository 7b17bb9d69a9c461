// Backend-facing types
//
// The engine does not talk to any backend itself. This module holds the
// normalized request it routes and the catalog of backends and models it
// can route to.

pub mod catalog;
pub mod types;

pub use catalog::{BackendProfile, ModelCatalog, ModelProfile, ProfileEstimate, GENERIC_MODEL};
pub use types::{CompletionRequest, Message, Role, ToolDefinition};
