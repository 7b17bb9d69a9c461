// Pathwise - predictive backend routing engine
// Library exports

pub mod config;
pub mod engine; // Composition root and background monitoring
pub mod errors;
pub mod experiments; // A/B tests between backend/model arms
pub mod features;
pub mod feedback; // Outcome learning
pub mod logging;
pub mod metrics;
pub mod performance;
pub mod providers;
pub mod router;

pub use config::{load_config, EngineConfig};
pub use engine::{Engine, Insights};
pub use errors::{EngineError, EngineResult};
pub use feedback::ActualOutcome;
pub use providers::{CompletionRequest, Message, Role, ToolDefinition};
pub use router::{Decision, Objective, PredictionResult, RoutingConstraints};
