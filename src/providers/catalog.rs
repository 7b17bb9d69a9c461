// Backend catalog - known models per backend and their baseline profiles
//
// The router never has to know every backend in advance: unknown backends
// get a generic profile and a single model named "default".

use serde::{Deserialize, Serialize};

/// Model name used for backends missing from the catalog
pub const GENERIC_MODEL: &str = "default";

/// Per-model adjustment relative to its backend's base profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub cost_factor: f64,
    pub latency_factor: f64,
    pub quality_factor: f64,
}

impl ModelProfile {
    pub fn new(name: &str, cost_factor: f64, latency_factor: f64, quality_factor: f64) -> Self {
        Self {
            name: name.to_string(),
            cost_factor,
            latency_factor,
            quality_factor,
        }
    }
}

/// Base cost, latency and quality of a backend plus its models
///
/// The first model listed is the backend's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub name: String,
    /// Dollars per request
    pub base_cost: f64,
    pub base_latency_ms: f64,
    pub base_quality: f64,
    pub models: Vec<ModelProfile>,
}

impl BackendProfile {
    pub fn default_model(&self) -> &str {
        self.models
            .first()
            .map(|m| m.name.as_str())
            .unwrap_or(GENERIC_MODEL)
    }
}

/// Fixed (cost, latency, quality) estimate for one backend/model pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileEstimate {
    pub cost: f64,
    pub latency_ms: f64,
    pub quality: f64,
}

/// Registry of backend profiles
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    backends: Vec<BackendProfile>,
    generic: BackendProfile,
}

impl ModelCatalog {
    /// Catalog with the built-in backend tables
    pub fn builtin() -> Self {
        let backends = vec![
            BackendProfile {
                name: "openai".to_string(),
                base_cost: 0.002,
                base_latency_ms: 1_500.0,
                base_quality: 0.85,
                models: vec![
                    ModelProfile::new("gpt-4o-mini", 1.0, 1.0, 1.0),
                    ModelProfile::new("gpt-4o", 5.0, 1.3, 1.1),
                    ModelProfile::new("gpt-4-turbo", 8.0, 1.6, 1.08),
                ],
            },
            BackendProfile {
                name: "anthropic".to_string(),
                base_cost: 0.003,
                base_latency_ms: 2_000.0,
                base_quality: 0.9,
                models: vec![
                    ModelProfile::new("claude-3-5-haiku", 1.0, 1.0, 1.0),
                    ModelProfile::new("claude-3-5-sonnet", 3.0, 1.3, 1.08),
                    ModelProfile::new("claude-3-opus", 10.0, 1.8, 1.1),
                ],
            },
            BackendProfile {
                name: "google".to_string(),
                base_cost: 0.001,
                base_latency_ms: 1_200.0,
                base_quality: 0.8,
                models: vec![
                    ModelProfile::new("gemini-1.5-flash", 1.0, 1.0, 1.0),
                    ModelProfile::new("gemini-1.5-pro", 4.0, 1.4, 1.12),
                ],
            },
            BackendProfile {
                name: "mistral".to_string(),
                base_cost: 0.0008,
                base_latency_ms: 1_000.0,
                base_quality: 0.75,
                models: vec![
                    ModelProfile::new("mistral-small", 1.0, 1.0, 1.0),
                    ModelProfile::new("mistral-large", 4.0, 1.4, 1.15),
                ],
            },
            BackendProfile {
                name: "cohere".to_string(),
                base_cost: 0.001,
                base_latency_ms: 1_300.0,
                base_quality: 0.72,
                models: vec![
                    ModelProfile::new("command-r", 1.0, 1.0, 1.0),
                    ModelProfile::new("command-r-plus", 3.0, 1.3, 1.1),
                ],
            },
        ];

        Self {
            backends,
            generic: BackendProfile {
                name: "generic".to_string(),
                base_cost: 0.002,
                base_latency_ms: 2_000.0,
                base_quality: 0.75,
                models: vec![ModelProfile::new(GENERIC_MODEL, 1.0, 1.0, 1.0)],
            },
        }
    }

    /// Register or replace a backend profile
    pub fn with_backend(mut self, profile: BackendProfile) -> Self {
        self.backends.retain(|b| b.name != profile.name);
        self.backends.push(profile);
        self
    }

    fn backend(&self, name: &str) -> Option<&BackendProfile> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn default_model(&self, backend: &str) -> String {
        self.backend(backend)
            .map(|b| b.default_model().to_string())
            .unwrap_or_else(|| GENERIC_MODEL.to_string())
    }

    /// Expand backend identifiers into (backend, model) candidates
    ///
    /// Order follows the input backends, then the catalog's model order.
    /// Duplicate backend identifiers are expanded once.
    pub fn candidates(&self, backends: &[String]) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for backend in backends {
            if seen.contains(&backend.as_str()) {
                continue;
            }
            seen.push(backend.as_str());

            match self.backend(backend) {
                Some(profile) => {
                    for model in &profile.models {
                        out.push((backend.clone(), model.name.clone()));
                    }
                }
                None => out.push((backend.clone(), GENERIC_MODEL.to_string())),
            }
        }
        out
    }

    /// Unscaled baseline estimate for a backend/model pair
    pub fn estimate(&self, backend: &str, model: &str) -> ProfileEstimate {
        let profile = self.backend(backend).unwrap_or(&self.generic);
        let (cost_factor, latency_factor, quality_factor) = profile
            .models
            .iter()
            .find(|m| m.name == model)
            .map(|m| (m.cost_factor, m.latency_factor, m.quality_factor))
            .unwrap_or((1.0, 1.0, 1.0));

        ProfileEstimate {
            cost: profile.base_cost * cost_factor,
            latency_ms: profile.base_latency_ms * latency_factor,
            quality: (profile.base_quality * quality_factor).clamp(0.0, 1.0),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_follow_declaration_order() {
        let catalog = ModelCatalog::builtin();
        let candidates =
            catalog.candidates(&["google".to_string(), "unknown".to_string(), "google".to_string()]);

        assert_eq!(
            candidates,
            vec![
                ("google".to_string(), "gemini-1.5-flash".to_string()),
                ("google".to_string(), "gemini-1.5-pro".to_string()),
                ("unknown".to_string(), GENERIC_MODEL.to_string()),
            ]
        );
    }

    #[test]
    fn test_default_model() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.default_model("anthropic"), "claude-3-5-haiku");
        assert_eq!(catalog.default_model("local-llama"), GENERIC_MODEL);
    }

    #[test]
    fn test_estimate_applies_model_factors() {
        let catalog = ModelCatalog::builtin();
        let base = catalog.estimate("openai", "gpt-4o-mini");
        let large = catalog.estimate("openai", "gpt-4o");

        assert!((large.cost - base.cost * 5.0).abs() < 1e-12);
        assert!(large.latency_ms > base.latency_ms);
        assert!(large.quality <= 1.0);
    }

    #[test]
    fn test_custom_backend_replaces_builtin() {
        let catalog = ModelCatalog::builtin().with_backend(BackendProfile {
            name: "openai".to_string(),
            base_cost: 0.5,
            base_latency_ms: 10.0,
            base_quality: 0.5,
            models: vec![ModelProfile::new("tiny", 1.0, 1.0, 1.0)],
        });

        assert_eq!(catalog.default_model("openai"), "tiny");
        assert_eq!(catalog.estimate("openai", "tiny").cost, 0.5);
    }
}
