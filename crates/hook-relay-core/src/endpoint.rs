//! # Endpoint Resolution
//!
//! Maps a `(source, environment)` pair to the downstream URL to forward to,
//! plus an ordered list of fallbacks tried when the primary fails.
//!
//! Fallback order is most specific first:
//! 1. the source's own fallbacks
//! 2. the default URL for the environment (when the source had its own URL)
//! 3. the default fallbacks
//! 4. the global fallbacks
//!
//! Duplicates and the primary itself are removed, keeping first occurrence.

use crate::{Environment, Source, ValidationError};
use serde::{Deserialize, Serialize};

/// Per-environment URLs and fallbacks for one source (or the default)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceEndpoints {
    pub production: Option<String>,
    pub non_production: Option<String>,
    pub fallbacks: Vec<String>,
}

impl SourceEndpoints {
    /// URL configured for `environment`, ignoring blank values
    pub fn url_for(&self, environment: Environment) -> Option<&str> {
        let url = if environment.is_production() {
            self.production.as_deref()
        } else {
            self.non_production.as_deref()
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }

    fn all_urls(&self) -> impl Iterator<Item = &String> {
        self.production
            .iter()
            .chain(self.non_production.iter())
            .chain(self.fallbacks.iter())
    }
}

/// Downstream endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Used for unknown sources and for sources without their own URL
    pub default: SourceEndpoints,
    pub slack: SourceEndpoints,
    pub calendly: SourceEndpoints,
    /// Tried last, for every source
    pub fallbacks: Vec<String>,
}

impl EndpointConfig {
    /// Source-specific section; `None` for unknown sources
    pub fn for_source(&self, source: Source) -> Option<&SourceEndpoints> {
        match source {
            Source::Slack => Some(&self.slack),
            Source::Calendly => Some(&self.calendly),
            Source::Unknown => None,
        }
    }

    /// Check URL syntax and that every source can be routed in `environment`
    pub fn validate(&self, environment: Environment) -> Result<(), ValidationError> {
        let sections = [
            ("endpoints.default", &self.default),
            ("endpoints.slack", &self.slack),
            ("endpoints.calendly", &self.calendly),
        ];
        for (field, section) in sections {
            for url in section.all_urls() {
                validate_url(field, url)?;
            }
        }
        for url in &self.fallbacks {
            validate_url("endpoints.fallbacks", url)?;
        }

        if self.default.url_for(environment).is_none() {
            let field = if environment.is_production() {
                "endpoints.default.production"
            } else {
                "endpoints.default.non_production"
            };
            return Err(ValidationError::Required {
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(value.trim()).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        message: format!("'{value}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: format!("'{value}' uses unsupported scheme '{other}'"),
        }),
    }
}

/// Resolved forwarding target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointTarget {
    pub primary_url: String,
    pub fallback_urls: Vec<String>,
}

impl EndpointTarget {
    /// Primary followed by fallbacks, in attempt order
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_url.as_str()).chain(self.fallback_urls.iter().map(String::as_str))
    }

    pub fn attempt_count(&self) -> usize {
        1 + self.fallback_urls.len()
    }
}

/// Errors raised during endpoint resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No endpoint configured for source '{event_source}' in {environment}")]
    NoEndpoint {
        event_source: Source,
        environment: Environment,
    },
}

/// Stateless resolver over an [`EndpointConfig`]
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    config: EndpointConfig,
}

impl EndpointResolver {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn resolve(
        &self,
        source: Source,
        environment: Environment,
    ) -> Result<EndpointTarget, ResolveError> {
        let specific = self.config.for_source(source);
        let specific_url = specific.and_then(|s| s.url_for(environment));
        let default_url = self.config.default.url_for(environment);

        let primary = specific_url
            .or(default_url)
            .ok_or(ResolveError::NoEndpoint {
                event_source: source,
                environment,
            })?
            .to_string();

        let mut candidates: Vec<&str> = Vec::new();
        if let Some(section) = specific {
            candidates.extend(section.fallbacks.iter().map(String::as_str));
        }
        if specific_url.is_some() {
            candidates.extend(default_url);
        }
        candidates.extend(self.config.default.fallbacks.iter().map(String::as_str));
        candidates.extend(self.config.fallbacks.iter().map(String::as_str));

        let mut fallback_urls: Vec<String> = Vec::new();
        for candidate in candidates {
            let candidate = candidate.trim();
            if candidate.is_empty() || candidate == primary {
                continue;
            }
            if !fallback_urls.iter().any(|u| u == candidate) {
                fallback_urls.push(candidate.to_string());
            }
        }

        Ok(EndpointTarget {
            primary_url: primary,
            fallback_urls,
        })
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
