use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{JobsError, JobsResult};

fn default_concurrency() -> usize {
    1
}

/// Static description of one job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    /// Unique job name
    pub name: String,

    /// Maximum simultaneous in-flight items of this type
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Data every enqueued item starts from; submitted keys win
    #[serde(default, rename = "default", alias = "defaultParams")]
    pub default_params: Option<Map<String, Value>>,

    /// Documented parameters, informational only
    #[serde(default)]
    pub params: Option<Value>,

    /// Item options; overrides given at enqueue time win
    #[serde(default)]
    pub options: Option<Map<String, Value>>,

    /// Max processing time and lock TTL, in milliseconds
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Field of the job data used for mutual exclusion
    #[serde(default)]
    pub unique_key: Option<String>,
}

impl JobDefinition {
    /// Create a definition with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: default_concurrency(),
            default_params: None,
            params: None,
            options: None,
            timeout_ms: None,
            unique_key: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_default_params(mut self, params: Map<String, Value>) -> Self {
        self.default_params = Some(params);
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    /// Max processing time of an item, also the TTL of its lock
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Queue name items of this type live under
    pub fn queue_name(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.name)
    }

    /// Lock target for an item: its unique value and the lock TTL.
    ///
    /// `None` unless the definition declares both `uniqueKey` and `timeout`
    /// and the data holds a non-empty value under that key.
    pub fn lock_target(&self, data: &Map<String, Value>) -> Option<(String, Duration)> {
        let key = self.unique_key.as_deref()?;
        let ttl = self.timeout()?;

        let value = match data.get(key)? {
            Value::Null => return None,
            Value::String(s) if s.is_empty() => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Some((value, ttl))
    }

    fn validate(&self) -> JobsResult<()> {
        if self.name.trim().is_empty() {
            return Err(JobsError::DefinitionLoad("job name must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(JobsError::DefinitionLoad(format!(
                "job '{}' must have a positive concurrency",
                self.name
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(JobsError::DefinitionLoad(format!(
                "job '{}' must have a positive timeout",
                self.name
            )));
        }
        Ok(())
    }
}

/// Where job definitions are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionSource {
    /// JSON document on disk
    Path(PathBuf),

    /// JSON document held in memory
    Json(String),

    /// Already-parsed records
    Records(Vec<JobDefinition>),
}

/// Read-only catalog of job definitions, indexed by name
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    definitions: HashMap<String, Arc<JobDefinition>>,
    order: Vec<String>,
}

impl JobRegistry {
    /// Index an ordered list of definitions
    pub fn from_definitions(definitions: Vec<JobDefinition>) -> JobsResult<Self> {
        let mut registry = Self::default();

        for definition in definitions {
            definition.validate()?;

            if registry.definitions.contains_key(&definition.name) {
                return Err(JobsError::DefinitionLoad(format!(
                    "job '{}' is defined more than once",
                    definition.name
                )));
            }

            debug!("Loaded job definition: {}", definition.name);
            registry.order.push(definition.name.clone());
            registry.definitions.insert(definition.name.clone(), Arc::new(definition));
        }

        Ok(registry)
    }

    /// Parse a JSON array of definition records
    pub fn from_json_str(document: &str) -> JobsResult<Self> {
        let definitions: Vec<JobDefinition> = serde_json::from_str(document)?;
        Self::from_definitions(definitions)
    }

    /// Load definitions from a source
    pub async fn load(source: &DefinitionSource) -> JobsResult<Self> {
        let registry = match source {
            DefinitionSource::Path(path) => {
                let document = tokio::fs::read_to_string(path).await.map_err(|e| {
                    JobsError::DefinitionLoad(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json_str(&document)?
            }
            DefinitionSource::Json(document) => Self::from_json_str(document)?,
            DefinitionSource::Records(records) => Self::from_definitions(records.clone())?,
        };

        info!("Job registry loaded with {} definitions", registry.len());
        Ok(registry)
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> JobsResult<&Arc<JobDefinition>> {
        self.definitions
            .get(name)
            .ok_or_else(|| JobsError::UnknownJob(name.to_string()))
    }

    /// Check if a job name is defined
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Definitions in the order they were declared
    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.order.iter().filter_map(|name| self.definitions.get(name))
    }

    /// Job names in declaration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
