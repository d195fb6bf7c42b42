//! CoreSettings - the streamed configuration object
//!
//! Describes queue bounds, load rules, processors, barriers, transformations
//! and consent. The pipeline re-derives its internal tables whenever a new
//! value is published on the settings stream.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::{BarrierSettings, Condition, ConsentSettings, MappingOperation, ProcessorId, Rule};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete core configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct CoreSettings {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Queue bounds
    #[serde(default)]
    #[validate(nested)]
    pub queue: QueueSettings,

    /// Rule id -> condition tree
    #[serde(default)]
    pub load_rules: HashMap<String, Rule<Condition>>,

    /// Processor definitions
    #[serde(default)]
    #[validate(nested)]
    pub processors: Vec<ProcessorSettings>,

    /// Barrier scoping
    #[serde(default)]
    pub barriers: Vec<BarrierSettings>,

    /// Queue size at which a gated destination is flushed automatically
    #[serde(default)]
    #[validate(range(min = 1))]
    pub flush_watermark: Option<usize>,

    /// Ordered payload transformations
    #[serde(default)]
    pub transformations: Vec<TransformationSettings>,

    /// Consent configuration (consent filtering is off when absent)
    #[serde(default)]
    pub consent: Option<ConsentSettings>,
}

impl CoreSettings {
    /// Settings entry for a processor id
    pub fn processor(&self, id: &str) -> Option<&ProcessorSettings> {
        self.processors.iter().find(|p| p.id == *id)
    }
}

/// Queue size and age bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QueueSettings {
    /// Maximum queued dispatches per destination (oldest evicted beyond)
    #[serde(default = "default_max_queue_size")]
    #[validate(range(min = 1))]
    pub max_queue_size: usize,

    /// Maximum age of a queued dispatch in seconds
    #[serde(default = "default_expiration_seconds")]
    #[validate(range(min = 1, max = MAX_EXPIRATION_SECONDS))]
    pub expiration_seconds: i64,
}

/// Upper bound accepted for `expiration_seconds` (ten years)
pub const MAX_EXPIRATION_SECONDS: i64 = 315_360_000;

impl QueueSettings {
    /// Oldest insertion time still considered live at `now`.
    ///
    /// A window too large to represent never expires anything.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::try_seconds(self.expiration_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            expiration_seconds: default_expiration_seconds(),
        }
    }
}

fn default_max_queue_size() -> usize {
    100
}

fn default_expiration_seconds() -> i64 {
    86_400 // 1 day
}

/// Processor definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProcessorSettings {
    /// Processor id (destination id)
    pub id: ProcessorId,

    /// Built-in implementation to create, or `external` for processors
    /// registered programmatically
    #[serde(default)]
    pub processor_type: ProcessorType,

    /// Disabled processors receive nothing and lose their queue
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Load rule expression over rule ids (absent = always allowed)
    #[serde(default)]
    pub rules: Option<Rule<String>>,

    /// Output shape for this processor (absent = payload passes through)
    #[serde(default)]
    pub mappings: Option<Vec<MappingOperation>>,

    /// Maximum dispatches per delivered batch
    #[serde(default)]
    #[validate(range(min = 1))]
    pub dispatch_limit: Option<usize>,

    /// Worker channel capacity, in batches
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ProcessorSettings {
    /// Minimal enabled entry of the given type
    pub fn new(id: impl Into<ProcessorId>, processor_type: ProcessorType) -> Self {
        Self {
            id: id.into(),
            processor_type,
            enabled: true,
            rules: None,
            mappings: None,
            dispatch_limit: None,
            queue_capacity: default_queue_capacity(),
            params: HashMap::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    64
}

/// Processor implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    /// Logs dispatch summaries
    Log,
    /// Appends JSON lines to a file
    File,
    /// Supplied by the host application
    #[default]
    External,
}

/// One configured transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSettings {
    /// Transformation id
    pub id: String,

    /// Transformer implementing it
    pub transformer_id: String,

    /// Where in the pipeline it runs
    pub scopes: Vec<TransformationScope>,

    /// Transformer-specific configuration
    #[serde(default)]
    pub configuration: Value,
}

/// Pipeline position of a transformation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformationScope {
    /// Once per event, before destinations are considered
    AfterCollectors,
    /// For every destination
    AllProcessors,
    /// For one destination
    Processor(ProcessorId),
}

impl From<String> for TransformationScope {
    fn from(value: String) -> Self {
        match value.as_str() {
            "after_collectors" => Self::AfterCollectors,
            "all_processors" => Self::AllProcessors,
            _ => Self::Processor(value.into()),
        }
    }
}

impl From<TransformationScope> for String {
    fn from(scope: TransformationScope) -> Self {
        match scope {
            TransformationScope::AfterCollectors => "after_collectors".to_string(),
            TransformationScope::AllProcessors => "all_processors".to_string(),
            TransformationScope::Processor(id) => id.to_string(),
        }
    }
}
