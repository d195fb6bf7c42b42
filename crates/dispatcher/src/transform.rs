//! Transformations applied before mappings
//!
//! A [`Transformer`] is looked up by the `transformer_id` of each
//! [`TransformationSettings`] whose scopes match the current stage.

use contracts::{Dispatch, ProcessorId, TransformationScope, TransformationSettings};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Stage at which transformations run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchScope {
    /// Once per event, before fan-out
    AfterCollectors,
    /// Once per destination
    Processor(ProcessorId),
}

impl DispatchScope {
    pub fn matches(&self, scope: &TransformationScope) -> bool {
        match (self, scope) {
            (Self::AfterCollectors, TransformationScope::AfterCollectors) => true,
            (Self::Processor(_), TransformationScope::AllProcessors) => true,
            (Self::Processor(id), TransformationScope::Processor(target)) => id == target,
            _ => false,
        }
    }
}

pub trait Transformer: Send {
    fn id(&self) -> &str;

    /// Return the transformed dispatch, or `None` to drop it
    fn apply(
        &self,
        settings: &TransformationSettings,
        dispatch: Dispatch,
        scope: &DispatchScope,
    ) -> Option<Dispatch>;
}

/// Registered transformers plus the configured transformation list
#[derive(Default)]
pub struct TransformerCoordinator {
    transformers: HashMap<String, Box<dyn Transformer>>,
    settings: Vec<TransformationSettings>,
}

impl TransformerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator with `merge_data` and `drop_events` registered
    pub fn with_builtins() -> Self {
        let mut coordinator = Self::new();
        coordinator.register(Box::new(MergeDataTransformer));
        coordinator.register(Box::new(DropEventsTransformer));
        coordinator
    }

    /// Add or replace a transformer by id
    pub fn register(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers
            .insert(transformer.id().to_string(), transformer);
    }

    pub fn update_settings(&mut self, settings: Vec<TransformationSettings>) {
        self.settings = settings;
    }

    /// Run every matching transformation in configuration order
    pub fn apply(&self, dispatch: Dispatch, scope: &DispatchScope) -> Option<Dispatch> {
        let mut current = dispatch;
        for settings in &self.settings {
            if !settings.scopes.iter().any(|s| scope.matches(s)) {
                continue;
            }
            let Some(transformer) = self.transformers.get(&settings.transformer_id) else {
                warn!(
                    transformation = %settings.id,
                    transformer = %settings.transformer_id,
                    "Unknown transformer, transformation skipped"
                );
                continue;
            };

            let dispatch_id = current.id.clone();
            match transformer.apply(settings, current, scope) {
                Some(next) => current = next,
                None => {
                    debug!(
                        transformation = %settings.id,
                        dispatch_id = %dispatch_id,
                        scope = ?scope,
                        "Dispatch dropped by transformation"
                    );
                    return None;
                }
            }
        }
        Some(current)
    }
}

impl std::fmt::Debug for TransformerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerCoordinator")
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("settings", &self.settings.len())
            .finish()
    }
}

/// Merges the configuration object into the payload
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeDataTransformer;

impl Transformer for MergeDataTransformer {
    fn id(&self) -> &str {
        "merge_data"
    }

    fn apply(
        &self,
        settings: &TransformationSettings,
        mut dispatch: Dispatch,
        _scope: &DispatchScope,
    ) -> Option<Dispatch> {
        match &settings.configuration {
            Value::Object(data) => {
                dispatch
                    .payload
                    .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Value::Null => {}
            other => warn!(
                transformation = %settings.id,
                configuration = %other,
                "merge_data expects an object configuration"
            ),
        }
        Some(dispatch)
    }
}

/// Drops dispatches whose name is listed in `configuration.event_names`
#[derive(Debug, Clone, Copy, Default)]
pub struct DropEventsTransformer;

impl Transformer for DropEventsTransformer {
    fn id(&self) -> &str {
        "drop_events"
    }

    fn apply(
        &self,
        settings: &TransformationSettings,
        dispatch: Dispatch,
        _scope: &DispatchScope,
    ) -> Option<Dispatch> {
        let listed = settings
            .configuration
            .get("event_names")
            .and_then(Value::as_array)
            .is_some_and(|names| names.iter().any(|n| n.as_str() == Some(&dispatch.name)));
        (!listed).then_some(dispatch)
    }
}
