//! Configuration validation
//!
//! Rules:
//! - field bounds declared on the settings types (`validator` derive)
//! - processor ids non-empty, unique and not reserved
//! - mapping destinations and nested paths non-empty
//! - transformation ids unique, with a transformer and at least one scope
//! - barrier ids non-empty and unique
//! - consent purpose ids non-empty
//!
//! References that resolve to nothing are not errors; [`lint`] reports them.

use std::collections::HashSet;
use std::fmt;

use contracts::{BarrierScope, ContractError, CoreSettings, TransformationScope, VariableAccessor};
use validator::{Validate, ValidationErrors};

/// Validate CoreSettings
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(settings: &CoreSettings) -> Result<(), ContractError> {
    settings.validate().map_err(field_error)?;
    validate_processor_ids(settings)?;
    validate_mappings(settings)?;
    validate_transformations(settings)?;
    validate_barriers(settings)?;
    validate_consent(settings)?;
    Ok(())
}

/// Map the first derive failure to a field path
fn field_error(errors: ValidationErrors) -> ContractError {
    let field = errors
        .errors()
        .keys()
        .next()
        .map(|k| k.to_string())
        .unwrap_or_default();
    ContractError::config_validation(field, errors.to_string())
}

fn validate_processor_ids(settings: &CoreSettings) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, processor) in settings.processors.iter().enumerate() {
        if processor.id.as_str().is_empty() {
            return Err(ContractError::config_validation(
                format!("processors[{index}].id"),
                "processor id must not be empty",
            ));
        }
        if processor.id.is_reserved() {
            return Err(ContractError::config_validation(
                format!("processors[id={}]", processor.id),
                "processor id is reserved",
            ));
        }
        if !seen.insert(processor.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("processors[id={}]", processor.id),
                "duplicate processor id",
            ));
        }
    }
    Ok(())
}

fn validate_mappings(settings: &CoreSettings) -> Result<(), ContractError> {
    for processor in &settings.processors {
        let Some(mappings) = &processor.mappings else {
            continue;
        };
        for (index, operation) in mappings.iter().enumerate() {
            let field = format!("processors[{}].mappings[{index}]", processor.id);
            check_accessor(&operation.destination, &format!("{field}.destination"))?;
            if let Some(reference) = &operation.reference {
                check_accessor(reference, &format!("{field}.reference"))?;
            }
        }
    }
    Ok(())
}

fn check_accessor(accessor: &VariableAccessor, field: &str) -> Result<(), ContractError> {
    if accessor.variable.is_empty() {
        return Err(ContractError::config_validation(field, "variable must not be empty"));
    }
    if accessor.path.iter().any(String::is_empty) {
        return Err(ContractError::config_validation(
            format!("{field}.path"),
            "path segments must not be empty",
        ));
    }
    Ok(())
}

fn validate_transformations(settings: &CoreSettings) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, transformation) in settings.transformations.iter().enumerate() {
        if transformation.id.is_empty() {
            return Err(ContractError::config_validation(
                format!("transformations[{index}].id"),
                "transformation id must not be empty",
            ));
        }
        if !seen.insert(transformation.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("transformations[id={}]", transformation.id),
                "duplicate transformation id",
            ));
        }
        if transformation.transformer_id.is_empty() {
            return Err(ContractError::config_validation(
                format!("transformations[{}].transformer_id", transformation.id),
                "transformer id must not be empty",
            ));
        }
        if transformation.scopes.is_empty() {
            return Err(ContractError::config_validation(
                format!("transformations[{}].scopes", transformation.id),
                "at least one scope is required",
            ));
        }
    }
    Ok(())
}

fn validate_barriers(settings: &CoreSettings) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, barrier) in settings.barriers.iter().enumerate() {
        if barrier.barrier_id.is_empty() {
            return Err(ContractError::config_validation(
                format!("barriers[{index}].barrier_id"),
                "barrier id must not be empty",
            ));
        }
        if !seen.insert(barrier.barrier_id.as_str()) {
            return Err(ContractError::config_validation(
                format!("barriers[id={}]", barrier.barrier_id),
                "duplicate barrier id",
            ));
        }
    }
    Ok(())
}

fn validate_consent(settings: &CoreSettings) -> Result<(), ContractError> {
    let Some(consent) = &settings.consent else {
        return Ok(());
    };
    if consent.tealium_purpose_id.is_empty() {
        return Err(ContractError::config_validation(
            "consent.tealium_purpose_id",
            "internal purpose id must not be empty",
        ));
    }
    for (index, purpose) in consent.purposes.iter().enumerate() {
        if purpose.purpose_id.is_empty() {
            return Err(ContractError::config_validation(
                format!("consent.purposes[{index}].purpose_id"),
                "purpose id must not be empty",
            ));
        }
    }
    Ok(())
}

/// Non-fatal configuration finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Report dangling references
///
/// An unknown rule id evaluates to false and an unknown processor id in a
/// scope matches nothing, so both are legal but almost always typos.
pub fn lint(settings: &CoreSettings) -> Vec<ConfigWarning> {
    let processors: HashSet<&str> = settings.processors.iter().map(|p| p.id.as_str()).collect();
    let mut warnings = Vec::new();
    let mut warn = |field: String, message: String| warnings.push(ConfigWarning { field, message });

    for processor in &settings.processors {
        let Some(rules) = &processor.rules else {
            continue;
        };
        for rule_id in rules.leaves() {
            if !settings.load_rules.contains_key(rule_id.as_str()) {
                warn(
                    format!("processors[{}].rules", processor.id),
                    format!("unknown load rule '{rule_id}'"),
                );
            }
        }
    }

    for barrier in &settings.barriers {
        if let BarrierScope::Processors(ids) = &barrier.scopes {
            for id in ids.iter().filter(|id| !processors.contains(id.as_str())) {
                warn(
                    format!("barriers[{}].scopes", barrier.barrier_id),
                    format!("unknown processor '{id}'"),
                );
            }
        }
    }

    for transformation in &settings.transformations {
        for scope in &transformation.scopes {
            let TransformationScope::Processor(id) = scope else {
                continue;
            };
            if !processors.contains(id.as_str()) {
                warn(
                    format!("transformations[{}].scopes", transformation.id),
                    format!("unknown processor '{id}'"),
                );
            }
        }
    }

    if let Some(consent) = &settings.consent {
        for purpose in &consent.purposes {
            for id in purpose.processor_ids.iter().filter(|id| !processors.contains(id.as_str())) {
                warn(
                    format!("consent.purposes[{}]", purpose.purpose_id),
                    format!("unknown processor '{id}'"),
                );
            }
        }
    }

    warnings
}
