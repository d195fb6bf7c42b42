//! ConsentGate - decides whether an event may be routed under the current
//! consent decision

use contracts::{ConsentDecision, ConsentSettings, DataObject, DecisionType};
use serde_json::Value;
use tracing::debug;

/// Payload key holding the decision type
pub const CONSENT_TYPE_KEY: &str = "consent_type";
/// Payload key holding every granted purpose
pub const CONSENTED_PURPOSES_KEY: &str = "purposes_with_consent_all";

/// Whole-event consent outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentVerdict {
    /// No provider or no consent settings: route without consent checks
    Disabled,
    /// Park the event until a usable decision arrives
    Pending,
    /// Explicit decision without the internal purpose
    Blocked,
    Granted(ConsentDecision),
}

#[derive(Debug, Default)]
pub struct ConsentGate {
    active: bool,
    settings: Option<ConsentSettings>,
    decision: Option<ConsentDecision>,
}

impl ConsentGate {
    /// `active` is whether a consent provider is wired in
    pub fn new(active: bool) -> Self {
        Self {
            active,
            ..Self::default()
        }
    }

    pub fn update_settings(&mut self, settings: Option<ConsentSettings>) {
        self.settings = settings;
    }

    pub fn update_decision(&mut self, decision: Option<ConsentDecision>) {
        debug!(decision = ?decision, "Consent decision updated");
        self.decision = decision;
    }

    pub fn decision(&self) -> Option<&ConsentDecision> {
        self.decision.as_ref()
    }

    pub fn verdict(&self) -> ConsentVerdict {
        let Some(settings) = self.settings.as_ref().filter(|_| self.active) else {
            return ConsentVerdict::Disabled;
        };
        let Some(decision) = &self.decision else {
            return ConsentVerdict::Pending;
        };

        if decision.allows(&settings.tealium_purpose_id) {
            ConsentVerdict::Granted(decision.clone())
        } else {
            match decision.decision_type {
                DecisionType::Explicit => ConsentVerdict::Blocked,
                DecisionType::Implicit => ConsentVerdict::Pending,
            }
        }
    }

    /// Every purpose mapped to `processor` is granted.
    ///
    /// A processor mapped to no purpose is never consented.
    pub fn is_consented(&self, decision: &ConsentDecision, processor: &str) -> bool {
        let Some(settings) = &self.settings else {
            return true;
        };
        let mut required = settings.required_purposes(processor).peekable();
        required.peek().is_some() && required.all(|purpose| decision.allows(purpose))
    }

    /// Add the decision keys to a payload
    pub fn annotate(decision: &ConsentDecision, payload: &mut DataObject) {
        payload.insert(
            CONSENT_TYPE_KEY.to_string(),
            Value::String(decision.decision_type.as_str().to_string()),
        );
        payload.insert(
            CONSENTED_PURPOSES_KEY.to_string(),
            Value::Array(decision.purposes.iter().cloned().map(Value::String).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConsentPurpose, ProcessorId};
    use serde_json::json;

    fn settings() -> ConsentSettings {
        ConsentSettings {
            tealium_purpose_id: "tealium".to_string(),
            purposes: vec![
                ConsentPurpose {
                    purpose_id: "analytics".to_string(),
                    processor_ids: vec![ProcessorId::from("collect")],
                },
                ConsentPurpose {
                    purpose_id: "ads".to_string(),
                    processor_ids: vec![ProcessorId::from("collect"), ProcessorId::from("ads")],
                },
            ],
        }
    }

    fn gate(decision: Option<ConsentDecision>) -> ConsentGate {
        let mut gate = ConsentGate::new(true);
        gate.update_settings(Some(settings()));
        gate.update_decision(decision);
        gate
    }

    #[test]
    fn inactive_or_unconfigured_is_disabled() {
        let mut inactive = ConsentGate::new(false);
        inactive.update_settings(Some(settings()));
        assert_eq!(inactive.verdict(), ConsentVerdict::Disabled);
        assert_eq!(ConsentGate::new(true).verdict(), ConsentVerdict::Disabled);
    }

    #[test]
    fn verdict_follows_decision() {
        assert_eq!(gate(None).verdict(), ConsentVerdict::Pending);

        let explicit_no = ConsentDecision::new(DecisionType::Explicit, ["analytics"]);
        assert_eq!(gate(Some(explicit_no)).verdict(), ConsentVerdict::Blocked);

        let implicit_no = ConsentDecision::new(DecisionType::Implicit, ["analytics"]);
        assert_eq!(gate(Some(implicit_no)).verdict(), ConsentVerdict::Pending);

        let granted = ConsentDecision::new(DecisionType::Implicit, ["tealium"]);
        assert_eq!(
            gate(Some(granted.clone())).verdict(),
            ConsentVerdict::Granted(granted)
        );
    }

    #[test]
    fn processors_need_every_mapped_purpose() {
        let gate = gate(None);
        let partial = ConsentDecision::new(DecisionType::Explicit, ["tealium", "ads"]);
        assert!(!gate.is_consented(&partial, "collect"));
        assert!(gate.is_consented(&partial, "ads"));
        assert!(!gate.is_consented(&partial, "unmapped"));

        let full = ConsentDecision::new(DecisionType::Explicit, ["tealium", "ads", "analytics"]);
        assert!(gate.is_consented(&full, "collect"));
    }

    #[test]
    fn annotate_adds_decision_keys() {
        let decision = ConsentDecision::new(DecisionType::Explicit, ["tealium", "ads"]);
        let mut payload = DataObject::new();
        ConsentGate::annotate(&decision, &mut payload);

        assert_eq!(payload[CONSENT_TYPE_KEY], json!("explicit"));
        assert_eq!(payload[CONSENTED_PURPOSES_KEY], json!(["ads", "tealium"]));
    }
}
