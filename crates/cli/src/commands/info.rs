//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{BarrierScope, Condition, CoreSettings, Rule};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    queue: QueueInfo,
    processors: Vec<ProcessorInfo>,
    barriers: Vec<BarrierInfo>,
    transformations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    load_rules: Vec<RuleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consent_purposes: Option<Vec<String>>,
}

#[derive(Serialize)]
struct QueueInfo {
    max_queue_size: usize,
    expiration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    flush_watermark: Option<usize>,
}

#[derive(Serialize)]
struct ProcessorInfo {
    id: String,
    processor_type: String,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<String>,
    mapped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatch_limit: Option<usize>,
}

#[derive(Serialize)]
struct BarrierInfo {
    id: String,
    scope: String,
}

#[derive(Serialize)]
struct RuleInfo {
    id: String,
    expression: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    super::ensure_config_exists(&args.config)?;

    let settings = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&settings, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(settings: &CoreSettings, args: &InfoArgs) -> ConfigInfo {
    let processors = settings
        .processors
        .iter()
        .map(|p| ProcessorInfo {
            id: p.id.to_string(),
            processor_type: format!("{:?}", p.processor_type).to_lowercase(),
            enabled: p.enabled,
            rules: p.rules.as_ref().map(|r| describe_rule(r, &|id: &String| id.clone())),
            mapped: p.mappings.is_some(),
            dispatch_limit: p.dispatch_limit,
        })
        .collect();

    let barriers = settings
        .barriers
        .iter()
        .map(|b| BarrierInfo {
            id: b.barrier_id.clone(),
            scope: match &b.scopes {
                BarrierScope::All => "all".to_string(),
                BarrierScope::Processors(ids) => ids
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        })
        .collect();

    let mut load_rules: Vec<RuleInfo> = if args.rules {
        settings
            .load_rules
            .iter()
            .map(|(id, rule)| RuleInfo {
                id: id.clone(),
                expression: describe_rule(rule, &describe_condition),
            })
            .collect()
    } else {
        Vec::new()
    };
    load_rules.sort_by(|a, b| a.id.cmp(&b.id));

    ConfigInfo {
        version: format!("{:?}", settings.version),
        queue: QueueInfo {
            max_queue_size: settings.queue.max_queue_size,
            expiration_seconds: settings.queue.expiration_seconds,
            flush_watermark: settings.flush_watermark,
        },
        processors,
        barriers,
        transformations: settings
            .transformations
            .iter()
            .map(|t| format!("{} ({})", t.id, t.transformer_id))
            .collect(),
        load_rules,
        consent_purposes: settings
            .consent
            .as_ref()
            .map(|c| c.purposes.iter().map(|p| p.purpose_id.clone()).collect()),
    }
}

/// Infix rendering of a rule tree
fn describe_rule<T>(rule: &Rule<T>, leaf: &dyn Fn(&T) -> String) -> String {
    let join = |rules: &[Rule<T>], op: &str| {
        let parts: Vec<String> = rules.iter().map(|r| describe_rule(r, leaf)).collect();
        format!("({})", parts.join(op))
    };
    match rule {
        Rule::Leaf(value) => leaf(value),
        Rule::And(rules) => join(rules.as_slice(), " AND "),
        Rule::Or(rules) => join(rules.as_slice(), " OR "),
        Rule::Not(inner) => format!("NOT {}", describe_rule(inner, leaf)),
    }
}

fn describe_condition(condition: &Condition) -> String {
    match &condition.filter {
        Some(filter) => format!(
            "{} {} '{}'",
            condition.variable,
            condition.operator.as_str(),
            filter
        ),
        None => format!("{} {}", condition.variable, condition.operator.as_str()),
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("Dispatch Router Configuration ({})", info.version);

    println!("\nQueue");
    println!("   ├─ Max size: {}", info.queue.max_queue_size);
    println!("   ├─ Expiration: {}s", info.queue.expiration_seconds);
    match info.queue.flush_watermark {
        Some(watermark) => println!("   └─ Flush watermark: {}", watermark),
        None => println!("   └─ Flush watermark: (none)"),
    }

    println!("\nProcessors ({})", info.processors.len());
    for (i, processor) in info.processors.iter().enumerate() {
        let prefix = if i == info.processors.len() - 1 { "└─" } else { "├─" };
        let state = if processor.enabled { "" } else { " [disabled]" };
        println!(
            "   {} {} ({}){}",
            prefix, processor.id, processor.processor_type, state
        );
        if let Some(rules) = &processor.rules {
            println!("   │    rules: {}", rules);
        }
    }

    if !info.barriers.is_empty() {
        println!("\nBarriers ({})", info.barriers.len());
        for barrier in &info.barriers {
            println!("   - {} -> {}", barrier.id, barrier.scope);
        }
    }

    if !info.transformations.is_empty() {
        println!("\nTransformations");
        for transformation in &info.transformations {
            println!("   - {}", transformation);
        }
    }

    if !info.load_rules.is_empty() {
        println!("\nLoad Rules");
        for rule in &info.load_rules {
            println!("   - {}: {}", rule.id, rule.expression);
        }
    }

    if let Some(purposes) = &info.consent_purposes {
        println!("\nConsent purposes: {}", purposes.join(", "));
    }

    println!();
}
