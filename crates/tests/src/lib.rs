//! # Integration Tests
//!
//! End-to-end tests of the dispatch loop.
//!
//! Covers:
//! - Contract snapshot tests
//! - Configuration-driven routing (TOML through the loop)
//! - Barrier, flush, consent and in-flight behavior across crates

#[cfg(test)]
mod contract_tests {
    use contracts::{CoreSettings, ProcessorId};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert!(ProcessorId::consent_queue().is_reserved());
    }

    #[test]
    fn test_default_settings_are_valid() {
        let json = config_loader::ConfigLoader::to_json(&CoreSettings::default()).unwrap();
        let reloaded =
            config_loader::ConfigLoader::load_from_str(&json, config_loader::ConfigFormat::Json)
                .unwrap();
        assert_eq!(reloaded, CoreSettings::default());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use barriers::ManualBarrier;
    use chrono::Utc;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        BarrierScope, BarrierSettings, BarrierStatus, ConsentDecision, ConsentProvider,
        ConsentPurpose, ConsentSettings, ContractError, CoreSettings, DataObject, DecisionType,
        Dispatch, DispatchProcessor, ManualClock, ProcessorSettings, ProcessorType,
        TransformationScope, TransformationSettings,
    };
    use dispatcher::{
        DispatchHandle, DispatchLoopBuilder, DispatchStats, DropReason, ProcessorOptions,
        TrackOutcome, MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::watch;

    /// Processor that records every delivered dispatch, optionally holding
    /// each batch until released
    struct Recorder {
        id: String,
        seen: Arc<Mutex<Vec<Dispatch>>>,
        release: Option<watch::Receiver<bool>>,
    }

    impl DispatchProcessor for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        async fn deliver(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError> {
            if let Some(release) = self.release.as_mut() {
                loop {
                    let open = *release.borrow_and_update();
                    if open || release.changed().await.is_err() {
                        break;
                    }
                }
            }
            self.seen.lock().extend(dispatches.iter().cloned());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn recorder(id: &str) -> (Recorder, Arc<Mutex<Vec<Dispatch>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            id: id.to_string(),
            seen: Arc::clone(&seen),
            release: None,
        };
        (recorder, seen)
    }

    struct StaticConsent(watch::Sender<Option<ConsentDecision>>);

    impl ConsentProvider for StaticConsent {
        fn decision(&self) -> watch::Receiver<Option<ConsentDecision>> {
            self.0.subscribe()
        }
    }

    fn payload(value: Value) -> DataObject {
        match value {
            Value::Object(map) => map,
            _ => DataObject::new(),
        }
    }

    fn names(seen: &Arc<Mutex<Vec<Dispatch>>>) -> Vec<String> {
        seen.lock().iter().map(|d| d.name.clone()).collect()
    }

    /// Poll until nothing is queued or in flight
    async fn drained(handle: &DispatchHandle) -> DispatchStats {
        for _ in 0..200 {
            let stats = handle.stats().await.unwrap();
            if stats.is_drained() && stats.processors.iter().all(|p| p.inflight == 0) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queues did not drain");
    }

    /// Poll until `check` holds on the loop stats
    async fn wait_until<F>(handle: &DispatchHandle, check: F) -> DispatchStats
    where
        F: Fn(&DispatchStats) -> bool,
    {
        for _ in 0..200 {
            let stats = handle.stats().await.unwrap();
            if check(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    const ROUTER_TOML: &str = r#"
[load_rules.is_purchase.leaf]
variable = "event"
operator = "equals"
filter = "purchase"

[load_rules.big_order.leaf]
variable = { variable = "total", path = ["order"] }
operator = "greater_than"
filter = "100"

[[processors]]
id = "everything"

[[processors]]
id = "purchases"
rules = { and = [{ leaf = "is_purchase" }, { leaf = "big_order" }] }

[[processors.mappings]]
destination = "order_total"
reference = { variable = "total", path = ["order"] }

[[processors.mappings]]
destination = { variable = "kind", path = ["meta"] }
map_to = "purchase"
"#;

    /// Load rules and mappings from TOML select and reshape per processor
    #[tokio::test]
    async fn test_config_driven_routing() {
        let settings = ConfigLoader::load_from_str(ROUTER_TOML, ConfigFormat::Toml).unwrap();
        assert!(ConfigLoader::warnings(&settings).is_empty());

        let (_settings_tx, settings_rx) = watch::channel(settings);
        let (everything, everything_seen) = recorder("everything");
        let (purchases, purchases_seen) = recorder("purchases");
        let (handle, task) = DispatchLoopBuilder::new(settings_rx)
            .processor(everything, ProcessorOptions::default())
            .processor(purchases, ProcessorOptions::default())
            .spawn();

        let view = handle
            .track(Dispatch::new(
                "view",
                payload(json!({"event": "view", "order": {"total": 500}})),
            ))
            .await
            .unwrap();
        assert!(view.outcome.is_accepted());
        assert_eq!(view.drop_reason("purchases"), Some(DropReason::LoadRules));

        let small = handle
            .track(Dispatch::new(
                "small",
                payload(json!({"event": "purchase", "order": {"total": 20}})),
            ))
            .await
            .unwrap();
        assert_eq!(small.drop_reason("purchases"), Some(DropReason::LoadRules));

        let big = handle
            .track(Dispatch::new(
                "big",
                payload(json!({"event": "purchase", "order": {"total": 250}})),
            ))
            .await
            .unwrap();
        assert_eq!(big.accepted_by.len(), 2);

        drained(&handle).await;
        assert_eq!(names(&everything_seen), vec!["view", "small", "big"]);
        let delivered = purchases_seen.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            Value::Object(delivered[0].payload.clone()),
            json!({"order_total": 250, "meta": {"kind": "purchase"}})
        );
        // Unmapped processors receive the payload untouched
        assert_eq!(everything_seen.lock()[2].payload["event"], "purchase");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    /// A plain reference then a constant on one destination build an array;
    /// another plain reference replaces it
    #[tokio::test]
    async fn test_mapping_combine_through_pipeline() {
        let settings: CoreSettings = serde_json::from_value(json!({
            "processors": [
                {"id": "append", "mappings": [
                    {"destination": "dest", "reference": "key"},
                    {"destination": "dest", "map_to": "c"}
                ]},
                {"id": "replace", "mappings": [
                    {"destination": "dest", "reference": "key"},
                    {"destination": "dest", "map_to": "c"},
                    {"destination": "dest", "reference": "key"}
                ]}
            ]
        }))
        .unwrap();
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let (append, append_seen) = recorder("append");
        let (replace, replace_seen) = recorder("replace");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(append, ProcessorOptions::default())
            .processor(replace, ProcessorOptions::default())
            .spawn();

        handle
            .track(Dispatch::new("view", payload(json!({"key": "v", "other": 1}))))
            .await
            .unwrap();
        drained(&handle).await;

        assert_eq!(
            Value::Object(append_seen.lock()[0].payload.clone()),
            json!({"dest": ["v", "c"]})
        );
        assert_eq!(
            Value::Object(replace_seen.lock()[0].payload.clone()),
            json!({"dest": "v"})
        );
        handle.shutdown().await.unwrap();
    }

    /// An open and a closed barrier on one processor keep it gated until the
    /// closed one opens
    #[tokio::test]
    async fn test_barrier_gate_is_conjunction() {
        let settings = CoreSettings {
            barriers: vec![
                BarrierSettings::new("b1", BarrierScope::All),
                BarrierSettings::new("b2", BarrierScope::Processors(vec!["collect".into()])),
            ],
            ..CoreSettings::default()
        };
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let b1 = Arc::new(ManualBarrier::new("b1", BarrierStatus::open(true)));
        let b2 = Arc::new(ManualBarrier::new("b2", BarrierStatus::closed(false)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .barrier(b1.clone())
            .barrier(b2.clone())
            .spawn();

        handle.track(Dispatch::new("held", DataObject::new())).await.unwrap();
        handle.flush().unwrap();
        let stats = handle.stats().await.unwrap();
        let collect = stats.processor("collect").unwrap();
        assert!(!collect.gate_open, "non-flushable barrier ignores flush");
        assert_eq!(collect.queue_size, 1);
        assert!(seen.lock().is_empty());

        b2.open();
        drained(&handle).await;
        assert_eq!(names(&seen), vec!["held"]);
        handle.shutdown().await.unwrap();
    }

    /// Flushing a closed flushable barrier drains the queue, then the gate
    /// closes again on its own
    #[tokio::test]
    async fn test_flush_drains_then_stops() {
        let settings = CoreSettings {
            barriers: vec![BarrierSettings::new("batching", BarrierScope::All)],
            ..CoreSettings::default()
        };
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let batching = Arc::new(ManualBarrier::new("batching", BarrierStatus::closed(true)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .barrier(batching.clone())
            .spawn();

        for name in ["a", "b", "c"] {
            handle.track(Dispatch::new(name, DataObject::new())).await.unwrap();
        }
        assert_eq!(
            handle.stats().await.unwrap().processor("collect").unwrap().queue_size,
            3
        );

        handle.flush().unwrap();
        let stats = drained(&handle).await;
        assert_eq!(names(&seen), vec!["a", "b", "c"]);
        assert!(!stats.processor("collect").unwrap().gate_open);

        handle.track(Dispatch::new("d", DataObject::new())).await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.processor("collect").unwrap().queue_size, 1);
        assert_eq!(seen.lock().len(), 3);
        handle.shutdown().await.unwrap();
    }

    /// Tracking one dispatch twice while gated queues it once
    #[tokio::test]
    async fn test_idempotent_store() {
        let settings = CoreSettings {
            barriers: vec![BarrierSettings::new("offline", BarrierScope::All)],
            ..CoreSettings::default()
        };
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let offline = Arc::new(ManualBarrier::new("offline", BarrierStatus::closed(false)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .barrier(offline.clone())
            .spawn();

        let dispatch = Dispatch::new("once", DataObject::new());
        handle.track(dispatch.clone()).await.unwrap();
        handle.track(dispatch).await.unwrap();
        assert_eq!(
            handle.stats().await.unwrap().processor("collect").unwrap().queue_size,
            1
        );

        offline.open();
        drained(&handle).await;
        assert_eq!(names(&seen), vec!["once"]);
        handle.shutdown().await.unwrap();
    }

    /// A slow processor never holds more than the in-flight ceiling
    #[tokio::test]
    async fn test_inflight_ceiling() {
        let (_settings_tx, settings_rx) = watch::channel(CoreSettings::default());
        let (release_tx, release_rx) = watch::channel(false);
        let (mut slow, seen) = recorder("slow");
        slow.release = Some(release_rx);
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(slow, ProcessorOptions::default())
            .spawn();

        let total = MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER + 10;
        for i in 0..total {
            handle
                .track(Dispatch::new(format!("e{i}"), DataObject::new()))
                .await
                .unwrap();
        }
        let stats = handle.stats().await.unwrap();
        let slow_stats = stats.processor("slow").unwrap();
        assert_eq!(slow_stats.inflight, MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER);
        assert_eq!(slow_stats.queue_size, total);

        handle.flush().unwrap();
        let stats = handle.stats().await.unwrap();
        assert!(stats.processor("slow").unwrap().inflight <= MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER);

        release_tx.send_replace(true);
        let stats = drained(&handle).await;
        assert_eq!(
            stats.processor("slow").unwrap().metrics.delivered_count,
            total as u64
        );
        let delivered = names(&seen);
        let expected: Vec<String> = (0..total).map(|i| format!("e{i}")).collect();
        assert_eq!(delivered, expected);
        handle.shutdown().await.unwrap();
    }

    fn consent_settings() -> CoreSettings {
        CoreSettings {
            transformations: vec![TransformationSettings {
                id: "stamp".to_string(),
                transformer_id: "merge_data".to_string(),
                scopes: vec![TransformationScope::AfterCollectors],
                configuration: json!({"stamped": true}),
            }],
            consent: Some(ConsentSettings {
                tealium_purpose_id: "tealium".to_string(),
                purposes: vec![ConsentPurpose {
                    purpose_id: "analytics".to_string(),
                    processor_ids: vec!["collect".into()],
                }],
            }),
            ..CoreSettings::default()
        }
    }

    /// An explicit decline reports the original, untransformed dispatch
    #[tokio::test]
    async fn test_explicit_decline_drops_original() {
        let (_settings_tx, settings_rx) = watch::channel(consent_settings());
        let (decision_tx, _) = watch::channel(Some(ConsentDecision::new(
            DecisionType::Explicit,
            ["analytics"],
        )));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .consent_provider(Arc::new(StaticConsent(decision_tx)))
            .spawn();

        let original = Dispatch::new("view", payload(json!({"page": "home"})));
        let result = handle.track(original.clone()).await.unwrap();
        assert_eq!(result.outcome, TrackOutcome::Dropped);
        assert_eq!(result.dispatch, original);
        assert!(!result.dispatch.payload.contains_key("stamped"));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.consent_queue, 0);
        assert!(seen.lock().is_empty());
        handle.shutdown().await.unwrap();
    }

    /// Undecided consent parks events; a grant releases them transformed and
    /// annotated
    #[tokio::test]
    async fn test_undecided_consent_postpones() {
        let (_settings_tx, settings_rx) = watch::channel(consent_settings());
        let (decision_tx, _) = watch::channel(None);
        let provider = Arc::new(StaticConsent(decision_tx));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .consent_provider(provider.clone())
            .spawn();

        let result = handle
            .track(Dispatch::new("view", DataObject::new()))
            .await
            .unwrap();
        assert_eq!(result.outcome, TrackOutcome::Accepted { postponed: true });
        assert_eq!(handle.stats().await.unwrap().consent_queue, 1);

        provider.0.send_replace(Some(ConsentDecision::new(
            DecisionType::Explicit,
            ["tealium", "analytics"],
        )));
        drained(&handle).await;

        let delivered = seen.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload["stamped"], true);
        assert_eq!(delivered[0].payload["consent_type"], "explicit");
        handle.shutdown().await.unwrap();
    }

    /// Disabling a processor through the settings stream purges its queue
    #[tokio::test]
    async fn test_disabling_processor_purges_queue() {
        let mut settings = CoreSettings {
            processors: vec![ProcessorSettings::new("collect", ProcessorType::External)],
            barriers: vec![BarrierSettings::new("offline", BarrierScope::All)],
            ..CoreSettings::default()
        };
        let (settings_tx, settings_rx) = watch::channel(settings.clone());
        let offline = Arc::new(ManualBarrier::new("offline", BarrierStatus::closed(false)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .barrier(offline.clone())
            .spawn();

        handle.track(Dispatch::new("a", DataObject::new())).await.unwrap();
        handle.track(Dispatch::new("b", DataObject::new())).await.unwrap();
        assert_eq!(
            handle.stats().await.unwrap().processor("collect").unwrap().queue_size,
            2
        );

        settings.processors[0].enabled = false;
        settings_tx.send_replace(settings);
        let stats = wait_until(&handle, |s| {
            s.processor("collect").is_some_and(|p| !p.enabled)
        })
        .await;
        assert_eq!(stats.processor("collect").unwrap().queue_size, 0);

        let result = handle
            .track(Dispatch::new("c", DataObject::new()))
            .await
            .unwrap();
        assert_eq!(result.outcome, TrackOutcome::Dropped);

        offline.open();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stats().await.unwrap();
        assert!(seen.lock().is_empty());
        handle.shutdown().await.unwrap();
    }

    /// Entries older than the expiration window are never delivered
    #[tokio::test]
    async fn test_expired_entries_are_skipped() {
        let mut settings = CoreSettings {
            barriers: vec![BarrierSettings::new("offline", BarrierScope::All)],
            ..CoreSettings::default()
        };
        settings.queue.expiration_seconds = 60;
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let offline = Arc::new(ManualBarrier::new("offline", BarrierStatus::closed(false)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .clock(clock.clone())
            .processor(collect, ProcessorOptions::default())
            .barrier(offline.clone())
            .spawn();

        handle.track(Dispatch::new("stale", DataObject::new())).await.unwrap();
        clock.advance(chrono::Duration::seconds(120));
        handle.track(Dispatch::new("fresh", DataObject::new())).await.unwrap();

        offline.open();
        let stats = drained(&handle).await;
        assert_eq!(names(&seen), vec!["fresh"]);
        assert_eq!(stats.processor("collect").unwrap().metrics.delivered_count, 1);
        handle.shutdown().await.unwrap();
    }

    /// Oldest entries are evicted beyond the queue bound
    #[tokio::test]
    async fn test_max_queue_size_evicts_oldest() {
        let mut settings = CoreSettings {
            barriers: vec![BarrierSettings::new("offline", BarrierScope::All)],
            ..CoreSettings::default()
        };
        settings.queue.max_queue_size = 2;
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let offline = Arc::new(ManualBarrier::new("offline", BarrierStatus::closed(false)));
        let (collect, seen) = recorder("collect");
        let (handle, _task) = DispatchLoopBuilder::new(settings_rx)
            .processor(collect, ProcessorOptions::default())
            .barrier(offline.clone())
            .spawn();

        for name in ["first", "second", "third"] {
            handle.track(Dispatch::new(name, DataObject::new())).await.unwrap();
        }
        offline.open();
        drained(&handle).await;
        assert_eq!(names(&seen), vec!["second", "third"]);
        handle.shutdown().await.unwrap();
    }
}
