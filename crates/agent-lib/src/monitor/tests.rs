//! End-to-end tests for the monitor loop
//!
//! A scripted collector replays synthetic host samples so that the full
//! collect, train, score and alert path runs without touching the host.

#[cfg(test)]
mod monitor_loop_tests {
    use crate::anomaly::{AlertDispatcher, Alerter, ForestConfig, Label};
    use crate::collector::{async_trait, MetricsCollector};
    use crate::error::{DetectorError, Result};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{MetricsSample, NUM_FEATURES};
    use crate::monitor::{
        train_from_history, MonitorConfig, MonitorLoop, MonitorLoopBuilder, MonitorPhase,
        TickOutcome, COLLECTOR_UNHEALTHY_AFTER,
    };
    use crate::storage::{AuditKind, AuditLog, HistoryStore, ModelStore};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    const MEANS: [f64; NUM_FEATURES] = [
        10.0, 40.0, 55.0, 200.0, 1.0, 1000.0, 800.0, 500.0, 600.0,
    ];
    const STD_DEVS: [f64; NUM_FEATURES] = [2.0, 1.0, 0.5, 3.0, 0.1, 50.0, 40.0, 25.0, 30.0];

    /// Collector that replays a fixed queue, then fails
    struct ScriptedCollector {
        queue: Mutex<VecDeque<Result<MetricsSample>>>,
    }

    impl ScriptedCollector {
        fn new(samples: impl IntoIterator<Item = Result<MetricsSample>>) -> Self {
            Self {
                queue: Mutex::new(samples.into_iter().collect()),
            }
        }

        fn push(&self, sample: Result<MetricsSample>) {
            self.queue.lock().unwrap().push_back(sample);
        }
    }

    #[async_trait]
    impl MetricsCollector for ScriptedCollector {
        async fn collect(&self) -> Result<MetricsSample> {
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DetectorError::Collection("script exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Dispatcher that remembers every alert it was handed
    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(MetricsSample, f64)>>,
    }

    #[async_trait]
    impl AlertDispatcher for RecordingDispatcher {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, sample: &MetricsSample, score: f64) -> Result<()> {
            self.sent.lock().unwrap().push((sample.clone(), score));
            Ok(())
        }
    }

    fn standard_normal(rng: &mut StdRng) -> f64 {
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn normal_sample(rng: &mut StdRng) -> MetricsSample {
        let mut values = [0.0; NUM_FEATURES];
        for (i, value) in values.iter_mut().enumerate() {
            *value = (MEANS[i] + STD_DEVS[i] * standard_normal(rng)).max(0.0);
        }
        MetricsSample::from_values(Utc::now(), values)
    }

    fn normal_samples(n: usize, seed: u64) -> Vec<MetricsSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| normal_sample(&mut rng)).collect()
    }

    /// A host pegged on CPU with a runaway run queue; every other field is normal
    fn pegged_cpu_sample(seed: u64) -> MetricsSample {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = normal_sample(&mut rng);
        sample.cpu_percent = 99.9;
        sample.load_avg = 50.0;
        sample
    }

    fn test_config(threshold: usize) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(10),
            training_threshold: threshold,
            history_capacity: 1000,
            restore_history: false,
            forest: ForestConfig::default(),
            node_name: "test-node".to_string(),
            ..MonitorConfig::default()
        }
    }

    struct Harness {
        _dir: TempDir,
        collector: Arc<ScriptedCollector>,
        dispatcher: Arc<RecordingDispatcher>,
        model_store: ModelStore,
        history: HistoryStore,
        audit: AuditLog,
    }

    impl Harness {
        fn new(samples: Vec<MetricsSample>) -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                model_store: ModelStore::new(dir.path().join("models").join("detector.bin")),
                history: HistoryStore::new(dir.path().join("data").join("history.csv")),
                audit: AuditLog::new(dir.path().join("logs").join("audit.jsonl")),
                collector: Arc::new(ScriptedCollector::new(samples.into_iter().map(Ok))),
                dispatcher: Arc::new(RecordingDispatcher::default()),
                _dir: dir,
            }
        }

        fn builder(&self, config: MonitorConfig) -> MonitorLoopBuilder {
            let alerter = Alerter::new().with_dispatcher(self.dispatcher.clone());
            MonitorLoopBuilder::new()
                .config(config)
                .collector(self.collector.clone())
                .alerter(Arc::new(alerter))
                .model_store(self.model_store.clone())
                .history_store(self.history.clone())
                .audit_log(self.audit.clone())
        }

        fn build(&self, threshold: usize) -> MonitorLoop {
            self.builder(test_config(threshold)).build().unwrap()
        }
    }

    #[tokio::test]
    async fn test_cold_start_trains_then_flags_overload() {
        let harness = Harness::new(normal_samples(150, 7));
        let mut monitor = harness.build(100);
        assert_eq!(monitor.phase(), MonitorPhase::Collecting);

        for i in 1..100 {
            let outcome = monitor.tick().await.unwrap();
            assert_eq!(
                outcome,
                TickOutcome::Collecting {
                    collected: i,
                    threshold: 100
                }
            );
        }
        assert!(!harness.model_store.exists());

        // The hundredth sample trains the model and is scored in the same tick
        match monitor.tick().await.unwrap() {
            TickOutcome::Scored { trained, .. } => assert!(trained),
            other => panic!("expected a scored tick, got {:?}", other),
        }
        assert_eq!(monitor.phase(), MonitorPhase::Trained);
        assert!(harness.model_store.exists());

        let persisted = harness.model_store.load().unwrap().unwrap();
        assert_eq!(persisted.sample_count, 100);
        assert_eq!(monitor.state().detector(), Some(&persisted.detector));

        for _ in 0..50 {
            match monitor.tick().await.unwrap() {
                TickOutcome::Scored { trained, .. } => assert!(!trained),
                other => panic!("expected a scored tick, got {:?}", other),
            }
        }

        harness.collector.push(Ok(pegged_cpu_sample(99)));
        let outcome = monitor.tick().await.unwrap();
        let TickOutcome::Scored {
            verdict, dispatch, ..
        } = outcome
        else {
            panic!("expected a scored tick");
        };
        assert!(verdict.is_alert);
        assert_eq!(verdict.label, Label::Anomaly);
        let offset = monitor.state().detector().unwrap().forest().offset().unwrap();
        assert!(verdict.score < offset);

        let report = dispatch.unwrap();
        assert_eq!(report.delivered, vec!["recording".to_string()]);
        assert!(report.failed.is_empty());

        let sent = harness.dispatcher.sent.lock().unwrap();
        let (last, score) = sent.last().unwrap();
        assert_eq!(last.cpu_percent, 99.9);
        assert_eq!(*score, verdict.score);
        drop(sent);

        assert_eq!(monitor.buffer().len(), 151);
        assert_eq!(harness.history.read_all().unwrap().len(), 151);

        let audit = harness.audit.read_all().unwrap();
        let samples: Vec<_> = audit.iter().filter(|r| r.kind == AuditKind::Sample).collect();
        assert_eq!(samples.len(), 151);
        assert!(samples[..99].iter().all(|r| r.score.is_none()));
        assert!(samples[99..].iter().all(|r| r.score.is_some()));
        let last_alert = audit.last().unwrap();
        assert_eq!(last_alert.kind, AuditKind::Alert);
        assert_eq!(last_alert.metrics.load_avg, 50.0);
        assert_eq!(last_alert.score, Some(verdict.score));
    }

    #[tokio::test]
    async fn test_pegged_cpu_alerts_across_seeds() {
        for seed in 0..20 {
            let mut samples = normal_samples(150, seed);
            samples.push(pegged_cpu_sample(1000 + seed));
            let harness = Harness::new(samples);
            let mut monitor = harness.build(100);

            let mut last = None;
            for _ in 0..151 {
                last = Some(monitor.tick().await.unwrap());
            }
            let Some(TickOutcome::Scored {
                verdict, dispatch, ..
            }) = last
            else {
                panic!("seed {}: expected a scored tick", seed);
            };
            assert!(
                verdict.is_alert,
                "seed {}: score {} label {} did not alert",
                seed, verdict.score, verdict.label
            );
            assert_eq!(
                dispatch.unwrap().delivered,
                vec!["recording".to_string()],
                "seed {}",
                seed
            );
        }
    }

    #[tokio::test]
    async fn test_persisted_model_skips_cold_start() {
        let harness = Harness::new(normal_samples(40, 3));
        let mut first = harness.build(20);
        for _ in 0..20 {
            first.tick().await.unwrap();
        }
        assert_eq!(first.phase(), MonitorPhase::Trained);
        drop(first);

        let mut second = harness.build(20);
        assert_eq!(second.phase(), MonitorPhase::Trained);
        match second.tick().await.unwrap() {
            TickOutcome::Scored { trained, .. } => assert!(!trained),
            other => panic!("expected a scored tick, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_model_starts_cold() {
        let harness = Harness::new(normal_samples(5, 1));
        std::fs::create_dir_all(harness.model_store.path().parent().unwrap()).unwrap();
        std::fs::write(harness.model_store.path(), b"not a model").unwrap();

        let mut monitor = harness.build(16);
        assert_eq!(monitor.phase(), MonitorPhase::Collecting);
        assert!(matches!(
            monitor.tick().await.unwrap(),
            TickOutcome::Collecting { collected: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_collection_error_skips_tick() {
        let harness = Harness::new(Vec::new());
        harness
            .collector
            .push(Err(DetectorError::Collection("proc unreadable".to_string())));
        harness.collector.push(Ok(normal_samples(1, 2).remove(0)));

        let health = HealthRegistry::new();
        health.register(components::COLLECTOR).await;
        let mut monitor = harness
            .builder(test_config(16))
            .health(health.clone())
            .build()
            .unwrap();

        let err = monitor.tick().await.unwrap_err();
        assert!(err.is_tick_local());
        assert!(monitor.buffer().is_empty());
        let status = health.health().await;
        assert_eq!(
            status.components[components::COLLECTOR].status,
            ComponentStatus::Degraded
        );

        monitor.tick().await.unwrap();
        assert_eq!(monitor.buffer().len(), 1);
        let status = health.health().await;
        assert_eq!(
            status.components[components::COLLECTOR].status,
            ComponentStatus::Healthy
        );
        assert_eq!(status.monitor.buffered, 1);
        assert_eq!(status.monitor.training_threshold, 16);
        assert!(status.monitor.last_tick.is_some());
    }

    #[tokio::test]
    async fn test_repeated_collection_failures_mark_collector_unhealthy() {
        let harness = Harness::new(Vec::new());
        let health = HealthRegistry::new();
        let mut monitor = harness
            .builder(test_config(16))
            .health(health.clone())
            .build()
            .unwrap();

        // The scripted collector fails once its queue is empty
        for attempt in 1..=COLLECTOR_UNHEALTHY_AFTER {
            assert!(monitor.tick().await.is_err());
            let expected = if attempt < COLLECTOR_UNHEALTHY_AFTER {
                ComponentStatus::Degraded
            } else {
                ComponentStatus::Unhealthy
            };
            assert_eq!(
                health.health().await.components[components::COLLECTOR].status,
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_sample_is_not_recorded() {
        let mut bad = normal_samples(1, 4).remove(0);
        bad.memory_percent = f64::NAN;
        let harness = Harness::new(vec![bad]);
        let mut monitor = harness.build(16);

        let err = monitor.tick().await.unwrap_err();
        assert!(matches!(err, DetectorError::Schema(_)));
        assert!(monitor.buffer().is_empty());
        assert!(harness.history.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_model_in_memory() {
        let dir = TempDir::new().unwrap();
        let models_dir = dir.path().join("models");

        let collector = Arc::new(ScriptedCollector::new(
            normal_samples(17, 5).into_iter().map(Ok),
        ));
        let mut monitor = MonitorLoopBuilder::new()
            .config(test_config(16))
            .collector(collector)
            .model_store(ModelStore::new(models_dir.join("detector.bin")))
            .build()
            .unwrap();

        // A regular file where the model directory should be
        std::fs::write(&models_dir, b"file, not a directory").unwrap();

        for _ in 0..16 {
            monitor.tick().await.unwrap();
        }
        assert_eq!(monitor.phase(), MonitorPhase::Trained);
        assert!(matches!(
            monitor.tick().await.unwrap(),
            TickOutcome::Scored { trained: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_restores_history_on_startup() {
        let harness = Harness::new(normal_samples(1, 6));
        for sample in normal_samples(20, 8) {
            harness.history.append(&sample).unwrap();
        }

        let config = MonitorConfig {
            restore_history: true,
            ..test_config(16)
        };
        let mut monitor = harness.builder(config).build().unwrap();
        assert_eq!(monitor.buffer().len(), 20);
        assert_eq!(monitor.phase(), MonitorPhase::Collecting);

        match monitor.tick().await.unwrap() {
            TickOutcome::Scored { trained, .. } => assert!(trained),
            other => panic!("expected a scored tick, got {:?}", other),
        }
        assert_eq!(monitor.buffer().len(), 21);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let harness = Harness::new(normal_samples(500, 9));
        let mut monitor = harness.build(16);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            monitor.run(rx).await;
            monitor
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        let mut monitor = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monitor.phase(), MonitorPhase::Stopped);
        assert!(!monitor.buffer().is_empty());
        assert_eq!(monitor.tick().await.unwrap(), TickOutcome::Stopped);
    }

    #[test]
    fn test_builder_validation() {
        let harness = Harness::new(Vec::new());

        let missing_collector = MonitorLoopBuilder::new()
            .model_store(harness.model_store.clone())
            .build();
        assert!(matches!(
            missing_collector,
            Err(DetectorError::InvalidConfig(_))
        ));

        let too_small = harness.builder(test_config(10)).build();
        assert!(matches!(too_small, Err(DetectorError::InvalidConfig(_))));

        let over_capacity = harness
            .builder(MonitorConfig {
                history_capacity: 50,
                ..test_config(100)
            })
            .build();
        assert!(matches!(over_capacity, Err(DetectorError::InvalidConfig(_))));

        assert!(harness.builder(test_config(16)).build().is_ok());
    }

    #[test]
    fn test_train_from_empty_history_writes_nothing() {
        let harness = Harness::new(Vec::new());
        let err = train_from_history(
            &harness.history,
            &harness.model_store,
            ForestConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DetectorError::InsufficientData {
                required: 16,
                available: 0
            }
        ));
        assert!(!harness.model_store.exists());
    }

    #[test]
    fn test_train_from_history() {
        let harness = Harness::new(Vec::new());
        for sample in normal_samples(40, 11) {
            harness.history.append(&sample).unwrap();
        }

        let report = train_from_history(
            &harness.history,
            &harness.model_store,
            ForestConfig::default(),
        )
        .unwrap();
        assert_eq!(report.samples, 40);
        assert_eq!(report.path, harness.model_store.path());
        assert!(report.offset < 0.0);

        let persisted = harness.model_store.load().unwrap().unwrap();
        assert_eq!(persisted.sample_count, 40);
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.training_threshold, 100);
        assert_eq!(config.history_capacity, 1000);
        assert!(config.validate().is_ok());
    }
}
