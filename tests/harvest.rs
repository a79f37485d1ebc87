//! End-to-end harvest runs against an in-memory catalog

mod common;

use std::sync::Arc;

use common::{catalog, harvester, keys, PanickingCollector, ScriptedCollector, Step, TableValidator, SCORES};
use proxy_harvest::config::DatabaseConfig;
use proxy_harvest::{
    Candidate, Catalog, Collector, CollectorRegistry, EnrichedRecord, HarvestError, Harvester,
    JobStatus, JobTracker, Orchestrator, ProxyDatabase, ProxyType, Score,
};

#[tokio::test]
async fn test_two_collectors_share_one_entry() {
    let catalog = catalog().await;
    let validator = TableValidator::new()
        .speed("10.1.1.1", 1, "a", 50.0)
        .speed("10.1.1.1", 1, "b", 80.0);
    let collectors = vec![
        ScriptedCollector::new("a", vec![Step::Yield("10.1.1.1", 1), Step::Yield("10.2.2.2", 2)]),
        ScriptedCollector::new("b", vec![Step::Yield("10.1.1.1", 1)]),
    ];
    let tracker = JobTracker::new(Arc::new(harvester(&catalog, validator, collectors)));

    let job = tracker.submit("spider").await.unwrap().wait().await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.harvest, 1);
    assert_eq!(keys(&catalog).await, vec!["10.1.1.1:1"]);

    let entry = &catalog.database().list_proxies(10).await.unwrap()[0];
    assert!(entry.speed == 50.0 || entry.speed == 80.0);
    assert_eq!(entry.origin, if entry.speed == 50.0 { "a" } else { "b" });
    // The second merge is always a rediscovery.
    assert_eq!(entry.score, Score { score: SCORES.max, power: 0 });
}

#[tokio::test]
async fn test_faulting_collector_does_not_affect_siblings() {
    let catalog = catalog().await;
    let validator = TableValidator::new()
        .speed("10.0.0.1", 80, "broken", 1.0)
        .speed("10.0.0.2", 80, "broken", 1.0)
        .speed("10.0.1.1", 80, "healthy", 1.0)
        .speed("10.0.1.2", 80, "healthy", 1.0)
        .speed("10.0.1.3", 80, "healthy", 1.0);
    let collectors = vec![
        ScriptedCollector::new(
            "broken",
            vec![
                Step::Yield("10.0.0.1", 80),
                Step::Fault("page layout changed"),
                Step::Yield("10.0.0.2", 80),
            ],
        ),
        ScriptedCollector::new(
            "healthy",
            vec![
                Step::Yield("10.0.1.1", 80),
                Step::Yield("10.0.1.2", 80),
                Step::Yield("10.0.1.3", 80),
            ],
        ),
    ];

    let report = harvester(&catalog, validator, collectors).run_once().await.unwrap();

    assert_eq!(
        keys(&catalog).await,
        vec!["10.0.0.1:80", "10.0.1.1:80", "10.0.1.2:80", "10.0.1.3:80"]
    );
    let faulted: Vec<_> = report.faulted().map(|c| c.collector.as_str()).collect();
    assert_eq!(faulted, vec!["broken"]);
    assert_eq!(report.collectors[0].inserted, 1);
    assert!(report.collectors[0].fault.as_deref().unwrap().contains("page layout changed"));
    assert_eq!(report.collectors[1].inserted, 3);
    assert!(report.collectors[1].fault.is_none());
}

#[tokio::test]
async fn test_failing_candidate_is_skipped() {
    let catalog = catalog().await;
    let validator = TableValidator::new()
        .broken("10.0.0.2")
        .speed("10.0.0.1", 80, "a", 0.5)
        .speed("10.0.0.3", 80, "a", 0.5);
    let collectors = vec![ScriptedCollector::new(
        "a",
        vec![
            Step::Yield("10.0.0.1", 80),
            Step::Yield("10.0.0.2", 80),
            Step::Yield("10.0.0.3", 80),
        ],
    )];

    let report = harvester(&catalog, validator, collectors).run_once().await.unwrap();

    assert_eq!(keys(&catalog).await, vec!["10.0.0.1:80", "10.0.0.3:80"]);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.inserted(), 2);
    assert!(report.collectors[0].fault.is_none());
}

#[tokio::test]
async fn test_invalid_candidates_are_never_stored() {
    let catalog = catalog().await;
    let collectors = vec![ScriptedCollector::new(
        "a",
        vec![Step::Yield("10.0.0.1", 80), Step::Yield("10.0.0.2", 80)],
    )];

    let report = harvester(&catalog, TableValidator::new(), collectors)
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.rejected(), 2);
    assert_eq!(catalog.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_panicking_collector_is_contained() {
    let catalog = catalog().await;
    let healthy = ScriptedCollector::new("healthy", vec![Step::Yield("10.0.1.1", 80)]);
    let validator = TableValidator::new().speed("10.0.1.1", 80, "healthy", 1.0);
    let orchestrator = Orchestrator::new(Arc::new(validator), catalog.clone());

    let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(PanickingCollector), Arc::new(healthy)];
    let report = orchestrator.run(collectors).await;

    assert_eq!(keys(&catalog).await, vec!["10.0.1.1:80"]);
    assert_eq!(report.collectors[0].collector, "panicking");
    assert!(report.collectors[0].fault.is_some());
    assert_eq!(report.collectors[1].inserted, 1);
}

#[tokio::test]
async fn test_harvest_counts_only_new_entries() {
    let catalog = catalog().await;
    let existing = EnrichedRecord::from_candidate(Candidate::new("10.9.9.9", 80, ProxyType::Http, "seed"), 1.0);
    catalog.merge(&existing).await.unwrap();

    let validator = TableValidator::new()
        .speed("10.0.0.1", 80, "a", 0.5)
        .speed("10.0.0.2", 80, "a", 0.5)
        .speed("10.0.0.3", 80, "a", 0.5);
    let collectors = vec![ScriptedCollector::new(
        "a",
        vec![
            Step::Yield("10.0.0.1", 80),
            Step::Yield("10.0.0.2", 80),
            Step::Yield("10.0.0.3", 80),
        ],
    )];
    let tracker = JobTracker::new(Arc::new(harvester(&catalog, validator, collectors)));

    let handle = tracker.submit("spider").await.unwrap();
    let pending = tracker.find(handle.id()).await.unwrap().unwrap();
    assert!(pending.status == JobStatus::Pending || pending.status == JobStatus::Success);

    let job = handle.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.harvest, 3);
    assert_eq!(catalog.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_replay_keeps_key_set() {
    let catalog = catalog().await;
    let build = |catalog: &Catalog| {
        let validator = TableValidator::new()
            .speed("10.0.0.1", 80, "a", 0.5)
            .speed("10.0.0.2", 8080, "a", 0.7);
        let collectors = vec![ScriptedCollector::new(
            "a",
            vec![Step::Yield("10.0.0.1", 80), Step::Yield("10.0.0.2", 8080)],
        )];
        harvester(catalog, validator, collectors)
    };

    let first = build(&catalog).run_once().await.unwrap();
    let keys_after_first = keys(&catalog).await;
    let before = catalog.database().list_proxies(10).await.unwrap();

    let second = build(&catalog).run_once().await.unwrap();
    let after = catalog.database().list_proxies(10).await.unwrap();

    assert_eq!(first.inserted(), 2);
    assert_eq!(second.inserted(), 0);
    assert_eq!(second.updated(), 2);
    assert_eq!(keys(&catalog).await, keys_after_first);
    for entry in &after {
        let previous = before.iter().find(|e| e.id == entry.id).unwrap();
        assert_eq!(entry.created_at, previous.created_at);
        assert!(entry.discovered_at >= previous.discovered_at);
        assert_eq!(entry.score, Score { score: SCORES.max, power: 0 });
    }
}

#[tokio::test]
async fn test_concurrent_rediscovery_keeps_keys_unique() {
    let catalog = catalog().await;
    let names: Vec<String> = (0..8).map(|i| format!("c{}", i)).collect();
    let origins: Vec<&str> = names.iter().map(String::as_str).collect();
    let addresses: Vec<&'static str> = vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"];

    let mut validator = TableValidator::new();
    for address in &addresses {
        for port in [80, 8080] {
            validator = validator.speeds(address, port, &origins, 0.3);
        }
    }
    let collectors = names
        .iter()
        .map(|name| {
            let steps = addresses
                .iter()
                .flat_map(|a| [Step::Yield(*a, 80), Step::Yield(*a, 8080)])
                .collect();
            ScriptedCollector::new(name, steps)
        })
        .collect();

    let report = harvester(&catalog, validator, collectors).run_once().await.unwrap();

    assert_eq!(catalog.count().await.unwrap(), 10);
    assert_eq!(keys(&catalog).await.len(), 10);
    assert_eq!(report.inserted(), 10);
    assert_eq!(report.inserted() + report.updated(), 80);
}

#[tokio::test]
async fn test_concurrent_collectors_on_file_database_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("proxies.db").display()),
        max_connections: 1,
    };
    let catalog = Catalog::new(ProxyDatabase::connect(&config).await.unwrap(), SCORES);

    let names: Vec<String> = (0..8).map(|i| format!("c{}", i)).collect();
    let origins: Vec<&str> = names.iter().map(String::as_str).collect();
    let ports: Vec<u16> = (1..=20).map(|p| 8000 + p).collect();

    let mut validator = TableValidator::new();
    for port in &ports {
        validator = validator.speeds("10.0.0.1", *port, &origins, 0.3);
    }
    let collectors = names
        .iter()
        .map(|name| {
            let steps = ports.iter().map(|p| Step::Yield("10.0.0.1", *p)).collect();
            ScriptedCollector::new(name, steps)
        })
        .collect();

    let report = harvester(&catalog, validator, collectors).run_once().await.unwrap();

    assert_eq!(report.failed(), 0);
    assert_eq!(report.inserted(), 20);
    assert_eq!(report.updated(), 140);
    assert_eq!(catalog.count().await.unwrap(), 20);
}

#[tokio::test]
async fn test_unknown_collector_aborts_before_running() {
    let catalog = catalog().await;
    let validator = TableValidator::new().speed("10.0.0.1", 80, "a", 0.5);
    let orchestrator = Orchestrator::new(Arc::new(validator), catalog.clone());

    let mut registry = CollectorRegistry::new();
    let a = ScriptedCollector::new("a", vec![Step::Yield("10.0.0.1", 80)]);
    registry.register("a", move || Ok(Arc::new(a.clone()) as Arc<dyn Collector>));
    let harvester = Harvester::new(
        registry,
        vec!["a".to_string(), "missing".to_string()],
        orchestrator,
    );

    let err = harvester.run_once().await.unwrap_err();
    assert!(matches!(err, HarvestError::Configuration { .. }));
    assert_eq!(catalog.count().await.unwrap(), 0);
}
