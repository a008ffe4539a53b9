//! Registry integration tests
//!
//! This module tests the registry as used per request, including:
//! - Retrying loaders skipped by their dispatch predicate
//! - Ticker mode dispatching on an interval
//! - Provider-built registries sharing loader registrations
//! - Lookups, lazy registration, duplicate names and combined statistics

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::*;
use dgs_dataloader::{
    DataLoader, DataLoaderError, DataLoaderOptions, DataLoaderProvider, DataLoaderRegistry,
    DispatchPredicate, InstrumentationCustomizer, LoaderStatus, WithContext,
    WrapWithContextCustomizer,
};
use dgs_shared_config::DataLoaderConfig;

fn upper(name: &'static str) -> DataLoader<String, String> {
    DataLoader::new(name, uppercase_list())
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn test_skipped_loader_is_retried() {
    init_tracing();
    let registry = DataLoaderRegistry::builder()
        .schedule_duration(Duration::from_millis(5))
        .build();
    let loader = upper("delayed");
    registry
        .register_with_predicate(
            loader.clone(),
            DispatchPredicate::longer_than(Duration::from_millis(20)),
        )
        .unwrap();

    let pending = loader.load("late".to_string());
    assert_eq!(registry.dispatch_all_with_count().await, 0);
    assert_eq!(loader.dispatch_depth(), 1);

    let value = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("retry dispatches the loader")
        .unwrap();
    assert_eq!(value, "LATE");
    assert_eq!(loader.dispatch_depth(), 0);
}

#[tokio::test]
async fn test_ticker_mode_waits_for_ticker() {
    init_tracing();
    let registry = DataLoaderRegistry::builder()
        .schedule_duration(Duration::from_millis(5))
        .ticker_mode(true)
        .build();
    let loader = upper("ticking");
    registry
        .register_with_predicate(
            loader.clone(),
            DispatchPredicate::longer_than(Duration::from_millis(20)),
        )
        .unwrap();

    let pending = loader.load("tick".to_string());
    registry.dispatch_all().await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(loader.dispatch_depth(), 1);

    let ticker = registry.start_ticker();
    assert!(ticker.is_running());
    let value = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("ticker dispatches the loader")
        .unwrap();
    assert_eq!(value, "TICK");
    ticker.stop();
}

#[tokio::test]
async fn test_dropping_ticker_stops_dispatching() {
    init_tracing();
    let registry = DataLoaderRegistry::builder()
        .schedule_duration(Duration::from_millis(2))
        .ticker_mode(true)
        .build();
    let loader = upper("stopped");
    registry.register(loader.clone()).unwrap();

    let ticker = registry.start_ticker();
    let first = loader.load("one".to_string());
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), first).await.unwrap().unwrap(),
        "ONE"
    );

    drop(ticker);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let _second = loader.load("two".to_string());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(loader.dispatch_depth(), 1);
}

#[tokio::test]
async fn test_custom_predicate_sees_loader_name() {
    init_tracing();
    let registry = DataLoaderRegistry::builder()
        .ticker_mode(true)
        .default_predicate(DispatchPredicate::new(|name: &str, status: &LoaderStatus| {
            name.starts_with("eager") && status.dispatch_depth > 0
        }))
        .build();
    let eager = upper("eager-users");
    let lazy = upper("lazy-users");
    registry.register(eager.clone()).unwrap();
    registry.register(lazy.clone()).unwrap();

    let a = eager.load("a".to_string());
    let _b = lazy.load("b".to_string());
    assert_eq!(registry.dispatch_all_with_count().await, 1);
    assert_eq!(a.await.unwrap(), "A");
    assert_eq!(lazy.dispatch_depth(), 1);

    assert_eq!(registry.dispatch_all_immediately().await, 1);
    assert_eq!(registry.dispatch_depth(), 0);
}

// =============================================================================
// Provider-built registries
// =============================================================================

#[tokio::test]
async fn test_provider_registries_are_independent() {
    init_tracing();
    let log = EventLog::new();
    let provider = DataLoaderProvider::builder()
        .customizer(WrapWithContextCustomizer)
        .customizer(InstrumentationCustomizer::new(recording_hooks(&["H1"], &log)))
        .register("upper", uppercase_list())
        .unwrap()
        .register("mapped", uppercase_mapped())
        .unwrap()
        .build();
    assert_eq!(provider.loader_names(), ["upper", "mapped"]);

    let first = provider.build_registry().unwrap();
    let second = provider.build_registry().unwrap();
    assert!(!first.ptr_eq(&second));

    let a = first.get::<String, String>("upper").unwrap().load("a".to_string());
    assert_eq!(first.dispatch_depth(), 1);
    assert_eq!(second.dispatch_depth(), 0);

    assert_eq!(first.dispatch_all_with_count().await, 1);
    assert_eq!(a.await.unwrap(), "A");
    assert_eq!(second.statistics().load_count, 0);
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_provider_config_disables_caching() {
    init_tracing();
    let config = DataLoaderConfig {
        caching_enabled: false,
        ..Default::default()
    };
    let provider = DataLoaderProvider::builder()
        .config(&config)
        .register("upper", uppercase_list())
        .unwrap()
        .register_with_options(
            "cached",
            uppercase_list(),
            DataLoaderOptions::default(),
        )
        .unwrap()
        .build();
    let registry = provider.build_registry().unwrap();

    let upper = registry.get::<String, String>("upper").unwrap();
    let cached = registry.get::<String, String>("cached").unwrap();
    assert!(!upper.options().caching_enabled);
    assert!(cached.options().caching_enabled);

    let _ = upper.load("x".to_string());
    let _ = upper.load("x".to_string());
    let _ = cached.load("x".to_string());
    let _ = cached.load("x".to_string());
    assert_eq!(upper.dispatch_depth(), 2);
    assert_eq!(cached.dispatch_depth(), 1);
}

// =============================================================================
// Lookups and statistics
// =============================================================================

#[test]
fn test_lookup_errors() {
    init_tracing();
    let registry = DataLoaderRegistry::new();
    registry.register(upper("users")).unwrap();

    assert_matches!(
        registry.register(upper("users")),
        Err(DataLoaderError::DuplicateLoader(name)) if name == "users"
    );
    assert_matches!(
        registry.get::<String, String>("posts"),
        Err(DataLoaderError::UnknownLoader(name)) if name == "posts"
    );
    assert_matches!(
        registry.get::<u64, String>("users"),
        Err(err @ DataLoaderError::TypeMismatch { .. }) => {
            assert!(err.is_configuration());
            assert_eq!(err.loader_name(), Some("users"));
        }
    );
}

#[test]
fn test_compute_if_absent_hands_registry_to_new_consumer() {
    init_tracing();
    let registry = DataLoaderRegistry::new();
    let capture = RegistryCapture::new();

    let loader = registry
        .compute_if_absent("capturing", |name| {
            DataLoader::new(name.to_string(), RegistryCapturingLoader::<WithContext>::new(&capture))
        })
        .unwrap();
    assert_eq!(loader.name(), "capturing");
    assert_eq!(capture.times_set(), 1);
    assert!(capture.registry().unwrap().ptr_eq(&registry));

    let again = registry
        .compute_if_absent::<String, String, _>("capturing", |_| upper("capturing"))
        .unwrap();
    assert!(again.ptr_eq(&loader));
    assert_eq!(capture.times_set(), 1);
}

#[test]
fn test_duplicate_provider_registration() {
    init_tracing();
    let result = DataLoaderProvider::builder()
        .register("users", uppercase_list())
        .unwrap()
        .register("users", uppercase_mapped());
    assert_matches!(result, Err(DataLoaderError::DuplicateLoader(name)) if name == "users");
}

#[tokio::test]
async fn test_statistics_combine_across_loaders() {
    init_tracing();
    let registry = DataLoaderRegistry::new();
    let users = upper("users");
    let failing = DataLoader::new("failing", failing_loader(test_error("offline")));
    registry.register(users.clone()).unwrap();
    registry.register(failing.clone()).unwrap();

    let a = users.load("a".to_string());
    let a_again = users.load("a".to_string());
    let b = failing.load("b".to_string());
    assert_eq!(registry.dispatch_all_with_count().await, 2);

    assert_eq!(a.await.unwrap(), "A");
    assert_eq!(a_again.await.unwrap(), "A");
    assert!(b.await.is_err());

    let stats = registry.statistics();
    assert_eq!(stats.load_count, 3);
    assert_eq!(stats.cache_hit_count, 1);
    assert_eq!(stats.batch_invoke_count, 2);
    assert_eq!(stats.batch_load_exception_count, 1);
    assert_eq!(stats.load_error_count, 1);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["load_count"], 3);
}
