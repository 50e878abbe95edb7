//! End-to-end routing through interceptor, registry and adapters

use std::sync::Arc;

use dynstore_core::config::BACKEND_TYPE_MEMORY;
use dynstore_core::resolver::{ExpressionResolver, HeaderResolver};
use dynstore_core::{
    BackendAdapter, BackendConfig, CallInterceptor, CallSite, ConfigSource, ConverterChain,
    DriverRegistry, Error, Invocation, MemoryConverter, ObjectStore, ResolverChain, RouteTable,
    Settings, StaticConfigSource, StorageClient, context,
};

struct MediaService;

fn settings(strict: bool) -> Settings {
    let mut settings = Settings {
        primary: "s3a".to_string(),
        strict,
        ..Default::default()
    };
    for name in ["s3a", "s3b", "archive"] {
        let mut backend = BackendConfig::new(name, "memory://local", "ak", "sk")
            .with_type(BACKEND_TYPE_MEMORY)
            .with_default_bucket("media");
        backend.auto_create_bucket = true;
        settings.add_backend(backend);
    }
    settings
}

async fn registry(strict: bool) -> Arc<DriverRegistry> {
    let settings = StaticConfigSource::new(settings(strict)).load().unwrap();
    let converters = ConverterChain::default().with(MemoryConverter);
    Arc::new(
        DriverRegistry::from_settings(&settings, &converters)
            .await
            .unwrap(),
    )
}

fn interceptor() -> CallInterceptor {
    let routes = RouteTable::new()
        .annotate_type::<MediaService>("s3b")
        .annotate_method::<MediaService>("archive", "#role");
    CallInterceptor::new(
        routes,
        ResolverChain::new().with(HeaderResolver).with(ExpressionResolver),
    )
}

#[tokio::test]
async fn empty_key_and_primary_resolve_to_same_adapter() {
    let registry = registry(false).await;
    let by_empty = registry.resolve("").unwrap();
    let by_name = registry.resolve("s3a").unwrap();
    assert!(Arc::ptr_eq(&by_empty, &by_name));
}

#[tokio::test]
async fn unknown_key_depends_on_strict_mode() {
    let registry = registry(false).await;
    assert_eq!(registry.resolve("nope").unwrap().name(), "s3a");

    registry.set_strict(true);
    assert!(matches!(registry.resolve("nope"), Err(Error::UnknownBackend(_))));
    assert!(matches!(
        registry.unregister("s3a").await,
        Err(Error::DriverRemovalRejected(_))
    ));
}

#[tokio::test]
async fn annotated_calls_reach_their_backend() {
    let registry = registry(false).await;
    let interceptor = interceptor();
    let client = StorageClient::new(Arc::clone(&registry));

    let invocation = Invocation::new("upload").arg("key", "a.txt");
    interceptor
        .invoke(&CallSite::of::<MediaService>("upload"), &invocation, async {
            client.upload(None, "a.txt", "to s3b", None).await
        })
        .await
        .unwrap();

    let invocation = Invocation::new("archive").arg("role", "archive");
    interceptor
        .invoke(&CallSite::of::<MediaService>("archive"), &invocation, async {
            assert_eq!(context::peek(), "archive");
            client.upload(None, "b.txt", "to archive", None).await
        })
        .await
        .unwrap();

    let s3b = registry.get("s3b").unwrap();
    let archive = registry.get("archive").unwrap();
    let primary = registry.get("s3a").unwrap();
    assert!(s3b.object_exists("media", "a.txt").await.unwrap());
    assert!(archive.object_exists("media", "b.txt").await.unwrap());
    assert!(!primary.object_exists("media", "a.txt").await.unwrap());
    assert_eq!(context::depth(), 0);
}

#[tokio::test]
async fn header_overrides_argument_for_header_keys() {
    let registry = registry(false).await;
    let interceptor = interceptor();

    let invocation = Invocation::new("upload")
        .arg("tenant", "s3a")
        .header("x-tenant", "archive");
    let selected = interceptor
        .invoke_with_key("#header.x-tenant", &invocation, async {
            registry.current().map(|a| a.name().to_string())
        })
        .await
        .unwrap();
    assert_eq!(selected, "archive");
}

#[tokio::test]
async fn failing_inner_call_restores_outer_key() {
    let registry = registry(true).await;
    let interceptor = interceptor();
    let invocation = Invocation::new("archive");

    let outcome = interceptor
        .invoke_with_key("s3b", &invocation, async {
            let inner = interceptor
                .invoke_with_key("missing", &invocation, async {
                    registry.bucket_exists("media").await
                })
                .await;
            assert!(matches!(inner, Err(Error::UnknownBackend(_))));
            registry.current().map(|a| a.name().to_string())
        })
        .await;
    assert_eq!(outcome.unwrap(), "s3b");
    assert_eq!(context::peek(), "");
}

#[tokio::test]
async fn shutdown_closes_every_backend() {
    let registry = registry(false).await;
    let adapters = registry.snapshot();

    let summary = registry.shutdown().await;
    assert!(summary.is_clean());
    assert_eq!(summary.closed, vec!["archive", "s3a", "s3b"]);
    for adapter in adapters.values() {
        assert!(adapter.health_check().await.is_err());
    }
}
