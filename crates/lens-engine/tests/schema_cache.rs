use lens_engine::SchemaCache;
use lens_ir::{EntityType, FieldSpec, ScalarKind, SchemaError, SchemaGraph, SchemaProvider};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingProvider {
    builds: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
        }
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl SchemaProvider for CountingProvider {
    fn build_schema(&self, scopes: &[String]) -> Result<SchemaGraph, SchemaError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let graph = SchemaGraph::new(vec![
            EntityType::new("Order")
                .in_namespace("shop")
                .with_table("orders")
                .field(FieldSpec::new("id", ScalarKind::Integer))
                .field(FieldSpec::new("placed", ScalarKind::DateTime).nullable()),
            EntityType::new("Product")
                .in_namespace("catalog")
                .field(FieldSpec::new("id", ScalarKind::Integer)),
        ])?;
        Ok(graph.restrict_to(scopes))
    }
}

fn cache_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lens-cache-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn scopes(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_snapshot_is_reused() {
    let cache = SchemaCache::new(cache_dir("reuse"));
    let provider = CountingProvider::new();

    let first = cache.get_or_build(&provider, &scopes(&["shop"]), false).unwrap();
    let second = cache.get_or_build(&provider, &scopes(&["shop"]), false).unwrap();

    assert_eq!(provider.builds(), 1);
    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert!(second.entity("Order").is_some());
    assert!(second.entity("Product").is_none());
}

#[test]
fn test_scope_order_does_not_matter() {
    let cache = SchemaCache::new(cache_dir("order"));
    assert_eq!(
        cache.path_for(&scopes(&["shop", "catalog"])),
        cache.path_for(&scopes(&["catalog", "shop"]))
    );
    assert_ne!(cache.path_for(&scopes(&["shop"])), cache.path_for(&scopes(&["catalog"])));
}

#[test]
fn test_force_regenerate_rebuilds() {
    let cache = SchemaCache::new(cache_dir("force"));
    let provider = CountingProvider::new();

    cache.get_or_build(&provider, &scopes(&["shop"]), false).unwrap();
    cache.get_or_build(&provider, &scopes(&["shop"]), true).unwrap();
    assert_eq!(provider.builds(), 2);
}

#[test]
fn test_corrupted_snapshot_is_rebuilt() {
    let cache = SchemaCache::new(cache_dir("corrupt"));
    let provider = CountingProvider::new();
    let shop = scopes(&["shop"]);

    let path = cache.store(&shop, &provider.build_schema(&shop).unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();
    assert!(cache.load(&shop).is_none());

    let rebuilt = cache.get_or_build(&provider, &shop, false).unwrap();
    assert!(rebuilt.entity("Order").is_some());
    assert_eq!(provider.builds(), 2);
    assert!(cache.load(&shop).is_some());
}

#[test]
fn test_tampered_snapshot_is_rejected() {
    let cache = SchemaCache::new(cache_dir("tamper"));
    let provider = CountingProvider::new();
    let shop = scopes(&["shop"]);

    let path = cache.store(&shop, &provider.build_schema(&shop).unwrap()).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("\"placed\"", "\"shipped\"")).unwrap();

    assert!(cache.load(&shop).is_none());
}
