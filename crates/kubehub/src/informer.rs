//! Per-kind informer: turns the kube watcher stream into add/update/delete
//! callbacks on a `WatchUnit`, with a local cache for previous object state and
//! periodic resync.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, DynamicObject},
    core::{ApiResource, TypeMeta},
    runtime::{watcher, WatchStreamExt},
};
use kwatch_core::{EmitError, ObjectTree, SyncFlag, WatchUnit};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Cache key: `namespace/name`, or `name` for cluster-scoped objects.
pub fn object_key(obj: &ObjectTree) -> String {
    let meta = obj.get("metadata");
    let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("");
    match meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()) {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Last observed state per object, used to derive add/update/delete.
#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: HashMap<String, ObjectTree>,
}

impl ObjectCache {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ObjectTree> {
        self.objects.get(key)
    }

    pub fn apply(&mut self, unit: &WatchUnit, obj: ObjectTree) -> Result<(), EmitError> {
        let key = object_key(&obj);
        match self.objects.get(&key) {
            Some(old) => unit.on_update(old, &obj)?,
            None => unit.on_add(&obj)?,
        }
        self.objects.insert(key, obj);
        Ok(())
    }

    pub fn delete(&mut self, unit: &WatchUnit, obj: ObjectTree) -> Result<(), EmitError> {
        self.objects.remove(&object_key(&obj));
        unit.on_delete(&obj)
    }

    /// Full relist: known objects are updates, unknown are adds, and cached
    /// objects missing from the list are deleted with their last known state.
    pub fn replace(&mut self, unit: &WatchUnit, list: Vec<ObjectTree>) -> Result<(), EmitError> {
        let mut previous = std::mem::take(&mut self.objects);
        for obj in list {
            let key = object_key(&obj);
            match previous.remove(&key) {
                Some(old) => unit.on_update(&old, &obj)?,
                None => unit.on_add(&obj)?,
            }
            self.objects.insert(key, obj);
        }
        let mut gone: Vec<_> = previous.into_iter().collect();
        gone.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, obj) in gone {
            unit.on_delete(&obj)?;
        }
        Ok(())
    }

    /// Redeliver every cached object as an update against itself.
    pub fn resync(&self, unit: &WatchUnit) -> Result<(), EmitError> {
        for obj in self.objects.values() {
            unit.on_update(obj, obj)?;
        }
        Ok(())
    }
}

/// Watch subscription for one resource kind.
pub struct Informer {
    unit: WatchUnit,
    api: Api<DynamicObject>,
    resource: ApiResource,
    synced: SyncFlag,
    resync: Option<Duration>,
}

impl Informer {
    pub fn new(unit: WatchUnit, api: Api<DynamicObject>, resource: ApiResource, resync: Option<Duration>) -> Self {
        Self { unit, api, resource, synced: SyncFlag::new(), resync }
    }

    pub fn unit(&self) -> &WatchUnit {
        &self.unit
    }

    pub fn synced(&self) -> SyncFlag {
        self.synced.clone()
    }

    /// Run until `cancel` fires. Returns an error only when emission fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), EmitError> {
        let span = self.unit.span().clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(self, cancel: CancellationToken) -> Result<(), EmitError> {
        let stream = watcher(self.api.clone(), watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        let mut cache = ObjectCache::default();
        let mut resync = self.resync.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        info!(gvr = %self.unit.identity(), "watcher started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(cached = cache.len(), "watcher stopping");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => handle_event(&mut cache, &self.unit, &self.synced, &self.resource, event)?,
                    Some(Err(e)) => warn!(error = %e, "watch stream error"),
                    None => {
                        warn!("watcher stream ended");
                        return Ok(());
                    }
                },
                _ = tick(&mut resync) => cache.resync(&self.unit)?,
            }
        }
    }
}

/// Route one watcher event through the cache. The first relist marks `synced`.
pub fn handle_event(
    cache: &mut ObjectCache,
    unit: &WatchUnit,
    synced: &SyncFlag,
    resource: &ApiResource,
    event: watcher::Event<DynamicObject>,
) -> Result<(), EmitError> {
    match event {
        watcher::Event::Applied(obj) => {
            if let Some(tree) = to_tree(obj, resource) {
                cache.apply(unit, tree)?;
            }
        }
        watcher::Event::Deleted(obj) => {
            if let Some(tree) = to_tree(obj, resource) {
                cache.delete(unit, tree)?;
            }
        }
        watcher::Event::Restarted(list) => {
            debug!(count = list.len(), "watch relist");
            cache.replace(unit, list.into_iter().filter_map(|obj| to_tree(obj, resource)).collect())?;
            if !synced.is_synced() {
                synced.mark_synced();
                info!(count = cache.len(), "initial list received");
            }
        }
    }
    Ok(())
}

/// List items arrive without `apiVersion`/`kind`; fill them from the resolved
/// resource so listed and watched states compare equal.
fn to_tree(mut obj: DynamicObject, resource: &ApiResource) -> Option<ObjectTree> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: resource.api_version.clone(), kind: resource.kind.clone() });
    }
    match serde_json::to_value(&obj) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, name = ?obj.metadata.name, "skipping unserializable object");
            None
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::core::ObjectList;
    use kwatch_core::{EventEmitter, FilterSpec, MemorySink, ResourceIdentity};
    use serde_json::json;
    use std::sync::Arc;

    fn pods() -> ApiResource {
        ApiResource::erase::<Pod>(&())
    }

    fn dynamic(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn unit(filter: FilterSpec) -> (WatchUnit, MemorySink) {
        let sink = MemorySink::new();
        let emitter = Arc::new(EventEmitter::new(sink.clone()));
        (WatchUnit::new(ResourceIdentity::new("", "v1", "pods"), filter, emitter), sink)
    }

    fn pod(ns: &str, name: &str, rv: &str, image: &str) -> ObjectTree {
        json!({
            "metadata": {"name": name, "namespace": ns, "resourceVersion": rv},
            "spec": {"image": image}
        })
    }

    fn ignore_rv() -> FilterSpec {
        FilterSpec { exclude_paths: vec!["metadata.resourceVersion".into()], ..Default::default() }
    }

    fn event_types(sink: &MemorySink) -> Vec<String> {
        sink.records().iter().map(|r| r["eventType"].as_str().unwrap_or("").to_string()).collect()
    }

    #[test]
    fn object_key_includes_namespace_when_present() {
        assert_eq!(object_key(&pod("ns", "a", "1", "x")), "ns/a");
        assert_eq!(object_key(&json!({"metadata": {"name": "node-1"}})), "node-1");
        assert_eq!(object_key(&json!({"metadata": {"name": "n", "namespace": ""}})), "n");
    }

    #[test]
    fn apply_adds_then_updates() {
        let (u, sink) = unit(ignore_rv());
        let mut cache = ObjectCache::default();
        cache.apply(&u, pod("default", "a", "1", "nginx:1")).unwrap();
        cache.apply(&u, pod("default", "a", "2", "nginx:1")).unwrap();
        cache.apply(&u, pod("default", "a", "3", "nginx:2")).unwrap();
        assert_eq!(event_types(&sink), vec!["Add", "Update"]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("default/a").unwrap()["metadata"]["resourceVersion"], "3");
    }

    #[test]
    fn delete_removes_from_cache() {
        let (u, sink) = unit(ignore_rv());
        let mut cache = ObjectCache::default();
        cache.apply(&u, pod("default", "a", "1", "nginx")).unwrap();
        cache.delete(&u, pod("default", "a", "2", "nginx")).unwrap();
        assert!(cache.is_empty());
        assert_eq!(event_types(&sink), vec!["Add", "Delete"]);
    }

    #[test]
    fn relist_diffs_against_cache() {
        let (u, sink) = unit(ignore_rv());
        let mut cache = ObjectCache::default();
        cache.replace(&u, vec![pod("default", "a", "1", "nginx"), pod("default", "b", "1", "redis")]).unwrap();
        assert_eq!(event_types(&sink), vec!["Add", "Add"]);

        cache
            .replace(&u, vec![pod("default", "a", "5", "nginx"), pod("default", "c", "1", "envoy")])
            .unwrap();
        assert_eq!(event_types(&sink), vec!["Add", "Add", "Add", "Delete"]);
        let last = sink.records().pop().unwrap();
        assert_eq!(last["obj"]["metadata"]["name"], "b");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn resync_is_suppressed() {
        let (u, sink) = unit(FilterSpec::default());
        let mut cache = ObjectCache::default();
        cache.apply(&u, pod("default", "a", "1", "nginx")).unwrap();
        cache.resync(&u).unwrap();
        cache.resync(&u).unwrap();
        assert_eq!(event_types(&sink), vec!["Add"]);
    }

    #[test]
    fn out_of_scope_objects_are_cached_but_silent() {
        let filter = FilterSpec { namespaces: vec!["default".into()], ..Default::default() };
        let (u, sink) = unit(filter);
        let mut cache = ObjectCache::default();
        cache.apply(&u, pod("kube-system", "dns", "1", "coredns")).unwrap();
        cache.apply(&u, pod("kube-system", "dns", "2", "coredns:2")).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn listed_items_get_type_fields_and_match_later_watch_events() {
        let filter = FilterSpec {
            exclude_paths: vec!["metadata.resourceVersion".into(), "metadata.annotations".into()],
            ..Default::default()
        };
        let (u, sink) = unit(filter);
        let mut cache = ObjectCache::default();
        let synced = SyncFlag::new();

        let list: ObjectList<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {"resourceVersion": "10"},
            "items": [{
                "metadata": {"name": "web-0", "namespace": "default", "resourceVersion": "9"},
                "spec": {"x": 1}
            }]
        }))
        .unwrap();
        assert!(list.items[0].types.is_none());
        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Restarted(list.items)).unwrap();

        let watched = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-0",
                "namespace": "default",
                "resourceVersion": "11",
                "annotations": {"heartbeat": "t1"}
            },
            "spec": {"x": 1}
        }));
        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Applied(watched)).unwrap();

        let records = sink.records();
        assert_eq!(event_types(&sink), vec!["Add"]);
        assert_eq!(records[0]["obj"]["apiVersion"], "v1");
        assert_eq!(records[0]["obj"]["kind"], "Pod");
    }

    #[test]
    fn relist_marks_synced_and_watch_events_do_not() {
        let (u, sink) = unit(ignore_rv());
        let mut cache = ObjectCache::default();
        let synced = SyncFlag::new();
        let obj = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "a", "namespace": "default"}});

        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Applied(dynamic(obj.clone()))).unwrap();
        assert!(!synced.is_synced());

        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Restarted(vec![dynamic(obj.clone())])).unwrap();
        assert!(synced.is_synced());

        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Restarted(Vec::new())).unwrap();
        assert!(synced.is_synced());
        assert_eq!(event_types(&sink), vec!["Add", "Delete"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn applied_and_deleted_route_to_add_and_delete() {
        let (u, sink) = unit(ignore_rv());
        let mut cache = ObjectCache::default();
        let synced = SyncFlag::new();
        let obj = json!({"metadata": {"name": "b", "namespace": "default"}, "spec": {"image": "nginx"}});

        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Applied(dynamic(obj.clone()))).unwrap();
        handle_event(&mut cache, &u, &synced, &pods(), watcher::Event::Deleted(dynamic(obj))).unwrap();

        let records = sink.records();
        assert_eq!(event_types(&sink), vec!["Add", "Delete"]);
        assert_eq!(records[1]["obj"]["kind"], "Pod");
        assert_eq!(records[1]["obj"]["spec"]["image"], "nginx");
    }
}
