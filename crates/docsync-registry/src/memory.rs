//! In-memory registry for tests and local runs.
//!
//! Resources are JSON objects keyed by id (`resources/<key>`); the bookmarks
//! root lives at [`BOOKMARKS_ID`] and is addressed as `/bookmarks`. An object
//! holding an `_id` of an existing resource is a link and is followed during
//! path resolution. Every write bumps the resource `_rev`, stamps
//! `_meta/modifiedBy` with the writer's origin, and broadcasts one
//! [`ChangeEvent`] per bookmarks path that reaches the written resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use docsync_core::defaults::EVENT_BUS_CAPACITY;
use docsync_core::{
    Blob, ChangeEvent, ChangeFeed, ChangeStream, Error, PathPattern, ResourceStore, Result,
};

use crate::paths;

/// Resource id of the bookmarks root.
pub const BOOKMARKS_ID: &str = "resources/bookmarks";

/// Link hops followed when enumerating bookmark paths.
const MAX_LINK_DEPTH: usize = 16;

#[derive(Default)]
struct Tree {
    resources: HashMap<String, JsonValue>,
    blobs: HashMap<String, Blob>,
}

/// Shared in-memory registry. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryRegistry {
    tree: Arc<Mutex<Tree>>,
    events: broadcast::Sender<ChangeEvent>,
    origin: Option<String>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let mut tree = Tree::default();
        tree.resources.insert(
            BOOKMARKS_ID.to_string(),
            json!({
                "_id": BOOKMARKS_ID,
                "_rev": 0,
                "_type": "application/vnd.oada.bookmarks.1+json",
                "_meta": { "_id": format!("{}/_meta", BOOKMARKS_ID) }
            }),
        );
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            tree: Arc::new(Mutex::new(tree)),
            events,
            origin: None,
        }
    }

    /// A handle on the same tree whose writes are tagged with `origin`.
    pub fn with_origin(&self, origin: impl Into<String>) -> Self {
        Self {
            tree: self.tree.clone(),
            events: self.events.clone(),
            origin: Some(origin.into()),
        }
    }

    /// Receive every change event.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Current `_rev` of a resource.
    pub fn rev(&self, id: &str) -> Option<u64> {
        self.lock()
            .resources
            .get(id.trim_start_matches('/'))
            .and_then(|r| r.get("_rev"))
            .and_then(JsonValue::as_u64)
    }

    /// Number of stored resources, blobs included.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            trace!(path = %event.path, resource_id = %event.resource_id, "Change");
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryRegistry {
    async fn get(&self, path: &str) -> Result<JsonValue> {
        let tree = self.lock();
        let (id, rest) = locate(&tree, path, true)?;
        let doc = tree
            .resources
            .get(&id)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let mut value = doc;
        for segment in &rest {
            value = value
                .get(segment)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        let mut value = value.clone();
        if rest.is_empty() {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("_meta");
            }
        }
        Ok(value)
    }

    async fn put(&self, path: &str, body: JsonValue) -> Result<()> {
        let events = {
            let mut tree = self.lock();
            let (id, rest) = locate(&tree, path, true)?;
            if !tree.resources.contains_key(&id) {
                if id.starts_with("resources/") {
                    tree.resources.insert(id.clone(), new_resource(&id, None));
                } else {
                    return Err(Error::NotFound(path.to_string()));
                }
            }
            let written = body.clone();
            if let Some(doc) = tree.resources.get_mut(&id) {
                merge_at(doc, &rest, body);
                touch(doc, self.origin.as_deref());
            }
            change_events(&tree, &id, &rest, &written, self.origin.as_deref())
        };
        self.emit(events);
        Ok(())
    }

    async fn post(&self, path: &str, body: JsonValue) -> Result<String> {
        let key = Uuid::new_v4().simple().to_string();
        self.put(path, json!({ key.clone(): body })).await?;
        Ok(key)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let events = {
            let mut tree = self.lock();
            let (id, rest) = locate(&tree, path, false)?;
            let Some((last, parents)) = rest.split_last() else {
                tree.resources
                    .remove(&id)
                    .ok_or_else(|| Error::NotFound(path.to_string()))?;
                tree.blobs.remove(&id);
                return Ok(());
            };
            let doc = tree
                .resources
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            let mut parent = &mut *doc;
            for segment in parents {
                parent = parent
                    .get_mut(segment)
                    .ok_or_else(|| Error::NotFound(path.to_string()))?;
            }
            parent
                .as_object_mut()
                .and_then(|obj| obj.remove(last))
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            touch(doc, self.origin.as_deref());
            change_events(&tree, &id, &[], &JsonValue::Null, self.origin.as_deref())
        };
        self.emit(events);
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Blob> {
        let tree = self.lock();
        let (id, rest) = locate(&tree, path, true)?;
        if !rest.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        tree.blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn create_resource(&self, content_type: &str, body: JsonValue) -> Result<String> {
        let id = format!("resources/{}", Uuid::new_v4().simple());
        let events = {
            let mut tree = self.lock();
            let mut doc = new_resource(&id, Some(content_type));
            merge_at(&mut doc, &[], body);
            touch(&mut doc, self.origin.as_deref());
            tree.resources.insert(id.clone(), doc);
            change_events(&tree, &id, &[], &JsonValue::Null, self.origin.as_deref())
        };
        self.emit(events);
        Ok(id)
    }

    async fn create_blob(&self, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        let id = format!("resources/{}", Uuid::new_v4().simple());
        let mut tree = self.lock();
        let mut doc = new_resource(&id, Some(content_type));
        touch(&mut doc, self.origin.as_deref());
        tree.resources.insert(id.clone(), doc);
        tree.blobs.insert(
            id.clone(),
            Blob {
                bytes,
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl ChangeFeed for MemoryRegistry {
    async fn watch(&self, pattern: &PathPattern) -> Result<ChangeStream> {
        let rx = self.events.subscribe();
        let pattern = pattern.clone();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "Change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| futures::future::ready(pattern.matches(&event.path).is_some()));
        Ok(stream.boxed())
    }
}

fn new_resource(id: &str, content_type: Option<&str>) -> JsonValue {
    let mut doc = json!({
        "_id": id,
        "_rev": 0,
        "_meta": { "_id": format!("{}/_meta", id), "_rev": 0 }
    });
    if let Some(ct) = content_type {
        doc["_type"] = json!(ct);
        doc["_meta"]["_type"] = json!(ct);
    }
    doc
}

fn touch(doc: &mut JsonValue, origin: Option<&str>) {
    let rev = doc.get("_rev").and_then(JsonValue::as_u64).unwrap_or(0) + 1;
    doc["_rev"] = json!(rev);
    if !doc.get("_meta").map(JsonValue::is_object).unwrap_or(false) {
        doc["_meta"] = json!({});
    }
    doc["_meta"]["_rev"] = json!(rev);
    match origin {
        Some(origin) => doc["_meta"]["modifiedBy"] = json!(origin),
        None => {
            if let Some(meta) = doc["_meta"].as_object_mut() {
                meta.remove("modifiedBy");
            }
        }
    }
}

/// Resolve a path to the resource that owns it and the remaining segments.
///
/// Links along the way are followed; a link at the final segment is followed
/// only when `follow_terminal` is set.
fn locate(tree: &Tree, path: &str, follow_terminal: bool) -> Result<(String, Vec<String>)> {
    let segments = paths::segments(path);
    let (mut id, mut rest): (String, Vec<String>) = match segments.as_slice() {
        ["bookmarks", rest @ ..] => (
            BOOKMARKS_ID.to_string(),
            rest.iter().map(|s| s.to_string()).collect(),
        ),
        ["resources", key, rest @ ..] => (
            format!("resources/{}", key),
            rest.iter().map(|s| s.to_string()).collect(),
        ),
        _ => return Err(Error::NotFound(path.to_string())),
    };

    'resolve: loop {
        let Some(doc) = tree.resources.get(&id) else {
            return Ok((id, rest));
        };
        let mut value = doc;
        for i in 0..rest.len() {
            let Some(next) = value.get(&rest[i]) else {
                break;
            };
            if let Some(target) = link_target(tree, next) {
                if i + 1 < rest.len() || follow_terminal {
                    id = target;
                    rest = rest[i + 1..].to_vec();
                    continue 'resolve;
                }
            }
            value = next;
        }
        return Ok((id, rest));
    }
}

fn link_target(tree: &Tree, value: &JsonValue) -> Option<String> {
    let id = value.as_object()?.get("_id")?.as_str()?;
    tree.resources.contains_key(id).then(|| id.to_string())
}

fn merge_at(doc: &mut JsonValue, rest: &[String], body: JsonValue) {
    let mut target = doc;
    for segment in rest {
        if !target.is_object() {
            *target = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(obj) = target else {
            return;
        };
        target = obj
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
    }
    deep_merge(target, body);
}

fn deep_merge(target: &mut JsonValue, patch: JsonValue) {
    match (target, patch) {
        (JsonValue::Object(t), JsonValue::Object(p)) => {
            for (k, v) in p {
                deep_merge(t.entry(k).or_insert(JsonValue::Null), v);
            }
        }
        (t, p) => *t = p,
    }
}

/// Every bookmarks path reaching `target`, through links.
fn paths_to(tree: &Tree, target: &str) -> Vec<String> {
    let mut out = Vec::new();
    if target == BOOKMARKS_ID {
        out.push("/bookmarks".to_string());
    }
    let mut stack = vec![(BOOKMARKS_ID.to_string(), "/bookmarks".to_string(), 0usize)];
    while let Some((id, prefix, depth)) = stack.pop() {
        let Some(doc) = tree.resources.get(&id) else {
            continue;
        };
        let mut links = Vec::new();
        collect_links(tree, doc, &prefix, &mut links);
        for (path, linked) in links {
            if linked == target {
                out.push(path.clone());
            }
            if depth < MAX_LINK_DEPTH {
                stack.push((linked, path, depth + 1));
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Links inside one resource body, skipping `_`-prefixed keys.
fn collect_links(tree: &Tree, value: &JsonValue, prefix: &str, out: &mut Vec<(String, String)>) {
    let Some(obj) = value.as_object() else {
        return;
    };
    for (key, child) in obj {
        if key.starts_with('_') {
            continue;
        }
        let path = format!("{}/{}", prefix, key);
        match link_target(tree, child) {
            Some(linked) => out.push((path, linked)),
            None => collect_links(tree, child, &path, out),
        }
    }
}

fn change_events(
    tree: &Tree,
    id: &str,
    rest: &[String],
    written: &JsonValue,
    origin: Option<&str>,
) -> Vec<ChangeEvent> {
    let mut bases = paths_to(tree, id);
    bases.push(paths::join(id, &[]));

    let mut events = Vec::new();
    for base in &bases {
        events.push(ChangeEvent {
            path: base.clone(),
            resource_id: id.to_string(),
            origin: origin.map(String::from),
        });

        if rest.first().map(|s| s.starts_with('_')).unwrap_or(false) {
            continue;
        }
        let mut prefix = base.clone();
        for segment in rest {
            prefix.push('/');
            prefix.push_str(segment);
        }
        let mut links = Vec::new();
        collect_links(tree, written, &prefix, &mut links);
        for (path, linked) in links {
            events.push(ChangeEvent {
                path,
                resource_id: linked,
                origin: origin.map(String::from),
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip_with_merge() {
        let registry = MemoryRegistry::new();
        registry
            .put("/resources/doc1", json!({ "a": 1, "nested": { "x": 1 } }))
            .await
            .unwrap();
        registry
            .put("/resources/doc1/nested", json!({ "y": 2 }))
            .await
            .unwrap();

        let doc = registry.get("/resources/doc1").await.unwrap();
        assert_eq!(doc["a"], json!(1));
        assert_eq!(doc["nested"], json!({ "x": 1, "y": 2 }));
        assert!(doc.get("_meta").is_none());
        assert_eq!(registry.rev("resources/doc1"), Some(2));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry.get("/resources/nope/_meta/x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_links_are_followed() {
        let registry = MemoryRegistry::new();
        registry
            .put("/resources/tp1", json!({ "name": "Acme" }))
            .await
            .unwrap();
        registry
            .put(
                "/bookmarks/trellisfw/trading-partners",
                json!({ "tp1": { "_id": "resources/tp1" } }),
            )
            .await
            .unwrap();

        let name = registry
            .get("/bookmarks/trellisfw/trading-partners/tp1/name")
            .await
            .unwrap();
        assert_eq!(name, json!("Acme"));

        let whole = registry
            .get("/bookmarks/trellisfw/trading-partners/tp1")
            .await
            .unwrap();
        assert_eq!(whole["_id"], json!("resources/tp1"));
    }

    #[tokio::test]
    async fn test_origin_is_stamped() {
        let registry = MemoryRegistry::new();
        let service = registry.with_origin("docsync");
        service
            .put("/resources/doc1", json!({ "a": 1 }))
            .await
            .unwrap();
        assert_eq!(
            registry.get("/resources/doc1/_meta/modifiedBy").await.unwrap(),
            json!("docsync")
        );

        registry.put("/resources/doc1", json!({ "a": 2 })).await.unwrap();
        assert!(registry
            .get("/resources/doc1/_meta/modifiedBy")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let registry = MemoryRegistry::new();
        let id = registry
            .create_blob("application/pdf", b"%PDF-1.4".to_vec())
            .await
            .unwrap();
        registry
            .put("/resources/doc1/_meta/vdoc/pdf", json!({ "h1": { "_id": id.clone() } }))
            .await
            .unwrap();

        let blob = registry
            .get_blob("/resources/doc1/_meta/vdoc/pdf/h1")
            .await
            .unwrap();
        assert_eq!(blob.bytes, b"%PDF-1.4".to_vec());
        assert_eq!(blob.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_change_events_reach_bookmark_paths() {
        let registry = MemoryRegistry::new();
        registry.put("/resources/doc1", json!({})).await.unwrap();
        registry
            .put(
                "/bookmarks/trellisfw/documents/cois",
                json!({ "doc1": { "_id": "resources/doc1" } }),
            )
            .await
            .unwrap();

        let mut rx = registry.subscribe();
        registry
            .with_origin("someone")
            .put("/resources/doc1", json!({ "holder": "x" }))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| e.path == "/bookmarks/trellisfw/documents/cois/doc1"
            && e.resource_id == "resources/doc1"
            && e.origin.as_deref() == Some("someone")));
    }

    #[tokio::test]
    async fn test_linking_new_item_emits_item_event() {
        let registry = MemoryRegistry::new();
        registry.put("/resources/doc2", json!({})).await.unwrap();
        let mut rx = registry.subscribe();
        registry
            .post(
                "/bookmarks/trellisfw/documents/unidentified",
                json!({ "_id": "resources/doc2", "_rev": 0 }),
            )
            .await
            .unwrap();

        let mut found = false;
        while let Ok(event) = rx.try_recv() {
            if event.resource_id == "resources/doc2"
                && event.path.starts_with("/bookmarks/trellisfw/documents/unidentified/")
            {
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn test_watch_filters_by_pattern() {
        let registry = MemoryRegistry::new();
        let pattern = PathPattern::parse("/bookmarks/trellisfw/documents/{doctype}/{document}").unwrap();
        let mut stream = registry.watch(&pattern).await.unwrap();

        registry.put("/resources/other", json!({})).await.unwrap();
        registry.put("/resources/doc3", json!({})).await.unwrap();
        registry
            .put(
                "/bookmarks/trellisfw/documents/cois",
                json!({ "doc3": { "_id": "resources/doc3" } }),
            )
            .await
            .unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.path, "/bookmarks/trellisfw/documents/cois/doc3");
        assert_eq!(event.resource_id, "resources/doc3");
    }

    #[tokio::test]
    async fn test_delete_key() {
        let registry = MemoryRegistry::new();
        registry
            .put("/resources/doc1", json!({ "a": 1, "b": 2 }))
            .await
            .unwrap();
        registry.delete("/resources/doc1/a").await.unwrap();
        let doc = registry.get("/resources/doc1").await.unwrap();
        assert!(doc.get("a").is_none());
        assert_eq!(doc["b"], json!(2));
    }
}
