//! Polling change feed over any [`ResourceStore`].
//!
//! Each tick walks the watched pattern, enumerating children at capture and
//! wildcard segments (keys starting with `_` are skipped), and compares every
//! matched item's `_rev` with the previous tick. The first walk only records
//! a baseline.
//!
//! A changed item's origin is the writer stamped in its origin marker when
//! the marker revision is the item's current revision, and the registry's
//! `_meta/modifiedBy` otherwise.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use docsync_core::defaults::{EVENT_BUS_CAPACITY, ORIGIN_MARKER_SUBPATH, WATCH_POLL_INTERVAL_MS};
use docsync_core::{
    ChangeEvent, ChangeFeed, ChangeStream, PathPattern, ResourceStore, Result, Segment,
};

use crate::paths;

/// One watched item observed during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    path: String,
    resource_id: String,
    rev: u64,
}

/// Change feed that polls the registry.
#[derive(Clone)]
pub struct PollingChangeFeed {
    store: Arc<dyn ResourceStore>,
    interval: Duration,
}

impl PollingChangeFeed {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            interval: Duration::from_millis(WATCH_POLL_INTERVAL_MS),
        }
    }

    /// | Variable | Default |
    /// |----------|---------|
    /// | `WATCH_POLL_INTERVAL_MS` | `5000` |
    pub fn from_env(store: Arc<dyn ResourceStore>) -> Self {
        let ms = std::env::var("WATCH_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WATCH_POLL_INTERVAL_MS);
        Self::new(store).with_interval(Duration::from_millis(ms))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Walk the pattern once and diff against `seen`, updating it.
    async fn tick(
        &self,
        pattern: &PathPattern,
        seen: &mut HashMap<String, u64>,
        baseline: bool,
    ) -> Result<Vec<ChangeEvent>> {
        let observed = walk(self.store.as_ref(), pattern).await?;
        let mut events = Vec::new();
        for item in observed {
            let changed = seen.get(&item.path).map(|r| *r != item.rev).unwrap_or(true);
            seen.insert(item.path.clone(), item.rev);
            if baseline || !changed {
                continue;
            }
            let origin = origin(self.store.as_ref(), &item).await?;
            events.push(ChangeEvent {
                path: item.path,
                resource_id: item.resource_id,
                origin,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl ChangeFeed for PollingChangeFeed {
    async fn watch(&self, pattern: &PathPattern) -> Result<ChangeStream> {
        let (tx, rx) = mpsc::channel(EVENT_BUS_CAPACITY);
        let feed = self.clone();
        let pattern = pattern.clone();

        tokio::spawn(async move {
            let mut seen = HashMap::new();
            let mut baseline = true;
            loop {
                match feed.tick(&pattern, &mut seen, baseline).await {
                    Ok(events) => {
                        baseline = false;
                        for event in events {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, pattern = %pattern, "Change feed walk failed"),
                }
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(feed.interval).await;
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }
}

/// Expand a pattern into the items currently present.
async fn walk(store: &dyn ResourceStore, pattern: &PathPattern) -> Result<Vec<Observed>> {
    let segments = pattern.segments();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(Vec::new());
    };

    let mut prefixes = vec![String::new()];
    for segment in parents {
        let mut next = Vec::new();
        for prefix in &prefixes {
            match segment {
                Segment::Literal(lit) => next.push(format!("{}/{}", prefix, lit)),
                Segment::Capture(_) | Segment::Wildcard => {
                    for key in children(store, prefix).await? {
                        next.push(format!("{}/{}", prefix, key));
                    }
                }
            }
        }
        prefixes = next;
    }

    let mut observed = Vec::new();
    for prefix in &prefixes {
        let listing = match store.get(prefix).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        let Some(obj) = listing.as_object() else {
            continue;
        };
        let keys: Vec<&String> = match last {
            Segment::Literal(lit) => obj.keys().filter(|k| *k == lit).collect(),
            Segment::Capture(_) | Segment::Wildcard => {
                obj.keys().filter(|k| !k.starts_with('_')).collect()
            }
        };
        for key in keys {
            let path = format!("{}/{}", prefix, key);
            let Some(resource_id) = obj[key.as_str()].get("_id").and_then(JsonValue::as_str) else {
                continue;
            };
            let rev = match obj[key.as_str()].get("_rev").and_then(JsonValue::as_u64) {
                Some(rev) if rev > 0 => rev,
                _ => match store.get(&paths::join(resource_id, &["_rev"])).await {
                    Ok(v) => v.as_u64().unwrap_or(0),
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                },
            };
            observed.push(Observed {
                path,
                resource_id: resource_id.to_string(),
                rev,
            });
        }
    }
    debug!(pattern = %pattern, items = observed.len(), "Walked change feed pattern");
    Ok(observed)
}

/// Writer of an item's current revision, if known.
async fn origin(store: &dyn ResourceStore, item: &Observed) -> Result<Option<String>> {
    match store
        .get(&paths::join(&item.resource_id, &[ORIGIN_MARKER_SUBPATH]))
        .await
    {
        Ok(marker) if marker.get("rev").and_then(JsonValue::as_u64) == Some(item.rev) => {
            if let Some(origin) = marker.get("origin").and_then(JsonValue::as_str) {
                return Ok(Some(origin.to_string()));
            }
        }
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    match store
        .get(&paths::join(&item.resource_id, &["_meta", "modifiedBy"]))
        .await
    {
        Ok(JsonValue::String(s)) => Ok(Some(s)),
        Ok(_) => Ok(None),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn children(store: &dyn ResourceStore, path: &str) -> Result<Vec<String>> {
    match store.get(path).await {
        Ok(JsonValue::Object(obj)) => Ok(obj
            .keys()
            .filter(|k| !k.starts_with('_'))
            .cloned()
            .collect()),
        Ok(_) => Ok(Vec::new()),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
