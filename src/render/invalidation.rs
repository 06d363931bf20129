//! Last-render timestamps consumed by the view layer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Image name → unix timestamp of its last successful render.
///
/// Written only by the render scheduler after a tick settles; entries are
/// never removed.
#[derive(Debug, Clone, Default)]
pub struct RenderInvalidationMap {
    inner: Arc<RwLock<HashMap<String, i64>>>,
}

impl RenderInvalidationMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a render of `image` at `timestamp`.
    pub async fn record(&self, image: impl Into<String>, timestamp: i64) {
        self.inner.write().await.insert(image.into(), timestamp);
    }

    /// Record a batch of renders under one lock.
    pub async fn record_all<I>(&self, renders: I)
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let mut map = self.inner.write().await;
        map.extend(renders);
    }

    /// Last render of `image`, if any.
    pub async fn get(&self, image: &str) -> Option<i64> {
        self.inner.read().await.get(image).copied()
    }

    /// Copy of the whole map.
    pub async fn snapshot(&self) -> HashMap<String, i64> {
        self.inner.read().await.clone()
    }

    /// Number of images rendered so far.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// True before the first render.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
