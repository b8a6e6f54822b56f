use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Scene name to the camera sources it contains.
///
/// Filled lazily the first time a scene goes to program or preview. Entries
/// are never replaced; a scene that changed in the production tool keeps its
/// old cameras until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear) is called.
#[derive(Clone, Default)]
pub struct SceneCameraCache {
    inner: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl SceneCameraCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scene: &str) -> Option<Vec<String>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scene)
            .cloned()
    }

    pub fn contains(&self, scene: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(scene)
    }

    /// Insert unless already present, returning the stored cameras.
    /// Duplicate names keep their first position.
    pub fn insert(&self, scene: &str, cameras: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(scene.to_string())
            .or_insert_with(|| {
                let mut ordered: Vec<String> = Vec::new();
                for camera in cameras {
                    if !ordered.contains(&camera) {
                        ordered.push(camera);
                    }
                }
                ordered
            })
            .clone()
    }

    pub fn invalidate(&self, scene: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scene)
            .is_some()
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
