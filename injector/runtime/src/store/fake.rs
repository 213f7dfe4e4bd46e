//! An in-memory [`Store`] with the API server's optimistic-concurrency
//! semantics.

use super::{kind_of, name_of, Object, Store, StoreError};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

type Key = (String, String, String);

#[derive(Clone, Default)]
pub(crate) struct FakeStore(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, serde_json::Value>,
    version: u64,
    conflicts: HashMap<String, usize>,
    failing_lists: HashSet<String>,
    writes: Vec<String>,
}

fn key<K: Object>(ns: Option<&str>, name: &str) -> Key {
    (
        kind_of::<K>(),
        ns.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

impl FakeStore {
    /// Stores `obj` as-is, assigning a resource version.
    pub(crate) fn with<K: Object>(self, obj: K) -> Self {
        self.insert(obj);
        self
    }

    pub(crate) fn insert<K: Object>(&self, mut obj: K) {
        let mut state = self.0.lock();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        let key = key::<K>(
            obj.meta().namespace.as_deref(),
            obj.meta().name.as_deref().unwrap_or_default(),
        );
        let value = serde_json::to_value(&obj).expect("object must serialize");
        state.objects.insert(key, value);
    }

    pub(crate) fn object<K: Object>(&self, ns: Option<&str>, name: &str) -> Option<K> {
        let state = self.0.lock();
        state
            .objects
            .get(&key::<K>(ns, name))
            .map(|v| serde_json::from_value(v.clone()).expect("object must deserialize"))
    }

    /// Fails the next `n` replacements of `K` with a conflict, as though
    /// another writer got there first.
    pub(crate) fn conflict_next<K: Object>(&self, n: usize) {
        self.0.lock().conflicts.insert(kind_of::<K>(), n);
    }

    /// Fails every list of `K` as an unavailable API server would.
    pub(crate) fn fail_lists<K: Object>(&self) {
        self.0.lock().failing_lists.insert(kind_of::<K>());
    }

    /// Successful writes, in order, as `"{op} {kind} {ns}/{name}"`.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.0.lock().writes.clone()
    }
}

#[async_trait::async_trait]
impl Store for FakeStore {
    async fn get<K: Object>(&self, ns: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.object(ns, name))
    }

    async fn list<K: Object>(&self, ns: Option<&str>) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let state = self.0.lock();
        if state.failing_lists.contains(&kind) {
            return Err(StoreError::Api(crate::k8s::Error::Api(
                kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("unable to list {kind}"),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                },
            )));
        }
        Ok(state
            .objects
            .iter()
            .filter(|((k, n, _), _)| *k == kind && ns.map_or(true, |ns| ns == n))
            .map(|(_, v)| serde_json::from_value(v.clone()).expect("object must deserialize"))
            .collect())
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?.to_string();
        let ns = obj.meta().namespace.clone();
        let key = key::<K>(ns.as_deref(), &name);

        let mut state = self.0.lock();
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind_of::<K>(),
                name,
            });
        }

        let mut obj = obj.clone();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        state
            .objects
            .insert(key, serde_json::to_value(&obj).expect("object must serialize"));
        state.writes.push(format!(
            "create {} {}/{}",
            kind_of::<K>(),
            ns.unwrap_or_default(),
            name
        ));
        Ok(obj)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = name_of(obj)?.to_string();
        let ns = obj.meta().namespace.clone();
        let key = key::<K>(ns.as_deref(), &name);

        let mut state = self.0.lock();
        let conflict = || StoreError::Conflict {
            kind: kind.clone(),
            name: name.clone(),
        };

        if let Some(n) = state.conflicts.get_mut(&kind).filter(|n| **n > 0) {
            *n -= 1;
            // Simulate the concurrent write by bumping the stored version.
            state.version += 1;
            let version = state.version.to_string();
            if let Some(stored) = state.objects.get_mut(&key) {
                stored["metadata"]["resourceVersion"] = serde_json::Value::String(version);
            }
            return Err(conflict());
        }

        let stored = state
            .objects
            .get(&key)
            .and_then(|v| v["metadata"]["resourceVersion"].as_str().map(String::from));
        match stored {
            None => {
                return Err(StoreError::NotFound {
                    kind: kind.clone(),
                    name: name.clone(),
                })
            }
            Some(version) if obj.meta().resource_version.as_ref() != Some(&version) => {
                return Err(conflict());
            }
            Some(_) => {}
        }

        let mut obj = obj.clone();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        state
            .objects
            .insert(key, serde_json::to_value(&obj).expect("object must serialize"));
        state
            .writes
            .push(format!("replace {} {}/{}", kind, ns.unwrap_or_default(), name));
        Ok(obj)
    }
}
