use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use stockflow_core::OrganizationId;

/// Organization-isolated key/value store for disposable read models.
pub trait OrganizationStore<K, V>: Send + Sync {
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V>;
    fn upsert(&self, organization_id: OrganizationId, key: K, value: V);
    fn list(&self, organization_id: OrganizationId) -> Vec<V>;
    /// Drop every record of one organization (rebuild support).
    fn clear_organization(&self, organization_id: OrganizationId);
}

impl<K, V, S> OrganizationStore<K, V> for Arc<S>
where
    S: OrganizationStore<K, V> + ?Sized,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        (**self).get(organization_id, key)
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        (**self).upsert(organization_id, key, value)
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        (**self).list(organization_id)
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        (**self).clear_organization(organization_id)
    }
}

#[derive(Debug)]
pub struct InMemoryOrganizationStore<K, V> {
    inner: RwLock<HashMap<(OrganizationId, K), V>>,
}

impl<K, V> InMemoryOrganizationStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryOrganizationStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrganizationStore<K, V> for InMemoryOrganizationStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(organization_id, key.clone())).cloned()
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((organization_id, key), value);
        }
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((o, _k), v)| (*o == organization_id).then(|| v.clone()))
            .collect()
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(o, _k), _v| *o != organization_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_do_not_leak_across_organizations() {
        let store = InMemoryOrganizationStore::<u32, &str>::new();
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        store.upsert(a, 1, "a1");
        store.upsert(b, 1, "b1");

        assert_eq!(store.get(a, &1), Some("a1"));
        assert_eq!(store.list(b), vec!["b1"]);

        store.clear_organization(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.get(b, &1), Some("b1"));
    }
}
