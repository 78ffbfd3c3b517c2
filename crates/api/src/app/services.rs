use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::Value as JsonValue;

use stockflow_catalog::{Directories, InMemoryCatalog};
use stockflow_core::{AggregateId, OrganizationId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore},
    projections::Projections,
    services::Stockflow,
    workers::{ProjectionWorker, WorkerHandle},
};

use crate::config::AppConfig;

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Everything a request handler needs, shared behind one `Arc`.
///
/// Writes go through [`AppServices::run`] because the services are
/// synchronous and the Postgres store blocks on the runtime.
pub struct AppServices {
    pub stockflow: Stockflow<SharedStore, SharedBus>,
    pub catalog: Arc<InMemoryCatalog>,
    pub projections: Arc<Projections>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Run a service call on the blocking pool.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&AppServices) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&services))
            .await
            .map_err(|e| DispatchError::Store(EventStoreError::Backend(format!("service task failed: {e}"))))?
    }

    /// Stop the projection worker. Later writes are no longer projected.
    pub fn shutdown(&self) {
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

/// Stable id for a seeded organization, so persisted streams stay reachable
/// across restarts.
pub fn seeded_organization_id(slug: &str) -> OrganizationId {
    OrganizationId::from_uuid(*AggregateId::derived("stockflow.organization", &[slug.as_bytes()]).as_uuid())
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<AppServices>> {
    let catalog = Arc::new(InMemoryCatalog::new());
    for slug in &config.seed_organizations {
        catalog.register_organization_with_id(seeded_organization_id(slug), slug, slug);
    }

    let store: SharedStore = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(url)) => {
            tracing::info!("using Postgres event store");
            Arc::new(
                PostgresEventStore::connect(url)
                    .await
                    .context("failed to connect to the event store")?,
            )
        }
        _ => {
            tracing::info!("using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let projections = Arc::new(Projections::in_memory());
    if config.use_persistent_stores {
        let history = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.load_all())
                .await
                .context("history load task failed")??
        };
        let applied = projections.rebuild(history)?;
        tracing::info!(events = applied, "read models rebuilt from the event store");
    }

    let bus: SharedBus = Arc::new(InMemoryEventBus::new());
    let worker = {
        let projections = projections.clone();
        ProjectionWorker::spawn(
            "stockflow-projections",
            bus.clone(),
            None,
            move |envelope: EventEnvelope<JsonValue>| projections.apply_envelope(&envelope),
        )
        .context("failed to start the projection worker")?
    };

    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let directories: Arc<dyn Directories> = catalog.clone();
    let stockflow = Stockflow::new(dispatcher, directories, projections.clone(), config.service_config());

    Ok(Arc::new(AppServices {
        stockflow,
        catalog,
        projections,
        worker: Mutex::new(Some(worker)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_ids_depend_only_on_the_slug() {
        assert_eq!(seeded_organization_id("demo"), seeded_organization_id("demo"));
        assert_ne!(seeded_organization_id("demo"), seeded_organization_id("acme"));
    }
}
