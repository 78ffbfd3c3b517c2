use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use stockflow_core::{ActorId, AggregateId, OrganizationId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    ApplyLowStockThreshold, STOCK_ITEM_AGGREGATE_TYPE, StockItem, StockItemCommand, StockItemId,
};
use stockflow_settings::{
    OrganizationSettings, SETTINGS_AGGREGATE_TYPE, SettingsCommand, SettingsId, UpdateSettings,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, UnitOfWork, retry_on_conflict};
use crate::event_store::EventStore;
use crate::services::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsView {
    pub low_stock_threshold: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&OrganizationSettings> for SettingsView {
    fn from(s: &OrganizationSettings) -> Self {
        Self {
            low_stock_threshold: s.low_stock_threshold(),
            updated_at: s.updated_at(),
        }
    }
}

/// Per-organization settings and the threshold migration.
#[derive(Debug)]
pub struct SettingsService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    config: ServiceConfig,
}

impl<S, B> Clone for SettingsService<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            config: self.config,
        }
    }
}

fn make_settings(_: OrganizationId, id: AggregateId) -> OrganizationSettings {
    OrganizationSettings::empty(SettingsId(id))
}

impl<S, B> SettingsService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, config: ServiceConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn get(&self, organization_id: OrganizationId) -> Result<SettingsView, DispatchError> {
        let settings = self.load(organization_id)?;
        Ok(SettingsView::from(&settings))
    }

    /// Threshold new stock items are opened with, read as part of `unit`, so a settings update that lands
    /// before the commit makes the commit fail with a retryable conflict.
    pub fn observe_threshold(&self, unit: &mut UnitOfWork<'_, S, B>) -> Result<i64, DispatchError> {
        let id = SettingsId::for_organization(unit.organization_id());
        Ok(unit.observe(id.0, make_settings)?.low_stock_threshold())
    }

    /// Upsert. Existing stock items keep their threshold until
    /// [`SettingsService::migrate_thresholds`] runs.
    pub fn update(
        &self,
        organization_id: OrganizationId,
        low_stock_threshold: i64,
        actor: Option<ActorId>,
    ) -> Result<SettingsView, DispatchError> {
        let id = SettingsId::for_organization(organization_id);
        let committed = retry_on_conflict(self.config.max_concurrency_retries, || {
            self.dispatcher.dispatch(
                organization_id,
                id.0,
                SETTINGS_AGGREGATE_TYPE,
                SettingsCommand::UpdateSettings(UpdateSettings {
                    organization_id,
                    low_stock_threshold,
                    actor,
                    occurred_at: Utc::now(),
                }),
                make_settings,
            )
        })?;

        info!(
            organization_id = %organization_id,
            low_stock_threshold,
            "settings updated"
        );
        Ok(SettingsView::from(&committed.state))
    }

    /// Overwrite every stock item's threshold with the current setting.
    ///
    /// One atomic append over all items; returns how many were updated. The
    /// setting is read inside the same unit, so an update racing the
    /// migration forces it to start over with the new value.
    pub fn migrate_thresholds(
        &self,
        organization_id: OrganizationId,
    ) -> Result<usize, DispatchError> {
        let updated = retry_on_conflict(self.config.max_concurrency_retries, || {
            let mut unit = self.dispatcher.unit_of_work(organization_id);
            let threshold = self.observe_threshold(&mut unit)?;
            let ids = self
                .dispatcher
                .store()
                .stream_ids(organization_id, STOCK_ITEM_AGGREGATE_TYPE)?;

            for id in &ids {
                unit.stage(
                    *id,
                    STOCK_ITEM_AGGREGATE_TYPE,
                    StockItemCommand::ApplyLowStockThreshold(ApplyLowStockThreshold {
                        organization_id,
                        item_id: StockItemId(*id),
                        low_stock_threshold: threshold,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| StockItem::empty(StockItemId(id)),
                )?;
            }
            unit.commit()?;
            Ok(ids.len())
        })?;

        info!(organization_id = %organization_id, updated, "stock thresholds migrated");
        Ok(updated)
    }

    fn load(&self, organization_id: OrganizationId) -> Result<OrganizationSettings, DispatchError> {
        let id = SettingsId::for_organization(organization_id);
        self.dispatcher.load(organization_id, id.0, make_settings)
    }
}
