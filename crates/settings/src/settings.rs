use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use stockflow_events::Event;

/// Stream type under which settings are stored.
pub const SETTINGS_AGGREGATE_TYPE: &str = "settings.organization";

/// Threshold used until an organization saves its own.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsId(pub AggregateId);

impl SettingsId {
    /// The single settings stream of an organization.
    pub fn for_organization(organization_id: OrganizationId) -> Self {
        Self(AggregateId::derived(
            "stockflow.settings",
            &[organization_id.as_uuid().as_bytes()],
        ))
    }
}

impl core::fmt::Display for SettingsId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: OrganizationSettings.
///
/// An organization without a stream behaves as if it had the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationSettings {
    id: SettingsId,
    organization_id: Option<OrganizationId>,
    low_stock_threshold: i64,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl OrganizationSettings {
    pub fn empty(id: SettingsId) -> Self {
        Self {
            id,
            organization_id: None,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            updated_at: None,
            version: 0,
        }
    }

    pub fn low_stock_threshold(&self) -> i64 {
        self.low_stock_threshold
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_customized(&self) -> bool {
        self.version > 0
    }
}

impl AggregateRoot for OrganizationSettings {
    type Id = SettingsId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: UpdateSettings (upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub organization_id: OrganizationId,
    pub low_stock_threshold: i64,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsCommand {
    UpdateSettings(UpdateSettings),
}

/// Event: SettingsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub organization_id: OrganizationId,
    pub settings_id: SettingsId,
    pub low_stock_threshold: i64,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsEvent {
    SettingsUpdated(SettingsUpdated),
}

impl Event for SettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettingsEvent::SettingsUpdated(_) => "settings.organization.updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettingsEvent::SettingsUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for OrganizationSettings {
    type Command = SettingsCommand;
    type Event = SettingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettingsEvent::SettingsUpdated(e) => {
                self.organization_id = Some(e.organization_id);
                self.low_stock_threshold = e.low_stock_threshold;
                self.updated_at = Some(e.occurred_at);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettingsCommand::UpdateSettings(cmd) => {
                if let Some(owner) = self.organization_id {
                    if owner != cmd.organization_id {
                        return Err(DomainError::invariant("organization mismatch"));
                    }
                }
                if SettingsId::for_organization(cmd.organization_id) != self.id {
                    return Err(DomainError::invariant("settings_id mismatch"));
                }
                Ok(vec![SettingsEvent::SettingsUpdated(SettingsUpdated {
                    organization_id: cmd.organization_id,
                    settings_id: self.id,
                    low_stock_threshold: cmd.low_stock_threshold,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_events::execute;

    fn update(org: OrganizationId, threshold: i64) -> SettingsCommand {
        SettingsCommand::UpdateSettings(UpdateSettings {
            organization_id: org,
            low_stock_threshold: threshold,
            actor: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn unsaved_settings_use_default_threshold() {
        let org = OrganizationId::new();
        let settings = OrganizationSettings::empty(SettingsId::for_organization(org));
        assert_eq!(settings.low_stock_threshold(), DEFAULT_LOW_STOCK_THRESHOLD);
        assert!(!settings.is_customized());
    }

    #[test]
    fn update_overwrites_threshold_each_time() {
        let org = OrganizationId::new();
        let mut settings = OrganizationSettings::empty(SettingsId::for_organization(org));

        execute(&mut settings, &update(org, 20)).unwrap();
        assert_eq!(settings.low_stock_threshold(), 20);

        execute(&mut settings, &update(org, 0)).unwrap();
        assert_eq!(settings.low_stock_threshold(), 0);
        assert_eq!(settings.version(), 2);
    }

    #[test]
    fn foreign_organization_cannot_write_settings_stream() {
        let org = OrganizationId::new();
        let mut settings = OrganizationSettings::empty(SettingsId::for_organization(org));
        execute(&mut settings, &update(org, 5)).unwrap();

        match settings.handle(&update(OrganizationId::new(), 7)) {
            Err(DomainError::InvariantViolation(msg)) => assert!(msg.contains("organization")),
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }
}
