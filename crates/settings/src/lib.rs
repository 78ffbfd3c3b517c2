//! Organization settings (event-sourced).
//!
//! Pure domain logic: one settings stream per organization.

pub mod settings;

pub use settings::{
    DEFAULT_LOW_STOCK_THRESHOLD, OrganizationSettings, SETTINGS_AGGREGATE_TYPE, SettingsCommand, SettingsEvent, SettingsId,
    SettingsUpdated, UpdateSettings,
};
