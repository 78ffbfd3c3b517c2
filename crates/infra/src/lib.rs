//! Infrastructure layer: event stores, dispatch, projections, services.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod workers;
