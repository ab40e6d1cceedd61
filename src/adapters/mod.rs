//! HTTP adapters: the definition management endpoints, the dynamic request
//! dispatcher and the route table they share.

use std::sync::Arc;

use crate::adapters::route_table::RouteTable;
use crate::config::TimeoutSettings;
use crate::persistence::{DataRepository, DefinitionRepository};

pub mod definition_handler;
pub mod dynamic_handler;
pub mod health_handler;
pub mod route_table;

#[cfg(test)]
mod dynamic_handler_test;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub definitions: Arc<dyn DefinitionRepository>,
    pub data: Arc<dyn DataRepository>,
    pub routes: RouteTable,
    pub timeouts: TimeoutSettings,
}
