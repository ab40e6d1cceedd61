//! # dynapi - Dynamic API Gateway
//!
//! dynapi serves HTTP endpoints that are registered at runtime.
//! Administrators create named endpoint definitions (method + path + target
//! data collection + a tree of conditional logic); the server thereafter
//! serves matching requests by interpreting the definition's flow tree,
//! reading and writing a backing MongoDB document store.
//!
//! ## Architecture
//!
//! - **Domain**: definition and flow vocabulary shared across layers
//! - **Engine**: the conditional flow interpreter (substitution,
//!   transformations, condition evaluation, cross-endpoint calls)
//! - **Persistence**: definition store and dynamic data store behind
//!   repository traits, implemented on MongoDB
//! - **Adapters**: axum handlers, the route table cache and the dynamic
//!   request dispatcher
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clap::Parser;
//! use dynapi::cli::Cli;
//! use dynapi::config::Settings;
//!
//! let cli = Cli::parse_from(["dynapi"]);
//! let settings = Settings::new_with_cli(&cli).unwrap();
//! // Server will start on settings.server.host:settings.server.port
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod persistence;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::adapters::{definition_handler, dynamic_handler, health_handler, AppState};

/// Creates the axum application router: the definition management
/// endpoints, the health probe, and the dynamic dispatcher as the fallback
/// for every other path.
pub fn create_app(state: AppState) -> Router {
    let definition_routes = Router::new()
        .route("/create", post(definition_handler::create_definition))
        .route("/list", get(definition_handler::list_definitions))
        .route("/detail/{name}", get(definition_handler::get_definition))
        .route("/update/{name}", put(definition_handler::update_definition))
        .route("/delete/{name}", delete(definition_handler::delete_definition))
        .route("/reload", post(definition_handler::reload_definitions));

    Router::new()
        .route("/health", get(health_handler::health))
        .nest("/api-generator", definition_routes)
        .fallback(dynamic_handler::dispatch)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
