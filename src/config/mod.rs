use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Application settings, layered as: built-in defaults, then an optional
/// TOML file, then CLI arguments (which also bind the `MONGO_*` and
/// `SERVER_*` environment variables).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub mongo: MongoSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MongoSettings {
    pub uri: String,
    pub db_name: String,
    pub definitions_collection: String,
}

/// Timeout budgets in seconds. Each I/O operation uses the smaller of its
/// own budget and the deadline inherited from the request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Budget for one request's interpreter run plus dynamic store I/O.
    pub request_secs: u64,
    /// Budget for a single definition CRUD operation.
    pub definition_crud_secs: u64,
    /// Budget for the post-processing persistence of a request's data.
    pub save_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request_secs: 20,
            definition_crud_secs: 10,
            save_secs: 10,
        }
    }
}

impl Settings {
    /// Load settings from the config file named by the CLI, then apply CLI
    /// and environment overrides.
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(cli.config.clone()).required(false))
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("mongo.uri", "mongodb://localhost:27017")?
            .set_default("mongo.db_name", "dynamic-api-db")?
            .set_default("mongo.definitions_collection", "api-definitions")?
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;
        settings.apply_cli_overrides(cli);

        if settings.mongo.uri.is_empty() || settings.mongo.db_name.is_empty() {
            anyhow::bail!("configuration error: MongoDB URI and database name cannot be empty");
        }

        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(uri) = &cli.mongo_uri {
            self.mongo.uri = uri.clone();
        }
        if let Some(db_name) = &cli.mongo_db_name {
            self.mongo.db_name = db_name.clone();
        }
        if let Some(collection) = &cli.definitions_collection {
            self.mongo.definitions_collection = collection.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_without_file() {
        let cli = Cli::parse_from(["dynapi", "--config", "does-not-exist.toml"]);
        let settings = Settings::new_with_cli(&cli).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.mongo.uri, "mongodb://localhost:27017");
        assert_eq!(settings.mongo.db_name, "dynamic-api-db");
        assert_eq!(settings.mongo.definitions_collection, "api-definitions");
        assert_eq!(settings.timeouts.request_secs, 20);
        assert_eq!(settings.timeouts.definition_crud_secs, 10);
        assert_eq!(settings.timeouts.save_secs, 10);
    }

    #[test]
    fn test_cli_overrides_win() {
        let cli = Cli::parse_from([
            "dynapi",
            "--config",
            "does-not-exist.toml",
            "--port",
            "8080",
            "--mongo-uri",
            "mongodb://db:27017",
            "--mongo-db-name",
            "gateway",
            "--definitions-collection",
            "defs",
        ]);
        let settings = Settings::new_with_cli(&cli).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.mongo.uri, "mongodb://db:27017");
        assert_eq!(settings.mongo.db_name, "gateway");
        assert_eq!(settings.mongo.definitions_collection, "defs");
    }
}
