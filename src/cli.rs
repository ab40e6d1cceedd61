use clap::Parser;
use std::path::PathBuf;

/// Dynamic API gateway: register endpoint definitions at runtime and serve
/// them through a conditional flow interpreter.
#[derive(Parser, Debug, Clone)]
#[command(name = "dynapi", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "DYNAPI_CONFIG", default_value = "dynapi.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// MongoDB connection URI
    #[arg(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// Database holding the API definition collection
    #[arg(long, env = "MONGO_DB_NAME")]
    pub mongo_db_name: Option<String>,

    /// Collection holding the API definitions
    #[arg(long, env = "MONGO_API_DEF_COLLECTION")]
    pub definitions_collection: Option<String>,
}
