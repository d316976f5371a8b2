use serde::{Deserialize, Serialize};

/// Connection settings for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "fieldline".to_string(),
            username: "fieldline".to_string(),
            password: "fieldline".to_string(),
            max_pool_size: 10,
        }
    }
}
