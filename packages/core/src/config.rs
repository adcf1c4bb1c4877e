/// Configuration for the graph synchronization engine
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound for `max_search_limit`; larger result pages belong to a query,
/// not an autocomplete
const MAX_SUPPORTED_SEARCH_LIMIT: usize = 10_000;

/// What a save does when a relationship names a node that does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTargetPolicy {
    /// Fail the save and roll back the whole transaction
    #[default]
    Abort,
    /// Create a `STUMP` placeholder carrying the target name, then the edge
    CreateStub,
    /// Log a warning, leave the relationship out and keep going
    Skip,
}

impl FromStr for MissingTargetPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(Self::Abort),
            "create_stub" | "stub" => Ok(Self::CreateStub),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown missing target policy: {other}")),
        }
    }
}

/// Connection and behaviour settings
///
/// Every field has a default, so a loader may supply any subset.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bolt endpoint
    pub uri: String,

    pub user: String,

    pub password: String,

    /// Target database; the server default when unset
    pub database: Option<String>,

    /// Bolt pool size per connection handle
    pub max_connections: usize,

    /// Rows pulled per Bolt fetch
    pub fetch_size: usize,

    /// Identity written to `_author` on every save
    pub author: String,

    pub missing_target_policy: MissingTargetPolicy,

    /// Largest `limit` accepted by prefix search
    pub max_search_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: None,
            max_connections: 4,
            fetch_size: 200,
            author: "System".to_string(),
            missing_target_policy: MissingTargetPolicy::Abort,
            max_search_limit: 100,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("fetch_size", &self.fetch_size)
            .field("author", &self.author)
            .field("missing_target_policy", &self.missing_target_policy)
            .field("max_search_limit", &self.max_search_limit)
            .finish()
    }
}

impl SyncConfig {
    /// Defaults overlaid with `WORLDGRAPH_*` environment variables
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(uri) = lookup("WORLDGRAPH_URI") {
            config.uri = uri;
        }
        if let Some(user) = lookup("WORLDGRAPH_USER") {
            config.user = user;
        }
        if let Some(password) = lookup("WORLDGRAPH_PASSWORD") {
            config.password = password;
        }
        if let Some(database) = lookup("WORLDGRAPH_DATABASE") {
            config.database = Some(database).filter(|db| !db.is_empty());
        }
        if let Some(author) = lookup("WORLDGRAPH_AUTHOR") {
            config.author = author;
        }
        if let Some(policy) = lookup("WORLDGRAPH_MISSING_TARGET_POLICY") {
            config.missing_target_policy = policy.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.uri.trim().is_empty() {
            return Err("uri cannot be empty".to_string());
        }

        if self.author.trim().is_empty() {
            return Err("author cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.fetch_size == 0 {
            return Err("fetch_size must be greater than 0".to_string());
        }

        if self.max_search_limit == 0 || self.max_search_limit > MAX_SUPPORTED_SEARCH_LIMIT {
            return Err(format!(
                "max_search_limit must be between 1 and {}",
                MAX_SUPPORTED_SEARCH_LIMIT
            ));
        }

        Ok(())
    }
}
