use std::fmt;

use super::state::ServerState;

/// Infrastructure a job type needs before it may be acquired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobRequirement {
    Database,
    Network,
    /// A named upstream service that can be banned or rate limited.
    Service(String),
}

impl JobRequirement {
    pub fn is_met(&self, state: &ServerState) -> bool {
        match self {
            JobRequirement::Database => state.database_available(),
            JobRequirement::Network => state.network_available(),
            JobRequirement::Service(name) => state.service_available(name),
        }
    }

    pub fn filter_name(&self) -> String {
        match self {
            JobRequirement::Database => "database-required".to_owned(),
            JobRequirement::Network => "network-required".to_owned(),
            JobRequirement::Service(name) => format!("{name}-available"),
        }
    }
}

impl fmt::Display for JobRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobRequirement::Database => f.write_str("database"),
            JobRequirement::Network => f.write_str("network"),
            JobRequirement::Service(name) => write!(f, "service:{name}"),
        }
    }
}
