//! Server and logical source identity

use serde::{Deserialize, Serialize};

/// Session label used for job history runs
pub const AGENT_JOBS_SESSION: &str = "agent_jobs";

/// What the connector reports about the monitored server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Name the connection was opened with
    #[serde(default)]
    pub fqdn: String,
    pub domain: String,
    pub computer: String,
    /// Display name, e.g. `HOST\INSTANCE`
    pub server: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub product_version: String,
}

/// Class of events a logical source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    AgentJobs,
}

impl EventClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EventClass::AgentJobs => "agent_jobs",
        }
    }
}

/// (domain, server, class, session): the unit of checkpointing and run exclusion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub domain: String,
    pub server: String,
    pub class: EventClass,
    pub session: String,
}

impl SourceIdentity {
    pub fn new(
        domain: impl Into<String>,
        server: impl Into<String>,
        class: EventClass,
        session: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            server: server.into(),
            class,
            session: session.into(),
        }
    }

    pub fn agent_jobs(info: &ServerInfo) -> Self {
        Self::new(
            info.domain.clone(),
            info.server.clone(),
            EventClass::AgentJobs,
            AGENT_JOBS_SESSION,
        )
    }

    /// File-system safe key, also used as the guard registry key
    pub fn key(&self) -> String {
        format!(
            "{}__{}__{}__{}",
            path_safe(&self.domain),
            path_safe(&self.server),
            self.class.as_str(),
            path_safe(&self.session)
        )
    }

    /// Key of the per-server delivery counter: `<domain>-<server>-<class>`
    pub fn counter_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.domain,
            self.server.replace('\\', "-"),
            self.class.as_str()
        )
    }
}

impl std::fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.domain,
            self.server,
            self.class.as_str(),
            self.session
        )
    }
}

/// Replace characters that cannot appear in a file name
///
/// Applied to the server display name before it becomes a sink id.
pub fn path_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
