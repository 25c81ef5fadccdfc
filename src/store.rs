//! Read-only configuration store consumed by the gateway core
//!
//! The core never mutates tenants, servers or tools; it reads them through
//! [`ConfigStore`]. [`MemoryStore`] is the process-local implementation used
//! by the binary (seeded from the config file) and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ToolDefinition;

/// Errors returned by a [`ConfigStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("store lock poisoned")]
    Poisoned,
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// An isolated customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Authorization server issuers trusted for this tenant's servers
    #[serde(default)]
    pub allowed_issuers: Vec<String>,
    /// Hosts upstream calls may be sent to
    #[serde(default)]
    pub egress_allowlist: Vec<String>,
}

/// A named MCP endpoint owned by a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub slug: String,
    #[serde(alias = "tenant")]
    pub tenant_slug: String,
    #[serde(default)]
    pub name: String,
    /// Audience tokens must carry to call this server
    #[serde(default)]
    pub audience: String,
    /// Overrides the tenant's issuers when non-empty
    #[serde(default)]
    pub allowed_issuers: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub upstream_base_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Server {
    /// Issuers to try, in order: the server's own list if it has one,
    /// otherwise the tenant's.
    pub fn candidate_issuers<'a>(&'a self, tenant: &'a Tenant) -> &'a [String] {
        if self.allowed_issuers.is_empty() {
            &tenant.allowed_issuers
        } else {
            &self.allowed_issuers
        }
    }
}

/// How a tool call becomes an upstream HTTP request.
///
/// `path`, query values, header values and string leaves of `body` may
/// contain `{{name}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: String::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// A callable operation exposed by a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Stable identifier; falls back to `name` when left empty
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mapping: RequestTemplate,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
}

impl Tool {
    /// True when `key` names this tool by name or by id.
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.id == key
    }

    /// The `tools/list` view of this tool.
    pub fn definition(&self) -> ToolDefinition {
        let output_schema = self
            .output_schema
            .as_ref()
            .filter(|s| s.is_object() && s.get("type").and_then(Value::as_str) == Some("object"))
            .cloned();

        ToolDefinition {
            name: self.name.clone(),
            title: self.title.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
            output_schema,
        }
    }
}

/// Read-only view of tenants, servers and tools
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn tenant(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;

    async fn server(&self, slug: &str) -> Result<Option<Server>, StoreError>;

    /// All tools of a server, enabled or not
    async fn tools(&self, server_slug: &str) -> Result<Vec<Tool>, StoreError>;

    /// Look a tool up by name or id
    async fn tool(&self, server_slug: &str, name_or_id: &str) -> Result<Option<Tool>, StoreError> {
        Ok(self
            .tools(server_slug)
            .await?
            .into_iter()
            .find(|t| t.matches(name_or_id)))
    }
}

/// A tool entry in seed data, tagged with the server it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTool {
    pub server: String,
    #[serde(flatten)]
    pub tool: Tool,
}

/// Tenants, servers and tools loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub tools: Vec<SeedTool>,
}

/// In-memory [`ConfigStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tenants: RwLock<HashMap<String, Tenant>>,
    servers: RwLock<HashMap<String, Server>>,
    tools: RwLock<HashMap<String, Vec<Tool>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from seed data. Servers must reference a seeded
    /// tenant and tools a seeded server.
    pub fn from_seed(seed: &SeedData) -> Result<Self, StoreError> {
        let store = Self::new();
        for tenant in &seed.tenants {
            store.upsert_tenant(tenant.clone())?;
        }
        for server in &seed.servers {
            store.upsert_server(server.clone())?;
        }

        let mut by_server: BTreeMap<&str, Vec<Tool>> = BTreeMap::new();
        for entry in &seed.tools {
            by_server
                .entry(entry.server.as_str())
                .or_default()
                .push(entry.tool.clone());
        }
        for (server, tools) in by_server {
            store.set_tools(server, tools)?;
        }
        Ok(store)
    }

    pub fn upsert_tenant(&self, tenant: Tenant) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().map_err(|_| StoreError::Poisoned)?;
        tenants.insert(tenant.slug.clone(), tenant);
        Ok(())
    }

    pub fn upsert_server(&self, server: Server) -> Result<(), StoreError> {
        {
            let tenants = self.tenants.read().map_err(|_| StoreError::Poisoned)?;
            if !tenants.contains_key(&server.tenant_slug) {
                return Err(StoreError::UnknownTenant(server.tenant_slug.clone()));
            }
        }
        let mut servers = self.servers.write().map_err(|_| StoreError::Poisoned)?;
        servers.insert(server.slug.clone(), server);
        Ok(())
    }

    /// Replace the tool list of a server.
    pub fn set_tools(&self, server_slug: &str, tools: Vec<Tool>) -> Result<(), StoreError> {
        {
            let servers = self.servers.read().map_err(|_| StoreError::Poisoned)?;
            if !servers.contains_key(server_slug) {
                return Err(StoreError::UnknownServer(server_slug.to_string()));
            }
        }
        let tools = tools
            .into_iter()
            .map(|mut t| {
                if t.id.is_empty() {
                    t.id = t.name.clone();
                }
                t
            })
            .collect();
        let mut all = self.tools.write().map_err(|_| StoreError::Poisoned)?;
        all.insert(server_slug.to_string(), tools);
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn tenant(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let tenants = self.tenants.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tenants.get(slug).cloned())
    }

    async fn server(&self, slug: &str) -> Result<Option<Server>, StoreError> {
        let servers = self.servers.read().map_err(|_| StoreError::Poisoned)?;
        Ok(servers.get(slug).cloned())
    }

    async fn tools(&self, server_slug: &str) -> Result<Vec<Tool>, StoreError> {
        let tools = self.tools.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tools.get(server_slug).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed() -> SeedData {
        serde_json::from_value(json!({
            "tenants": [{
                "slug": "tenant-a",
                "allowed_issuers": ["https://idp.example.com"],
                "egress_allowlist": ["api.example.com"]
            }],
            "servers": [{
                "slug": "sales",
                "tenant": "tenant-a",
                "audience": "https://gateway.example.com/sales",
                "upstream_base_url": "https://api.example.com"
            }],
            "tools": [{
                "server": "sales",
                "name": "getOrder",
                "required_scopes": ["read:orders"],
                "mapping": { "path": "/api/orders/{{orderId}}" }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_seed_resolves_tools_by_name_or_id() {
        let store = MemoryStore::from_seed(&seed()).unwrap();

        let tool = store.tool("sales", "getOrder").await.unwrap().unwrap();
        assert_eq!(tool.id, "getOrder");
        assert_eq!(tool.mapping.method, "GET");
        assert!(tool.enabled);

        assert!(store.tool("sales", "missing").await.unwrap().is_none());
        assert!(store.tools("products").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_candidate_issuers_prefers_server_override() {
        let store = MemoryStore::from_seed(&seed()).unwrap();
        let tenant = store.tenant("tenant-a").await.unwrap().unwrap();
        let mut server = store.server("sales").await.unwrap().unwrap();

        assert_eq!(
            server.candidate_issuers(&tenant),
            &["https://idp.example.com".to_string()]
        );

        server.allowed_issuers = vec!["https://other.example.com".to_string()];
        assert_eq!(
            server.candidate_issuers(&tenant),
            &["https://other.example.com".to_string()]
        );
    }

    #[test]
    fn test_seed_rejects_dangling_references() {
        let mut data = seed();
        data.servers[0].tenant_slug = "nobody".to_string();
        assert!(matches!(
            MemoryStore::from_seed(&data),
            Err(StoreError::UnknownTenant(_))
        ));

        let mut data = seed();
        data.tools[0].server = "nowhere".to_string();
        assert!(matches!(
            MemoryStore::from_seed(&data),
            Err(StoreError::UnknownServer(_))
        ));
    }

    #[test]
    fn test_definition_only_exposes_object_output_schema() {
        let mut tool = seed().tools.remove(0).tool;
        tool.output_schema = Some(json!({ "type": "string" }));
        assert!(tool.definition().output_schema.is_none());

        tool.output_schema = Some(json!({ "type": "object", "properties": {} }));
        assert!(tool.definition().output_schema.is_some());
    }
}
