//! Purpose: Turn an Eve settings document into resource definitions and controllers.
//! Exports: `ResourceDef`, `Domain`.
//! Role: Discovery layer: one `Resource` per `DOMAIN` entry, grouped by `/` in endpoint names.
//! Invariants: Endpoint names are unique; `a/b` lives in sub-domain `a` under key `b`.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::config::ClientConfig;
use super::endpoint::Endpoint;
use super::resource::Resource;
use super::transport::{ApiResult, Transport};
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;

/// One `DOMAIN` entry with Eve's defaults filled in.
#[derive(Clone, Debug)]
pub struct ResourceDef {
    pub endpoint: String,
    pub url: String,
    pub resource_title: String,
    pub item_title: String,
    pub schema: Schema,
}

impl ResourceDef {
    pub fn from_value(endpoint: &str, definition: &Value) -> ApiResult<Self> {
        let Some(definition) = definition.as_object() else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("resource '{endpoint}' must be a mapping"))
                .with_path(endpoint));
        };
        let text = |key: &str| definition.get(key).and_then(Value::as_str).map(str::to_string);
        let url = text("url").unwrap_or_else(|| endpoint.to_string());
        let resource_title = text("resource_title").unwrap_or_else(|| url.clone());
        let item_title = text("item_title").unwrap_or_else(|| {
            resource_title
                .strip_suffix('s')
                .filter(|stem| !stem.is_empty())
                .unwrap_or(&resource_title)
                .to_string()
        });
        let schema = match definition.get("schema") {
            Some(schema) => Schema::from_value(schema).map_err(|err| err.with_path(endpoint))?,
            None => Schema::default(),
        };
        Ok(Self {
            endpoint: endpoint.to_string(),
            url: url.trim_matches('/').to_string(),
            resource_title,
            item_title,
            schema,
        })
    }

    /// All definitions under `DOMAIN`, in declaration order.
    pub fn all_from_settings(settings: &Value) -> ApiResult<Vec<Self>> {
        let domain = match settings.get("DOMAIN") {
            Some(Value::Object(domain)) => domain,
            Some(_) => {
                return Err(Error::new(ErrorKind::Usage).with_message("DOMAIN must be a mapping"));
            }
            None => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("settings have no DOMAIN")
                    .with_hint("Pass the same settings document the server is configured with."));
            }
        };
        domain
            .iter()
            .map(|(endpoint, definition)| Self::from_value(endpoint, definition))
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Domain {
    resources: BTreeMap<String, Resource>,
    domains: BTreeMap<String, Domain>,
}

impl Domain {
    pub fn from_settings(
        settings: &Value,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> ApiResult<Self> {
        let definitions = ResourceDef::all_from_settings(settings)?;
        Self::from_definitions(definitions, transport, config)
    }

    pub fn from_definitions(
        definitions: Vec<ResourceDef>,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> ApiResult<Self> {
        let mut domain = Self::default();
        for def in definitions {
            let endpoint = Endpoint::new(
                def.url.clone(),
                Arc::new(def.schema),
                Arc::clone(&transport),
                config.timeouts,
            );
            let resource = Resource::new(def.endpoint.clone(), endpoint)
                .with_titles(def.resource_title, def.item_title)
                .with_items_per_page(config.items_per_page)?;
            debug!(endpoint = def.endpoint.as_str(), url = resource.url(), "resource loaded");
            domain.insert(&def.endpoint, resource)?;
        }
        Ok(domain)
    }

    fn insert(&mut self, path: &str, resource: Resource) -> ApiResult<()> {
        match path.split_once('/') {
            Some((head, rest)) => self.domains.entry(head.to_string()).or_default().insert(rest, resource),
            None => {
                if self.resources.insert(path.to_string(), resource).is_some() {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("duplicate resource name")
                        .with_path(path));
                }
                Ok(())
            }
        }
    }

    pub fn resource(&self, path: &str) -> Option<&Resource> {
        match path.split_once('/') {
            Some((head, rest)) => self.domains.get(head)?.resource(rest),
            None => self.resources.get(path),
        }
    }

    pub fn resource_mut(&mut self, path: &str) -> Option<&mut Resource> {
        match path.split_once('/') {
            Some((head, rest)) => self.domains.get_mut(head)?.resource_mut(rest),
            None => self.resources.get_mut(path),
        }
    }

    /// Like `resource_mut`, but a missing name is a NotFound error.
    pub fn require(&mut self, path: &str) -> ApiResult<&mut Resource> {
        let known = self.names().join(", ");
        self.resource_mut(path).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("no resource named '{path}'"))
                .with_hint(format!("Known resources: {known}"))
        })
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.get(name)
    }

    /// Full endpoint names of every resource, sub-domains included.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        for (prefix, domain) in &self.domains {
            names.extend(domain.names().into_iter().map(|name| format!("{prefix}/{name}")));
        }
        names.sort();
        names
    }

    pub fn describe(&self) -> Value {
        let mut out = Map::new();
        for name in self.names() {
            if let Some(resource) = self.resource(&name) {
                out.insert(
                    name,
                    serde_json::json!({
                        "url": resource.url(),
                        "title": resource.title(),
                        "item_title": resource.item_title(),
                        "fields": resource.schema().names(),
                    }),
                );
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{Domain, ResourceDef};
    use crate::api::config::ClientConfig;
    use crate::api::memory::MemoryStore;
    use crate::core::error::ErrorKind;
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> serde_json::Value {
        json!({
            "DOMAIN": {
                "people": {"schema": {"name": {"type": "string"}}},
                "admin/users": {"url": "admin/users", "item_title": "user", "schema": {}},
                "admin/groups": {"resource_title": "teams"}
            }
        })
    }

    #[test]
    fn eve_defaults_are_applied() {
        let defs = ResourceDef::all_from_settings(&settings()).expect("defs");
        assert_eq!(defs[0].url, "people");
        assert_eq!(defs[0].resource_title, "people");
        assert_eq!(defs[0].item_title, "people");
        assert_eq!(defs[2].item_title, "team");
        assert!(defs[2].schema.is_empty());
    }

    #[test]
    fn slashes_create_sub_domains() {
        let mut domain = Domain::from_settings(
            &settings(),
            Arc::new(MemoryStore::new()),
            &ClientConfig::default(),
        )
        .expect("domain");
        assert_eq!(domain.names(), vec!["admin/groups", "admin/users", "people"]);
        assert!(domain.domain("admin").and_then(|d| d.resource("users")).is_some());
        assert_eq!(domain.resource("admin/users").expect("users").item_title(), "user");
        assert_eq!(domain.require("nope").expect_err("missing").kind(), ErrorKind::NotFound);
        assert_eq!(domain.describe()["people"]["fields"], json!(["name"]));
    }

    #[test]
    fn settings_without_domain_are_rejected() {
        let err = ResourceDef::all_from_settings(&json!({"API_VERSION": "v1"})).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
