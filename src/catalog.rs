//! Schema catalog: turns a `paths`-shaped API description document into a
//! normalized endpoint list. Only `parameters` and the JSON request body
//! schema are read; summaries, response schemas and auth schemes are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::EngineError;
use crate::schema::{SchemaNode, SchemaResolver};
use crate::types::EndpointId;

const METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

impl ParamLocation {
    fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw {
            "path" => Ok(Self::Path),
            "query" => Ok(Self::Query),
            "header" => Ok(Self::Header),
            "body" => Ok(Self::Body),
            other => Err(EngineError::SchemaFormat(format!(
                "unknown parameter location `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: SchemaNode,
}

impl Parameter {
    fn parse(value: &Value, resolver: &SchemaResolver<'_>) -> Result<Self, EngineError> {
        let obj = value.as_object().ok_or_else(|| {
            EngineError::SchemaFormat("parameter entry is not a JSON object".into())
        })?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::SchemaFormat("parameter has no `name`".into()))?;
        let location = obj
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::SchemaFormat(format!("parameter `{name}` has no `in` location"))
            })
            .and_then(ParamLocation::parse)?;
        // a parameter without a schema defaults to a plain string
        let schema = match obj.get("schema") {
            Some(raw) => resolver.resolve(raw)?,
            None => SchemaNode::string(),
        };
        Ok(Self {
            name: name.to_string(),
            location,
            required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
            schema,
        })
    }
}

/// One `(method, path)` pair with its parameter and body schemas. Immutable
/// once parsed; lives as long as its catalog.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub path: String,
    pub method: Method,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<SchemaNode>,
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        EndpointId::new(self.method.clone(), self.path.clone())
    }
}

#[derive(Debug)]
pub struct SchemaCatalog {
    endpoints: Vec<Endpoint>,
}

impl SchemaCatalog {
    /// Parses a schema document. Fails with `SchemaFormat` when the required
    /// top-level `paths` object is missing or malformed; a path with zero
    /// recognized methods is skipped, not an error.
    pub fn parse(document: &Value) -> Result<Self, EngineError> {
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                EngineError::SchemaFormat("document has no `paths` object".into())
            })?;
        let resolver = SchemaResolver::new(document);

        let mut endpoints = Vec::new();
        for (path, item) in paths {
            let Some(item_obj) = item.as_object() else {
                continue;
            };
            for method in METHODS {
                let key = method.as_str().to_ascii_lowercase();
                let Some(operation) = item_obj.get(&key).and_then(Value::as_object) else {
                    continue;
                };
                let parameters = flatten_parameters(
                    item_obj.get("parameters"),
                    operation.get("parameters"),
                    &resolver,
                )?;
                let request_body = operation
                    .get("requestBody")
                    .and_then(|body| body.pointer("/content/application~1json/schema"))
                    .map(|raw| resolver.resolve(raw))
                    .transpose()?;
                endpoints.push(Endpoint {
                    path: path.clone(),
                    method,
                    parameters,
                    request_body,
                });
            }
        }

        info!("✅ Parsed schema catalog: {} endpoint(s)", endpoints.len());
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.method == *method && e.path == path)
    }
}

/// Path-level and operation-level parameters flattened into one ordered,
/// deduplicated list. Operation-level entries override path-level ones with
/// the same name and location.
fn flatten_parameters(
    path_level: Option<&Value>,
    operation_level: Option<&Value>,
    resolver: &SchemaResolver<'_>,
) -> Result<Vec<Parameter>, EngineError> {
    let mut out: Vec<Parameter> = Vec::new();
    for source in [path_level, operation_level].into_iter().flatten() {
        let list = source.as_array().ok_or_else(|| {
            EngineError::SchemaFormat("`parameters` is not an array".into())
        })?;
        for raw in list {
            let parsed = Parameter::parse(raw, resolver)?;
            match out
                .iter_mut()
                .find(|p| p.name == parsed.name && p.location == parsed.location)
            {
                Some(existing) => *existing = parsed,
                None => out.push(parsed),
            }
        }
    }
    Ok(out)
}

/// Fetches and parses schema documents over HTTP, caching parsed catalogs by
/// source URL. Repeated loads of the same URL are idempotent and cheap; the
/// trade-off is stale data if the remote document changes mid-session.
pub struct CatalogLoader {
    client: Client,
    cache: HashMap<String, Arc<SchemaCatalog>>,
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            cache: HashMap::new(),
        }
    }

    pub async fn load(&mut self, url: &str) -> Result<Arc<SchemaCatalog>, EngineError> {
        if let Some(hit) = self.cache.get(url) {
            return Ok(hit.clone());
        }

        info!("📡 Fetching schema document from {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let document: Value = response.json().await.map_err(|e| {
            EngineError::SchemaFormat(format!("response body is not JSON: {e}"))
        })?;

        let catalog = Arc::new(SchemaCatalog::parse(&document)?);
        self.cache.insert(url.to_string(), catalog.clone());
        Ok(catalog)
    }
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Value {
        json!({
            "paths": {
                "/items": {
                    "get": {
                        "parameters": [
                            {"name": "limit", "in": "query", "schema": {"type": "integer"}}
                        ]
                    },
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"name": {"type": "string"}}
                                    }
                                }
                            }
                        }
                    }
                },
                "/items/{id}": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true,
                         "schema": {"type": "integer", "minimum": 1}}
                    ],
                    "get": {},
                    "delete": {}
                },
                "/webhooks": {
                    "trace": {}
                }
            }
        })
    }

    #[test]
    fn enumerates_recognized_methods_only() {
        let catalog = SchemaCatalog::parse(&sample_document()).unwrap();
        let ids: Vec<String> = catalog
            .endpoints()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert!(ids.contains(&"GET /items".to_string()));
        assert!(ids.contains(&"POST /items".to_string()));
        assert!(ids.contains(&"GET /items/{id}".to_string()));
        assert!(ids.contains(&"DELETE /items/{id}".to_string()));
        // /webhooks has zero recognized methods and is skipped silently
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn missing_paths_is_a_format_error() {
        let err = SchemaCatalog::parse(&json!({"info": {}})).unwrap_err();
        assert!(matches!(err, EngineError::SchemaFormat(_)));
    }

    #[test]
    fn path_level_parameters_are_inherited() {
        let catalog = SchemaCatalog::parse(&sample_document()).unwrap();
        let endpoint = catalog.find(&Method::DELETE, "/items/{id}").unwrap();
        assert_eq!(endpoint.parameters.len(), 1);
        assert_eq!(endpoint.parameters[0].name, "id");
        assert_eq!(endpoint.parameters[0].location, ParamLocation::Path);
        assert!(endpoint.parameters[0].required);
    }

    #[test]
    fn operation_parameters_override_path_level() {
        let document = json!({
            "paths": {
                "/items/{id}": {
                    "parameters": [
                        {"name": "id", "in": "path", "schema": {"type": "string"}}
                    ],
                    "get": {
                        "parameters": [
                            {"name": "id", "in": "path", "required": true,
                             "schema": {"type": "integer"}},
                            {"name": "verbose", "in": "query",
                             "schema": {"type": "boolean"}}
                        ]
                    }
                }
            }
        });
        let catalog = SchemaCatalog::parse(&document).unwrap();
        let endpoint = catalog.find(&Method::GET, "/items/{id}").unwrap();
        // ordered: the overridden `id` keeps its original position
        assert_eq!(endpoint.parameters.len(), 2);
        assert_eq!(endpoint.parameters[0].name, "id");
        assert!(endpoint.parameters[0].required);
        assert!(matches!(
            endpoint.parameters[0].schema.kind,
            crate::schema::SchemaKind::Integer(_)
        ));
        assert_eq!(endpoint.parameters[1].name, "verbose");
    }

    #[test]
    fn request_body_reads_json_content_only() {
        let catalog = SchemaCatalog::parse(&sample_document()).unwrap();
        let endpoint = catalog.find(&Method::POST, "/items").unwrap();
        assert!(endpoint.request_body.is_some());
        let endpoint = catalog.find(&Method::GET, "/items").unwrap();
        assert!(endpoint.request_body.is_none());
    }

    #[tokio::test]
    async fn loader_caches_by_url() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_document()))
            .expect(1)
            .mount(&server)
            .await;

        let mut loader = CatalogLoader::new();
        let url = format!("{}/openapi.json", server.uri());
        let first = loader.load(&url).await.unwrap();
        let second = loader.load(&url).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn loader_maps_http_failure_to_fetch_error() {
        let server = wiremock::MockServer::start().await;
        let mut loader = CatalogLoader::new();
        let url = format!("{}/openapi.json", server.uri());
        // no mock mounted: wiremock answers 404
        let err = loader.load(&url).await.unwrap_err();
        assert!(matches!(err, EngineError::SchemaFetch(_)));
    }
}
