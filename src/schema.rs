//! OpenAPI document generated from the route table.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{Collection, Field};
use crate::router::{Route, RouteKind, RouteTable};

/// Title of the generated document.
pub const SCHEMA_TITLE: &str = "Mock Server API";

const ANY_METHODS: &[&str] = &["get", "post", "put", "patch", "delete"];

/// An OpenAPI 3 document describing every registered route.
#[derive(Debug, Serialize)]
pub struct OpenApiDocument {
    /// OpenAPI version
    pub openapi: &'static str,
    /// Title and version of the mock API
    pub info: Info,
    /// Operations keyed by path, then by lowercase method
    pub paths: BTreeMap<String, BTreeMap<String, Operation>>,
    /// Reusable schemas, omitted when empty
    #[serde(skip_serializing_if = "Components::is_empty")]
    pub components: Components,
}

/// Document metadata.
#[derive(Debug, Serialize)]
pub struct Info {
    /// API title
    pub title: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// One method on one path.
#[derive(Debug, Serialize)]
pub struct Operation {
    /// What the route serves, e.g. `List team records`
    pub summary: String,
    /// Path and header parameters
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    /// Responses keyed by status code
    pub responses: BTreeMap<String, ResponseSpec>,
}

/// A path variable or required header.
#[derive(Debug, Serialize)]
pub struct Parameter {
    /// Variable or header name
    pub name: String,
    /// `path` or `header`
    #[serde(rename = "in")]
    pub location: &'static str,
    /// Always true: path variables and matched headers are mandatory
    pub required: bool,
    /// JSON schema of the value
    pub schema: Value,
}

/// A documented response.
#[derive(Debug, Serialize)]
pub struct ResponseSpec {
    /// Human readable description
    pub description: String,
    /// Body schema by media type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BTreeMap<String, MediaType>>,
}

/// Body schema for one media type.
#[derive(Debug, Serialize)]
pub struct MediaType {
    /// JSON schema or `$ref`
    pub schema: Value,
}

/// Schemas shared between operations.
#[derive(Debug, Default, Serialize)]
pub struct Components {
    /// Collection record schemas keyed by collection name
    pub schemas: BTreeMap<String, Value>,
}

impl Components {
    fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Build the document for `routes`. Collections that declare fields get a
/// component schema referenced by their routes.
pub fn build_document(routes: &RouteTable, collections: &[Collection]) -> OpenApiDocument {
    let mut components = Components::default();
    for collection in collections.iter().filter(|c| !c.fields.is_empty()) {
        components
            .schemas
            .insert(collection.name.clone(), object_schema(&collection.fields));
    }

    let mut paths: BTreeMap<String, BTreeMap<String, Operation>> = BTreeMap::new();
    for route in routes.routes() {
        let item = paths.entry(route.pattern().display_path()).or_default();
        for method in route_methods(route) {
            // First registered route wins, as it does when resolving.
            item.entry(method.clone())
                .or_insert_with(|| operation(route, &method, &components));
        }
    }

    OpenApiDocument {
        openapi: "3.0.0",
        info: Info {
            title: SCHEMA_TITLE,
            version: env!("CARGO_PKG_VERSION"),
        },
        paths,
        components,
    }
}

fn route_methods(route: &Route) -> Vec<String> {
    if route.accepts_any_method() {
        return ANY_METHODS.iter().map(|m| m.to_string()).collect();
    }
    route
        .methods()
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

fn operation(route: &Route, method: &str, components: &Components) -> Operation {
    let mut parameters: Vec<Parameter> = route
        .pattern()
        .params()
        .iter()
        .map(|name| Parameter {
            name: name.clone(),
            location: "path",
            required: true,
            schema: json!({"type": "string"}),
        })
        .collect();
    parameters.extend(route.headers().iter().map(|(name, value)| Parameter {
        name: name.clone(),
        location: "header",
        required: true,
        schema: json!({"type": "string", "enum": [value]}),
    }));

    let (summary, body) = match route.kind() {
        RouteKind::Collection(name) => {
            let summary = match method {
                "post" => format!("Create a {name} record"),
                _ => format!("List {name} records"),
            };
            let body = component_ref(components, name).map(|schema| match method {
                "post" => schema,
                _ => json!({"type": "array", "items": schema}),
            });
            (summary, body)
        }
        RouteKind::Element(name) => {
            let summary = match method {
                "put" => format!("Update a {name} record"),
                "delete" => format!("Delete a {name} record"),
                _ => format!("Get a {name} record"),
            };
            (summary, component_ref(components, name))
        }
        RouteKind::Endpoint(name) => (format!("Endpoint {name}"), None),
        RouteKind::Proxy => ("Proxied request".to_string(), None),
        RouteKind::Builtin => (format!("Built-in {}", route.pattern().as_str()), None),
    };

    let content = body.map(|schema| {
        BTreeMap::from([("application/json".to_string(), MediaType { schema })])
    });
    Operation {
        summary,
        parameters,
        responses: BTreeMap::from([(
            "200".to_string(),
            ResponseSpec {
                description: "OK".to_string(),
                content,
            },
        )]),
    }
}

fn component_ref(components: &Components, name: &str) -> Option<Value> {
    components
        .schemas
        .contains_key(name)
        .then(|| json!({"$ref": format!("#/components/schemas/{name}")}))
}

fn object_schema(fields: &[Field]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|field| (field.name.clone(), field_schema(&field.kind)))
        .collect();
    json!({"type": "object", "properties": properties})
}

fn field_schema(kind: &str) -> Value {
    match kind.to_ascii_lowercase().as_str() {
        "int" | "integer" => json!({"type": "integer"}),
        "number" | "float" | "double" => json!({"type": "number"}),
        "bool" | "boolean" => json!({"type": "boolean"}),
        "array" => json!({"type": "array", "items": {}}),
        "object" | "map" => json!({"type": "object"}),
        _ => json!({"type": "string"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::router::build_routes;
    use crate::template::TemplateEngine;
    use std::sync::Arc;

    fn document(yaml: &str) -> Value {
        let config = Configuration::from_yaml(yaml.as_bytes()).unwrap();
        let routes = build_routes(
            &config,
            Arc::new(TemplateEngine::new()),
            reqwest::Client::new(),
            false,
        )
        .unwrap();
        serde_json::to_value(build_document(&routes, &config.collections)).unwrap()
    }

    #[test]
    fn test_collection_paths_and_components() {
        let doc = document(
            r#"
collections:
  - name: team
    fields:
      - name: name
        kind: string
      - name: size
        kind: int
"#,
        );
        assert_eq!(doc["openapi"], "3.0.0");
        assert_eq!(doc["info"]["title"], SCHEMA_TITLE);
        assert_eq!(
            doc["components"]["schemas"]["team"]["properties"]["size"]["type"],
            "integer"
        );

        let list = &doc["paths"]["/team"]["get"];
        assert_eq!(
            list["responses"]["200"]["content"]["application/json"]["schema"]["items"]["$ref"],
            "#/components/schemas/team"
        );
        assert!(doc["paths"]["/team"]["post"].is_object());

        let element = &doc["paths"]["/team/{name}"];
        assert!(element["get"].is_object());
        assert!(element["put"].is_object());
        assert!(element["delete"].is_object());
        assert_eq!(element["get"]["parameters"][0]["in"], "path");
        assert!(doc["paths"]["/api.json"]["get"].is_object());
    }

    #[test]
    fn test_endpoint_and_proxy_paths() {
        let doc = document(
            r#"
endpoints:
  - name: repo
    request:
      path: /repos/{owner}/{name}
      method: GET,PUT
      header:
        x-tenant: blue
proxies:
  - path: /api/{rest:.*}
    target: http://localhost:9090
"#,
        );
        let repo = &doc["paths"]["/repos/{owner}/{name}"];
        assert_eq!(repo["get"]["summary"], "Endpoint repo");
        assert!(repo["put"].is_object());
        let params = repo["get"]["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[2]["in"], "header");
        assert_eq!(params[2]["schema"]["enum"][0], "blue");

        let proxy = &doc["paths"]["/api/{rest}"];
        assert!(proxy["patch"].is_object());
        assert!(doc.get("components").is_none());
    }
}
