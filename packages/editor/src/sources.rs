//! # Source Resolver
//!
//! Turns the report's declared sources into a name → value map and a
//! [`Root`] for evaluation. Declared sources resolve strictly one after
//! another, in declaration order:
//!
//! - `fetch`: one request when `fetch` is set or nothing is cached; url,
//!   method and body are templates and headers are templates (object) or an
//!   expression (string), all evaluated against an empty root
//! - `static`: the stored payload, JSON-parsed when it is text and `eval` is off
//! - `computed`: a registered producer called with the parameter values
//!
//! A missing available source or a failed fetch/producer leaves the name
//! unbound. Cache writes are returned rather than applied.

use crate::errors::FetchError;
use crate::model::{AvailableSource, SourceDecl, SourceKind};
use folio_expr::{
    display, evaluate_str, evaluate_template, init_parameters, truthy, Context, Operators, Root,
};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Network boundary; returns the response body
pub trait HttpClient: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<String, FetchError>>;
}

/// Producer for a computed source, keyed by the available source name
pub type Producer = Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Cached payload to write back to `sources[index].data`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub index: usize,
    /// Name of the available source the payload was fetched for
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub values: Map<String, Value>,
    pub cache_updates: Vec<CacheUpdate>,
}

#[derive(Clone)]
pub struct SourceResolver {
    http: Option<Arc<dyn HttpClient>>,
    producers: HashMap<String, Producer>,
    operators: Arc<Operators>,
}

impl fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceResolver")
            .field("http", &self.http.is_some())
            .field("producers", &self.producers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new(Arc::new(Operators::builtin()))
    }
}

impl SourceResolver {
    pub fn new(operators: Arc<Operators>) -> Self {
        Self {
            http: None,
            producers: HashMap::new(),
            operators,
        }
    }

    pub fn with_http(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    pub fn set_http(&mut self, client: Arc<dyn HttpClient>) {
        self.http = Some(client);
    }

    pub fn register_producer<F>(&mut self, name: impl Into<String>, producer: F)
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        self.producers.insert(name.into(), Arc::new(producer));
    }

    pub fn operators(&self) -> &Arc<Operators> {
        &self.operators
    }

    /// Resolve every declared source of `report` against `available`
    #[tracing::instrument(skip_all, fields(declared = tracing::field::Empty))]
    pub async fn resolve(&self, report: &Value, available: &[Value], params: &Map<String, Value>) -> Resolved {
        let decls = SourceDecl::list(report);
        tracing::Span::current().record("declared", decls.len());
        let mut resolved = Resolved::default();

        for decl in decls {
            let found = available.iter().enumerate().find_map(|(index, entry)| {
                let source: AvailableSource = serde_json::from_value(entry.clone()).ok()?;
                (source.name == decl.backing()).then_some((index, source))
            });
            let Some((index, source)) = found else {
                tracing::debug!(name = %decl.name, backing = decl.backing(), "no available source");
                continue;
            };

            let value = match source.kind {
                SourceKind::Static => static_value(&source),
                SourceKind::Fetch => match (&source.data, source.fetch) {
                    (Some(cached), false) => cached.clone(),
                    _ => match self.fetch(&source).await {
                        Ok(data) => {
                            if !source.fetch {
                                resolved.cache_updates.push(CacheUpdate {
                                    index,
                                    name: source.name.clone(),
                                    data: data.clone(),
                                });
                            }
                            data
                        }
                        Err(error) => {
                            tracing::warn!(name = %decl.name, %error, "fetch failed, source left unbound");
                            continue;
                        }
                    },
                },
                SourceKind::Computed => {
                    let args = self.producer_args(&decl, params, &resolved.values);
                    match self.produce(&source.name, args).await {
                        Ok(data) => data,
                        Err(error) => {
                            tracing::warn!(name = %decl.name, %error, "producer failed, source left unbound");
                            continue;
                        }
                    }
                }
            };

            let value = self.shape(&decl, value, params, &resolved.values);
            tracing::debug!(name = %decl.name, "source resolved");
            resolved.values.insert(decl.name.clone(), value);
        }

        resolved
    }

    /// Parameters, resolved sources and specials combined into an evaluation root
    pub async fn build_root(
        &self,
        report: &Value,
        available: &[Value],
        overrides: &Map<String, Value>,
        special: Map<String, Value>,
    ) -> (Root, Vec<CacheUpdate>) {
        let params = init_parameters(report, overrides);
        let resolved = self.resolve(report, available, &params).await;

        let root = Root::default()
            .with_operators(self.operators.clone())
            .with_sources(resolved.values)
            .with_params(params)
            .with_special(special);
        let value = match report.get("context") {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                let ctx = Context::root(Arc::new(root.clone()));
                evaluate_str(&ctx, text).unwrap_or_else(|error| {
                    tracing::warn!(%error, "report context failed to evaluate");
                    Value::Object(Map::new())
                })
            }
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };

        let root = Root { value, ..root };
        (root, resolved.cache_updates)
    }

    async fn fetch(&self, source: &AvailableSource) -> Result<Value, FetchError> {
        let request = self.request_for(source)?;
        let url = request.url.clone();
        let client = self.http.as_ref().ok_or_else(|| FetchError::Request {
            url: url.clone(),
            message: "no HTTP client configured".to_string(),
        })?;

        tracing::debug!(method = %request.method, %url, "fetching source");
        let body = client.send(request).await?;
        if source.eval {
            Ok(Value::String(body))
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    /// Evaluate the request fields against an empty root
    pub fn request_for(&self, source: &AvailableSource) -> Result<HttpRequest, FetchError> {
        let root = Root::new(Value::Object(Map::new())).with_operators(self.operators.clone());
        let ctx = Context::root(Arc::new(root));
        let template = |field: &'static str, text: &str| {
            evaluate_template(&ctx, text)
                .map(|v| display(&v))
                .map_err(|e| FetchError::Field {
                    field,
                    message: e.to_string(),
                })
        };

        let url = template("url", source.url.as_deref().unwrap_or_default())?;
        let method = match source.method.as_deref() {
            Some(method) if !method.trim().is_empty() => template("method", method)?.to_uppercase(),
            _ => "GET".to_string(),
        };
        let body = match source.body.as_deref() {
            Some(body) if !body.is_empty() => Some(template("body", body)?),
            _ => None,
        };

        let headers = match &source.headers {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(text) => template("headers", text)?,
                        other => display(other),
                    };
                    Ok((name.clone(), value))
                })
                .collect::<Result<Vec<_>, FetchError>>()?,
            Some(Value::String(expr)) if !expr.trim().is_empty() => {
                let value = evaluate_str(&ctx, expr).map_err(|e| FetchError::Field {
                    field: "headers",
                    message: e.to_string(),
                })?;
                match value {
                    Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), display(v))).collect(),
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    fn producer_args(
        &self,
        decl: &SourceDecl,
        params: &Map<String, Value>,
        resolved: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut args = params.clone();
        if let Some(own) = &decl.parameters {
            let ctx = self.context(params, resolved);
            for (name, value) in own {
                let value = match value {
                    Value::String(expr) => evaluate_str(&ctx, expr).unwrap_or_else(|error| {
                        tracing::warn!(source = %decl.name, parameter = %name, %error, "parameter failed to evaluate");
                        Value::Null
                    }),
                    other => other.clone(),
                };
                args.insert(name.clone(), value);
            }
        }
        args
    }

    async fn produce(&self, name: &str, args: Map<String, Value>) -> Result<Value, FetchError> {
        let producer = self.producers.get(name).cloned().ok_or_else(|| FetchError::Producer {
            name: name.to_string(),
            message: "no producer registered".to_string(),
        })?;
        producer(args).await.map_err(|message| FetchError::Producer {
            name: name.to_string(),
            message,
        })
    }

    fn context(&self, params: &Map<String, Value>, resolved: &Map<String, Value>) -> Context {
        let root = Root::default()
            .with_operators(self.operators.clone())
            .with_sources(resolved.clone())
            .with_params(params.clone());
        Context::root(Arc::new(root))
    }

    /// Apply declared filter, sort and group to array values
    fn shape(
        &self,
        decl: &SourceDecl,
        value: Value,
        params: &Map<String, Value>,
        resolved: &Map<String, Value>,
    ) -> Value {
        let Value::Array(mut rows) = value else {
            return value;
        };
        let ctx = self.context(params, resolved);
        let eval_row = |expr: &str, row: &Value| {
            evaluate_str(&ctx.child(row.clone()), expr).unwrap_or_else(|error| {
                tracing::warn!(source = %decl.name, %error, "row expression failed");
                Value::Null
            })
        };

        if let Some(filter) = decl.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            rows.retain(|row| truthy(&eval_row(filter, row)));
        }

        if let Some(sort) = decl.sort.as_deref().filter(|s| !s.trim().is_empty()) {
            let mut keyed: Vec<(Value, Value)> = rows.into_iter().map(|row| (eval_row(sort, &row), row)).collect();
            keyed.sort_by(|(a, _), (b, _)| compare_values(a, b));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        if let Some(group) = decl.group.as_deref().filter(|g| !g.trim().is_empty()) {
            let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
            for row in rows {
                let key = eval_row(group, &row);
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
            return Value::Array(
                groups
                    .into_iter()
                    .map(|(key, members)| serde_json::json!({ "key": key, "rows": members }))
                    .collect(),
            );
        }

        Value::Array(rows)
    }
}

fn static_value(source: &AvailableSource) -> Value {
    match &source.data {
        Some(Value::String(text)) if !source.eval => serde_json::from_str(text).unwrap_or_else(|error| {
            tracing::warn!(name = %source.name, %error, "static data is not JSON, keeping text");
            Value::String(text.clone())
        }),
        Some(data) => data.clone(),
        None => Value::Null,
    }
}

/// Ordering for sort keys: null first, numbers numerically, strings lexically
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => display(a).cmp(&display(b)),
    }
}

#[cfg(feature = "http")]
pub mod http {
    //! `reqwest` backed [`HttpClient`]

    use super::{HttpClient, HttpRequest};
    use crate::errors::FetchError;
    use futures::future::BoxFuture;

    #[derive(Debug, Clone, Default)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl HttpClient for ReqwestClient {
        fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<String, FetchError>> {
            Box::pin(async move {
                let url = request.url.clone();
                let failed = |e: reqwest::Error| FetchError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                };
                let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| FetchError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

                let mut builder = self.client.request(method, &request.url);
                for (name, value) in &request.headers {
                    builder = builder.header(name, value);
                }
                if let Some(body) = request.body {
                    builder = builder.body(body);
                }

                let response = builder.send().await.map_err(failed)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                response.text().await.map_err(failed)
            })
        }
    }
}
