use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::conf::ClusterConfig;
use crate::error::{Result, StorageError};
use crate::models::bulk::{encode_bulk_body, BulkOperation, BulkResponse};
use crate::models::index_meta::{IndexSettings, IndexTemplate, Mappings};
use crate::models::search::{GetResponse, SearchResponse};
use crate::models::server_info::ServerInfo;
use crate::naming::{IndexNameResolver, PhysicalIndex};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SYNC_BULK_TIMEOUT: Duration = Duration::from_secs(120);
const NDJSON: &str = "application/x-ndjson";

/// Handle to the document-store cluster. One instance is constructed at
/// startup and shared (read-only) by every DAO; nothing on it can be
/// reconfigured after [`EsClient::connect`] returns.
#[derive(Debug)]
pub struct EsClient {
    base_urls: Vec<String>,
    next_node: AtomicUsize,
    credentials: Option<(String, String)>,
    resolver: IndexNameResolver,
    http_client: Client,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

#[derive(Debug)]
struct NodeAddress {
    host: String,
    port: u16,
}

fn parse_cluster_nodes(nodes: &str) -> Result<Vec<NodeAddress>> {
    let mut parsed = Vec::new();
    for entry in nodes.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (host, port) = entry
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Configuration {
                entry: entry.to_string(),
                reason: "missing port".to_string(),
            })?;
        if host.is_empty() {
            return Err(StorageError::Configuration {
                entry: entry.to_string(),
                reason: "missing host".to_string(),
            });
        }
        let port: u16 = port.parse().map_err(|_| StorageError::Configuration {
            entry: entry.to_string(),
            reason: "port is not numeric".to_string(),
        })?;
        parsed.push(NodeAddress {
            host: host.to_string(),
            port,
        });
    }
    if parsed.is_empty() {
        return Err(StorageError::Configuration {
            entry: nodes.to_string(),
            reason: "no cluster nodes configured".to_string(),
        });
    }
    Ok(parsed)
}

impl EsClient {
    /// Parses the node list, builds the HTTP client and verifies the
    /// cluster answers a liveness probe before handing the handle out.
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self> {
        let nodes = parse_cluster_nodes(cluster.get_nodes())?;
        info!("elasticsearch cluster nodes: {}", cluster.get_nodes());

        let http_client = ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Connectivity(e.to_string()))?;

        let client = Self {
            base_urls: nodes
                .iter()
                .map(|node| format!("{}://{}:{}", cluster.get_protocol(), node.host, node.port))
                .collect(),
            next_node: AtomicUsize::new(0),
            credentials: cluster.get_credentials(),
            resolver: IndexNameResolver::new(cluster.get_namespace()),
            http_client,
            closed: AtomicBool::new(false),
        };

        let server_info = client.ping().await?;
        info!(
            "connected: hostname={}, cluster={}, version={}",
            server_info.get_hostname(),
            server_info.get_cluster(),
            server_info.get_version()
        );
        match server_info.get_version_major() {
            Some(major) if major < 7 => {
                warn!("cluster reports version {}, expected 7.x or newer", server_info.get_version())
            }
            None => warn!("could not parse cluster version {:?}", server_info.get_version()),
            _ => {}
        }
        Ok(client)
    }

    /// Idempotent; pooled connections are released when the last handle to
    /// this client is dropped.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("elasticsearch client shut down");
        }
    }

    pub fn resolver(&self) -> &IndexNameResolver {
        &self.resolver
    }

    pub fn resolve(&self, model_name: &str) -> PhysicalIndex {
        self.resolver.resolve(model_name)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Connectivity("client is shut down".to_string()));
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        let node = self.next_node.fetch_add(1, Ordering::Relaxed) % self.base_urls.len();
        format!("{}{}", self.base_urls[node], path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http_client.request(method, self.url(path));
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        builder
    }

    async fn ping(&self) -> Result<ServerInfo> {
        let response = self
            .request(Method::GET, "/")
            .send()
            .await
            .map_err(|e| StorageError::Connectivity(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Connectivity(format!(
                "liveness probe returned {}",
                response.status()
            )));
        }
        response
            .json::<ServerInfo>()
            .await
            .map_err(|e| StorageError::Connectivity(format!("undecodable probe response: {e}")))
    }

    async fn admin_failure(context: &str, response: reqwest::Response) -> StorageError {
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        StorageError::IndexAdmin {
            context: context.to_string(),
            status,
            detail,
        }
    }

    pub async fn create_index(&self, model_name: &str) -> Result<bool> {
        let index = self.resolve(model_name);
        self.create_physical_index(&index, None).await
    }

    pub async fn create_index_with(
        &self,
        model_name: &str,
        settings: &IndexSettings,
        mappings: &Mappings,
    ) -> Result<bool> {
        let index = self.resolve(model_name);
        let body = json!({ "settings": settings, "mappings": mappings });
        self.create_physical_index(&index, Some(body)).await
    }

    async fn create_physical_index(
        &self,
        index: &PhysicalIndex,
        body: Option<Value>,
    ) -> Result<bool> {
        self.ensure_open()?;
        let mut request = self.request(Method::PUT, &format!("/{index}"));
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::admin_failure("create index", response).await);
        }
        let acknowledged = response.json::<Acknowledged>().await?.acknowledged;
        debug!("create {} index finished, acknowledged: {}", index, acknowledged);
        Ok(acknowledged)
    }

    pub async fn is_exists_index(&self, model_name: &str) -> Result<bool> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self.request(Method::HEAD, &format!("/{index}")).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::IndexAdmin {
                context: "index existence check".to_string(),
                status: status.as_u16(),
                detail: String::new(),
            }),
        }
    }

    /// 200 and 404 are the only statuses with a defined meaning here;
    /// anything else is surfaced instead of being coerced to `false`.
    pub async fn is_exists_template(&self, model_name: &str) -> Result<bool> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self
            .request(Method::HEAD, &format!("/_template/{index}"))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::TemplateStateAmbiguous(status.as_u16())),
        }
    }

    /// Stores a template whose pattern covers the model's rotating family.
    /// Must exist before the first matching index is created, or that
    /// index comes up without the intended settings and mapping.
    pub async fn create_template(
        &self,
        model_name: &str,
        settings: IndexSettings,
        mappings: Mappings,
    ) -> Result<bool> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let template = IndexTemplate::for_index(&index, settings, mappings);
        let response = self
            .request(Method::PUT, &format!("/_template/{index}"))
            .json(&template)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::admin_failure("create template", response).await);
        }
        let acknowledged = response.json::<Acknowledged>().await?.acknowledged;
        debug!("create {} template finished, acknowledged: {}", index, acknowledged);
        Ok(acknowledged)
    }

    pub async fn delete_template(&self, model_name: &str) -> Result<bool> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self
            .request(Method::DELETE, &format!("/_template/{index}"))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(response.json::<Acknowledged>().await?.acknowledged),
            _ => Err(Self::admin_failure("delete template", response).await),
        }
    }

    /// Deletes an index whose name is already physical, e.g. one read back
    /// from [`EsClient::indices_by_alias`]. No namespace is applied.
    pub async fn delete_by_index_name(&self, index: &PhysicalIndex) -> Result<bool> {
        self.ensure_open()?;
        let response = self.request(Method::DELETE, &format!("/{index}")).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let acknowledged = response.json::<Acknowledged>().await?.acknowledged;
                debug!("delete {} index finished, acknowledged: {}", index, acknowledged);
                Ok(acknowledged)
            }
            _ => Err(Self::admin_failure("delete index", response).await),
        }
    }

    /// Deletes an index addressed by its logical model name; the namespace
    /// is applied before the request goes out.
    pub async fn delete_by_model_name(&self, model_name: &str) -> Result<bool> {
        let index = self.resolve(model_name);
        self.delete_by_index_name(&index).await
    }

    /// Physical indices currently behind the alias. Missing alias means an
    /// empty family, not an error.
    pub async fn indices_by_alias(&self, alias_model_name: &str) -> Result<Vec<PhysicalIndex>> {
        self.ensure_open()?;
        let alias = self.resolve(alias_model_name);
        let response = self
            .request(Method::GET, &format!("/_alias/{alias}"))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let listing = response.json::<Value>().await?;
                debug!("indices behind alias {}: {}", alias, listing);
                let indices = listing
                    .as_object()
                    .map(|object| {
                        object
                            .keys()
                            .map(|name| PhysicalIndex::from_store(name.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(indices)
            }
            _ => Err(Self::admin_failure("alias listing", response).await),
        }
    }

    pub async fn search(&self, model_name: &str, query: &Value) -> Result<SearchResponse> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self
            .request(Method::POST, &format!("/{index}/_search"))
            .json(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<SearchResponse>().await?)
    }

    pub async fn get(&self, model_name: &str, id: &str) -> Result<Option<GetResponse>> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self
            .request(Method::GET, &format!("/{index}/_doc/{id}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document = response.error_for_status()?.json::<GetResponse>().await?;
        Ok(if document.found { Some(document) } else { None })
    }

    pub async fn ids(&self, model_name: &str, ids: &[&str]) -> Result<SearchResponse> {
        let query = json!({
            "query": { "ids": { "values": ids } },
            "size": ids.len(),
        });
        self.search(model_name, &query).await
    }

    /// Single-document write that is visible to reads before this returns.
    pub async fn force_insert(&self, model_name: &str, id: &str, source: &Value) -> Result<()> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let response = self
            .request(Method::PUT, &format!("/{index}/_doc/{id}"))
            .query(&[("refresh", "true")])
            .json(source)
            .send()
            .await?;
        self.check_write(&index, id, response).await
    }

    /// Single-document update with immediate visibility. With a version the
    /// store rejects the write unless its current version matches, surfaced
    /// as [`StorageError::VersionConflict`].
    pub async fn force_update(
        &self,
        model_name: &str,
        id: &str,
        doc: &Value,
        version: Option<i64>,
    ) -> Result<()> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let mut request = self
            .request(Method::POST, &format!("/{index}/_update/{id}"))
            .query(&[("refresh", "true")]);
        if let Some(version) = version {
            request = request.query(&[("version", version)]);
        }
        let response = request.json(&json!({ "doc": doc })).send().await?;
        self.check_write(&index, id, response).await
    }

    async fn check_write(
        &self,
        index: &PhysicalIndex,
        id: &str,
        response: reqwest::Response,
    ) -> Result<()> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(StorageError::VersionConflict {
                index: index.to_string(),
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(StorageError::Write {
                index: index.to_string(),
                id: id.to_string(),
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// One bulk round trip. The async pipeline drives this; callers that
    /// need eventual visibility only should prefer the pipeline.
    pub async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        self.bulk_request(operations, None, REQUEST_TIMEOUT).await
    }

    /// Bulk write that only returns once the documents are visible to
    /// search (`refresh=wait_for`). Used for flush-at-shutdown and
    /// registration bursts, not for steady-state telemetry.
    pub async fn synchronous_bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        let started = std::time::Instant::now();
        let response = self
            .bulk_request(operations, Some("wait_for"), SYNC_BULK_TIMEOUT)
            .await?;
        info!(
            "synchronous bulk took {} ms, size: {}",
            started.elapsed().as_millis(),
            operations.len()
        );
        Ok(response)
    }

    async fn bulk_request(
        &self,
        operations: &[BulkOperation],
        refresh: Option<&str>,
        timeout: Duration,
    ) -> Result<BulkResponse> {
        self.ensure_open()?;
        let body = encode_bulk_body(operations)
            .map_err(|e| StorageError::BulkTransport(format!("unserializable operation: {e}")))?;
        let mut request = self
            .request(Method::POST, "/_bulk")
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .timeout(timeout)
            .body(body);
        if let Some(refresh) = refresh {
            request = request.query(&[("refresh", refresh)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::BulkTransport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::BulkTransport(format!(
                "bulk endpoint returned {status}: {detail}"
            )));
        }
        response
            .json::<BulkResponse>()
            .await
            .map_err(|e| StorageError::BulkTransport(format!("undecodable bulk response: {e}")))
    }

    /// Range-deletes every document whose time bucket is at or below the
    /// bound. Version conflicts during the sweep are skipped, not fatal;
    /// the raw status is returned for the caller to interpret.
    pub async fn delete_by_time_bucket(
        &self,
        model_name: &str,
        time_bucket_column: &str,
        upper_bound_inclusive: i64,
    ) -> Result<u16> {
        self.ensure_open()?;
        let index = self.resolve(model_name);
        let query = json!({
            "query": {
                "range": {
                    time_bucket_column: { "lte": upper_bound_inclusive }
                }
            }
        });
        debug!("delete from {} where {} <= {}", index, time_bucket_column, upper_bound_inclusive);
        let response = self
            .request(Method::POST, &format!("/{index}/_delete_by_query"))
            .query(&[("conflicts", "proceed")])
            .json(&query)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_list_parses_hosts_and_ports() {
        let nodes = parse_cluster_nodes("es1:9200, es2:9201 ,,").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].host, "es1");
        assert_eq!(nodes[0].port, 9200);
        assert_eq!(nodes[1].port, 9201);
    }

    #[test]
    fn node_entry_without_port_is_a_configuration_error() {
        let err = parse_cluster_nodes("es1:9200,es2").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration { ref entry, .. } if entry == "es2"
        ));
    }

    #[test]
    fn node_entry_with_text_port_is_a_configuration_error() {
        let err = parse_cluster_nodes("es1:ninethousand").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration { ref reason, .. } if reason == "port is not numeric"
        ));
    }

    #[test]
    fn empty_node_list_is_rejected() {
        assert!(parse_cluster_nodes(" , ").is_err());
    }
}
