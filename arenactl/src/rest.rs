//! PostgREST client for the Supabase REST API.
//!
//! Used by the lookup-table seeders, which only need simple filtered reads and writes and run
//! fine without a direct database connection. Every request carries the service role key as
//! both the `apikey` header and a bearer token. Writes ask for `return=representation` so the
//! caller sees the affected rows.
//!
//! There is exactly one URL layout, `<project>/rest/v1/<table>`. A non-2xx answer is an
//! [`Error::Rest`] carrying the status and body.

use reqwest::{
    Client, Method, RequestBuilder, Response,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Config;
use crate::errors::{Error, Result};

const PREFER_REPRESENTATION: &str = "return=representation";

/// A single PostgREST horizontal filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Neq(String, String),
    Gt(String, String),
    In(String, Vec<String>),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Filter::Eq(column.to_string(), value.to_string())
    }

    pub fn neq(column: &str, value: impl ToString) -> Self {
        Filter::Neq(column.to_string(), value.to_string())
    }

    pub fn gt(column: &str, value: impl ToString) -> Self {
        Filter::Gt(column.to_string(), value.to_string())
    }

    pub fn in_list<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Filter::In(column.to_string(), values.into_iter().map(|v| v.to_string()).collect())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn not_null(column: &str) -> Self {
        Filter::NotNull(column.to_string())
    }

    /// Query pair before URL encoding, e.g. `("rank_code", "eq.K+")`
    pub fn to_pair(&self) -> (&str, String) {
        match self {
            Filter::Eq(col, v) => (col.as_str(), format!("eq.{v}")),
            Filter::Neq(col, v) => (col.as_str(), format!("neq.{v}")),
            Filter::Gt(col, v) => (col.as_str(), format!("gt.{v}")),
            Filter::In(col, values) => {
                let list: Vec<String> = values.iter().map(|v| quote_list_item(v)).collect();
                (col.as_str(), format!("in.({})", list.join(",")))
            }
            Filter::IsNull(col) => (col.as_str(), "is.null".to_string()),
            Filter::NotNull(col) => (col.as_str(), "not.is.null".to_string()),
        }
    }
}

/// Values inside `in.(...)` that contain reserved characters must be double-quoted
fn quote_list_item(value: &str) -> String {
    if value.chars().any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\' | ':' | ' ')) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last
/// path segment
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
}

impl RestClient {
    pub fn new(project_url: &Url, service_role_key: &str, timeout: Duration) -> Result<Self> {
        let invalid_key = |_| Error::Config {
            message: "service role key contains characters not allowed in a header".to_string(),
        };
        let mut apikey = HeaderValue::from_str(service_role_key).map_err(invalid_key)?;
        apikey.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {service_role_key}")).map_err(invalid_key)?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("apikey", apikey);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder().timeout(timeout).default_headers(headers).build()?;
        let base_url = ensure_slash(project_url).join("rest/v1/").map_err(|e| Error::Config {
            message: format!("cannot build REST URL from {project_url}: {e}"),
        })?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let (url, key) = config.rest_credentials()?;
        Self::new(url, key, config.rest.timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str, filters: &[Filter], extra: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path).map_err(|e| Error::BadRequest {
            message: format!("invalid REST path {path:?}: {e}"),
        })?;
        if !filters.is_empty() || !extra.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
            for filter in filters {
                let (column, value) = filter.to_pair();
                query.append_pair(column, &value);
            }
        }
        Ok(url)
    }

    fn table_url(&self, table: &str, filters: &[Filter], extra: &[(&str, &str)]) -> Result<Url> {
        if !is_identifier(table) {
            return Err(Error::BadRequest {
                message: format!("invalid table name {table:?}"),
            });
        }
        self.url(table, filters, extra)
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rest {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        debug!(%status, %url, "PostgREST request succeeded");
        Ok(response)
    }

    async fn rows<T: DeserializeOwned>(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> Result<Vec<T>> {
        let mut request = self.client.request(method.clone(), url.clone());
        if method != Method::GET {
            request = request.header("Prefer", PREFER_REPRESENTATION);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self.send(request, &url).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            Error::Other(anyhow::anyhow!("unexpected PostgREST response from {url}: {e}: {text}"))
        })
    }

    fn encode_body<B: Serialize>(body: &B) -> Result<serde_json::Value> {
        serde_json::to_value(body).map_err(|e| Error::Other(anyhow::anyhow!("cannot encode request body: {e}")))
    }

    /// Read rows. `columns` is a PostgREST select list such as `"*"` or `"rank_code,elo_min"`;
    /// `order` is e.g. `"rank_order.asc"`.
    #[instrument(skip(self, filters), fields(filters = filters.len()), err)]
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
        order: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut extra = vec![("select", columns)];
        if let Some(order) = order {
            extra.push(("order", order));
        }
        let url = self.table_url(table, filters, &extra)?;
        self.rows(Method::GET, url, None).await
    }

    /// Insert one row or an array of rows, returning what was stored
    #[instrument(skip(self, body), err)]
    pub async fn insert<B: Serialize, T: DeserializeOwned>(&self, table: &str, body: &B) -> Result<Vec<T>> {
        let url = self.table_url(table, &[], &[])?;
        self.rows(Method::POST, url, Some(Self::encode_body(body)?)).await
    }

    /// PATCH matching rows, returning them. At least one filter is required.
    #[instrument(skip(self, filters, body), fields(filters = filters.len()), err)]
    pub async fn update<B: Serialize>(&self, table: &str, filters: &[Filter], body: &B) -> Result<Vec<serde_json::Value>> {
        require_filters("update", table, filters)?;
        let url = self.table_url(table, filters, &[])?;
        self.rows(Method::PATCH, url, Some(Self::encode_body(body)?)).await
    }

    /// DELETE matching rows, returning them. At least one filter is required; use
    /// `Filter::not_null("id")` to clear a table.
    #[instrument(skip(self, filters), fields(filters = filters.len()), err)]
    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<serde_json::Value>> {
        require_filters("delete", table, filters)?;
        let url = self.table_url(table, filters, &[])?;
        self.rows(Method::DELETE, url, None).await
    }

    /// Call a database function through `/rpc/<name>`
    #[instrument(skip(self, body), err)]
    pub async fn rpc<B: Serialize, T: DeserializeOwned>(&self, name: &str, body: &B) -> Result<T> {
        if !is_identifier(name) {
            return Err(Error::BadRequest {
                message: format!("invalid function name {name:?}"),
            });
        }
        let url = self.url(&format!("rpc/{name}"), &[], &[])?;
        let request = self.client.post(url.clone()).json(&Self::encode_body(body)?);
        let response = self.send(request, &url).await?;
        Ok(response.json().await?)
    }
}

fn require_filters(operation: &str, table: &str, filters: &[Filter]) -> Result<()> {
    if filters.is_empty() {
        return Err(Error::BadRequest {
            message: format!("refusing to {operation} {table} without a filter"),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn client_for(server: &MockServer) -> RestClient {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let url = Url::parse(&server.uri()).unwrap();
        RestClient::new(&url, "service-key", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_filter_pairs() {
        assert_eq!(Filter::eq("rank_code", "K+").to_pair(), ("rank_code", "eq.K+".to_string()));
        assert_eq!(Filter::neq("id", 0).to_pair(), ("id", "neq.0".to_string()));
        assert_eq!(Filter::gt("elo_rating", 0).to_pair(), ("elo_rating", "gt.0".to_string()));
        assert_eq!(Filter::not_null("id").to_pair(), ("id", "not.is.null".to_string()));
        assert_eq!(Filter::is_null("winner_id").to_pair(), ("winner_id", "is.null".to_string()));
        assert_eq!(
            Filter::in_list("rank_code", ["K+", "I+"]).to_pair(),
            ("rank_code", "in.(K+,I+)".to_string())
        );
        assert_eq!(
            Filter::in_list("title", ["a,b", "plain"]).to_pair(),
            ("title", "in.(\"a,b\",plain)".to_string())
        );
    }

    #[test]
    fn test_plus_is_escaped_in_url() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let client = RestClient::new(&Url::parse("https://ref.supabase.co").unwrap(), "k", Duration::from_secs(1)).unwrap();
        let url = client
            .table_url("rank_system", &[Filter::eq("rank_code", "K+")], &[])
            .unwrap();
        assert_eq!(url.as_str(), "https://ref.supabase.co/rest/v1/rank_system?rank_code=eq.K%2B");
    }

    #[test]
    fn test_base_url_keeps_project_path() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let client = RestClient::new(&Url::parse("http://localhost:54321/proxy").unwrap(), "k", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:54321/proxy/rest/v1/");
    }

    #[test]
    fn test_rejects_bad_table_names() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let client = RestClient::new(&Url::parse("https://ref.supabase.co").unwrap(), "k", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.table_url("../auth/v1/users", &[], &[]),
            Err(Error::BadRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_select_sends_auth_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/rank_system"))
            .and(query_param("select", "rank_code,elo_min"))
            .and(query_param("order", "rank_order.asc"))
            .and(query_param("rank_code", "eq.H+"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"rank_code": "H+", "elo_min": 1300}])))
            .expect(1)
            .mount(&server)
            .await;

        let rows: Vec<serde_json::Value> = client_for(&server)
            .select("rank_system", "rank_code,elo_min", &[Filter::eq("rank_code", "H+")], Some("rank_order.asc"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["elo_min"], 1300);
    }

    #[tokio::test]
    async fn test_writes_ask_for_representation() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/rank_system"))
            .and(query_param("rank_code", "eq.C"))
            .and(header("prefer", "return=representation"))
            .and(body_json(json!({"elo_min": 1900, "elo_max": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"rank_code": "C"}])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = client_for(&server)
            .update("rank_system", &[Filter::eq("rank_code", "C")], &json!({"elo_min": 1900, "elo_max": null}))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_error_status_becomes_rest_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/handicap_rules"))
            .respond_with(ResponseTemplate::new(409).set_body_string(r#"{"code":"23505"}"#))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .insert::<_, serde_json::Value>("handicap_rules", &json!({"bet_amount": 100}))
            .await
            .unwrap_err();
        match err {
            Error::Rest { status, body, url } => {
                assert_eq!(status, 409);
                assert!(body.contains("23505"));
                assert!(url.ends_with("/rest/v1/handicap_rules"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unfiltered_delete_is_refused() {
        let server = MockServer::start().await;
        let err = client_for(&server).delete("handicap_rules", &[]).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_no_rows() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/handicap_rules"))
            .and(query_param("id", "not.is.null"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let rows = client_for(&server)
            .delete("handicap_rules", &[Filter::not_null("id")])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_table_count"))
            .and(body_json(json!({"table_name": "users"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(42)))
            .mount(&server)
            .await;

        let count: i64 = client_for(&server)
            .rpc("get_table_count", &json!({"table_name": "users"}))
            .await
            .unwrap();
        assert_eq!(count, 42);
    }
}
