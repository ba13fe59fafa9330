//! RetailCRM v5 HTTP client
//!
//! Every request passes through one shared [`RateLimiter`], so the whole
//! process stays under the CRM's global request quota.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wacast_common::config::CrmConfig;
use wacast_common::Error;

use super::rate_limiter::RateLimiter;

/// Page size used for every paginated endpoint
pub const PAGE_LIMIT: u32 = 100;

/// Upper bound on pages fetched for one listing
const MAX_PAGES: u32 = 1000;

/// Order status counted as a purchase
const COMPLETED_ORDER_STATUS: &str = "complete";

/// CRM errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrmError {
    #[error("CRM is not configured: {0}")]
    Configuration(String),

    #[error("CRM rejected the API key: {0}")]
    Unauthorized(String),

    #[error("CRM API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("CRM HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("CRM request cancelled")]
    Cancelled,

    #[error("CRM request timed out")]
    Timeout,

    #[error("CRM transport error: {0}")]
    Transport(String),

    #[error("failed to decode CRM response: {0}")]
    Decode(String),

    #[error("no active product groups found")]
    NoProductGroups,

    #[error("product group not found: {0}")]
    GroupNotFound(String),

    #[error("no completed orders found for {0}")]
    NoOrdersFound(String),
}

impl CrmError {
    pub fn code(&self) -> &'static str {
        match self {
            CrmError::Configuration(_) => "configuration_error",
            CrmError::Unauthorized(_) => "unauthorized",
            CrmError::Api { .. } => "api_error",
            CrmError::Http { .. } => "http_error",
            CrmError::Cancelled => "cancelled",
            CrmError::Timeout => "timeout",
            CrmError::Transport(_) => "network_error",
            CrmError::Decode(_) => "decode_error",
            CrmError::NoProductGroups => "no_product_groups",
            CrmError::GroupNotFound(_) => "group_not_found",
            CrmError::NoOrdersFound(_) => "no_orders_found",
        }
    }

    /// Errors that suggest stale or missing credentials
    pub fn is_credential_error(&self) -> bool {
        matches!(self, CrmError::Configuration(_) | CrmError::Unauthorized(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CrmError::Timeout
        } else if e.is_decode() {
            CrmError::Decode(e.to_string())
        } else {
            CrmError::Transport(e.to_string())
        }
    }
}

impl From<CrmError> for Error {
    fn from(e: CrmError) -> Self {
        match e {
            CrmError::Configuration(msg) => Error::Configuration(msg),
            CrmError::Unauthorized(_) => Error::Unauthorized(e.to_string()),
            CrmError::Cancelled => Error::Cancelled,
            CrmError::Timeout => Error::Timeout(e.to_string()),
            CrmError::Transport(_) => Error::Network(e.to_string()),
            CrmError::NoProductGroups | CrmError::GroupNotFound(_) | CrmError::NoOrdersFound(_) => {
                Error::NotFound(e.to_string())
            }
            other => Error::ExternalService(other.to_string()),
        }
    }
}

/// Credentials captured for a CRM call
#[derive(Debug, Clone, PartialEq)]
pub struct CrmCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl CrmCredentials {
    fn validate(&self) -> Result<(), CrmError> {
        if self.api_key.trim().is_empty() {
            return Err(CrmError::Configuration("api_key is not set".to_string()));
        }
        if self.base_url.trim().is_empty() {
            return Err(CrmError::Configuration("base_url is not set".to_string()));
        }
        Ok(())
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v5/{}",
            self.base_url.trim().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

/// A product or product group reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    total_page_count: u32,
}

#[derive(Debug, Deserialize)]
struct ProductGroupPage {
    pagination: Option<Pagination>,
    #[serde(rename = "productGroup", default)]
    product_group: Vec<ProductGroupItem>,
}

#[derive(Debug, Deserialize)]
struct ProductGroupItem {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct ProductPage {
    pagination: Option<Pagination>,
    #[serde(default)]
    products: Vec<ProductItem>,
}

#[derive(Debug, Deserialize)]
struct ProductItem {
    id: i64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct OrderPage {
    pagination: Option<Pagination>,
    #[serde(default)]
    orders: Vec<OrderItem>,
}

#[derive(Debug, Deserialize)]
struct OrderItem {
    #[serde(default)]
    status: String,
    #[serde(default)]
    items: Vec<OrderLine>,
}

#[derive(Debug, Deserialize)]
struct OrderLine {
    offer: Option<OfferRef>,
}

#[derive(Debug, Deserialize)]
struct OfferRef {
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
    details: Option<serde_json::Value>,
}

trait Paged {
    fn total_pages(&self) -> u32;
}

macro_rules! impl_paged {
    ($($t:ty),*) => {
        $(impl Paged for $t {
            fn total_pages(&self) -> u32 {
                self.pagination.as_ref().map_or(1, |p| p.total_page_count)
            }
        })*
    };
}

impl_paged!(ProductGroupPage, ProductPage, OrderPage);

/// CRM client
#[derive(Clone)]
pub struct CrmClient {
    http: Client,
    limiter: Arc<RateLimiter>,
}

impl CrmClient {
    /// Create a new client
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CrmError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            limiter: Arc::new(RateLimiter::per_second(config.requests_per_second)),
        })
    }

    /// Issue one rate-limited GET. Query pairs may repeat a key to send an array.
    pub async fn get<T: DeserializeOwned>(
        &self,
        credentials: &CrmCredentials,
        endpoint: &str,
        query: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<T, CrmError> {
        credentials.validate()?;

        if !self.limiter.acquire(cancel).await {
            return Err(CrmError::Cancelled);
        }

        let url = credentials.endpoint_url(endpoint);
        debug!(endpoint = %endpoint, "CRM request");

        let request = self
            .http
            .get(&url)
            .query(query)
            .header("X-API-KEY", &credentials.api_key)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CrmError::Cancelled),
            r = request.send() => r.map_err(CrmError::from_reqwest)?,
        };

        let status = response.status();
        let body = response.bytes().await.map_err(CrmError::from_reqwest)?;

        if status.as_u16() >= 400 {
            return Err(Self::error_from_body(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| CrmError::Decode(e.to_string()))
    }

    fn error_from_body(status: StatusCode, body: &[u8]) -> CrmError {
        let parsed: Option<ApiErrorBody> = serde_json::from_slice(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|b| b.message.clone().or_else(|| b.error_msg.clone()));

        warn!(status = %status, "CRM request failed");

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return CrmError::Unauthorized(
                message.unwrap_or_else(|| status.to_string()),
            );
        }

        match (parsed, message) {
            (Some(parsed), Some(message)) => CrmError::Api {
                status: status.as_u16(),
                code: parsed.code,
                message,
                details: parsed.details,
            },
            _ => CrmError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    async fn paginate<P, F>(
        &self,
        credentials: &CrmCredentials,
        endpoint: &str,
        base_query: &[(String, String)],
        cancel: &CancellationToken,
        mut on_page: F,
    ) -> Result<(), CrmError>
    where
        P: DeserializeOwned + Paged,
        F: FnMut(P),
    {
        let mut page = 1u32;
        loop {
            let mut query = base_query.to_vec();
            query.push(("limit".to_string(), PAGE_LIMIT.to_string()));
            query.push(("page".to_string(), page.to_string()));

            let response: P = self.get(credentials, endpoint, &query, cancel).await?;
            let total = response.total_pages();
            on_page(response);

            if page >= total || page >= MAX_PAGES {
                return Ok(());
            }
            page += 1;
        }
    }

    /// Active product groups
    pub async fn product_groups(
        &self,
        credentials: &CrmCredentials,
        cancel: &CancellationToken,
    ) -> Result<Vec<Product>, CrmError> {
        let mut groups = Vec::new();
        self.paginate(
            credentials,
            "store/product-groups",
            &[],
            cancel,
            |page: ProductGroupPage| {
                groups.extend(
                    page.product_group
                        .into_iter()
                        .filter(|g| g.active)
                        .map(|g| Product { id: g.id, name: g.name }),
                );
            },
        )
        .await?;

        if groups.is_empty() {
            return Err(CrmError::NoProductGroups);
        }
        Ok(groups)
    }

    /// Products of the group named `group_name`, deduplicated by id
    pub async fn products_in_group(
        &self,
        credentials: &CrmCredentials,
        group_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Product>, CrmError> {
        let groups = self.product_groups(credentials, cancel).await?;
        let wanted = normalize_name(group_name);
        let group = groups
            .into_iter()
            .find(|g| normalize_name(&g.name) == wanted)
            .ok_or_else(|| CrmError::GroupNotFound(group_name.to_string()))?;

        let query = vec![("filter[groups][]".to_string(), group.id.to_string())];
        let mut seen = HashSet::new();
        let mut products = Vec::new();
        self.paginate(credentials, "store/products", &query, cancel, |page: ProductPage| {
            for item in page.products {
                if seen.insert(item.id) {
                    products.push(Product {
                        id: item.id,
                        name: item.name,
                    });
                }
            }
        })
        .await?;

        debug!(group = %group.name, products = products.len(), "Loaded group products");
        Ok(products)
    }

    /// Products from the customer's completed orders, deduplicated by id
    pub async fn products_by_phone(
        &self,
        credentials: &CrmCredentials,
        phone: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Product>, CrmError> {
        let query = vec![("filter[customer]".to_string(), phone.to_string())];
        let mut seen = HashSet::new();
        let mut products = Vec::new();
        self.paginate(credentials, "orders", &query, cancel, |page: OrderPage| {
            for order in page
                .orders
                .into_iter()
                .filter(|o| o.status == COMPLETED_ORDER_STATUS)
            {
                for offer in order.items.into_iter().filter_map(|line| line.offer) {
                    if let Some(id) = offer.id {
                        if seen.insert(id) {
                            products.push(Product {
                                id,
                                name: offer.name.unwrap_or_default(),
                            });
                        }
                    }
                }
            }
        })
        .await?;

        if products.is_empty() {
            return Err(CrmError::NoOrdersFound(phone.to_string()));
        }
        Ok(products)
    }
}

/// Case- and whitespace-insensitive name key
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> CrmClient {
        CrmClient::new(&CrmConfig::default()).unwrap()
    }

    fn credentials(server: &MockServer) -> CrmCredentials {
        CrmCredentials {
            api_key: "crm-key".to_string(),
            base_url: format!("{}/", server.uri()),
        }
    }

    #[tokio::test]
    async fn test_product_groups_paginates_and_filters_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/store/product-groups"))
            .and(query_param("page", "1"))
            .and(query_param("limit", "100"))
            .and(header("X-API-KEY", "crm-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pagination": {"limit": 100, "totalCount": 3, "currentPage": 1, "totalPageCount": 2},
                "productGroup": [
                    {"id": 1, "name": "Smartphones", "active": true},
                    {"id": 2, "name": "Archive", "active": false}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v5/store/product-groups"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 2},
                "productGroup": [{"id": 3, "name": "Clothes", "active": true}]
            })))
            .mount(&server)
            .await;

        let groups = client()
            .product_groups(&credentials(&server), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            groups,
            vec![
                Product { id: 1, name: "Smartphones".into() },
                Product { id: 3, name: "Clothes".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_no_active_groups() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v5/store/product-groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 1},
                "productGroup": [{"id": 2, "name": "Archive", "active": false}]
            })))
            .mount(&server)
            .await;

        let err = client()
            .product_groups(&credentials(&server), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, CrmError::NoProductGroups);
    }

    #[tokio::test]
    async fn test_products_in_group_dedups() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v5/store/product-groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 1},
                "productGroup": [{"id": 10, "name": " smartphones ", "active": true}]
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/v5/store/products"))
            .and(query_param("filter[groups][]", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 1},
                "products": [
                    {"id": 7, "name": "iPhone"},
                    {"id": 7, "name": "iPhone"},
                    {"id": 8, "name": "Pixel"}
                ]
            })))
            .mount(&server)
            .await;

        let products = client()
            .products_in_group(&credentials(&server), "Smartphones", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(products.len(), 2);

        let err = client()
            .products_in_group(&credentials(&server), "Laptops", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "group_not_found");
    }

    #[tokio::test]
    async fn test_products_by_phone_only_completed_orders() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v5/orders"))
            .and(query_param("filter[customer]", "79161234567"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 1},
                "orders": [
                    {"status": "complete", "items": [
                        {"offer": {"id": 7, "name": "iPhone"}},
                        {"offer": {"id": 7, "name": "iPhone"}}
                    ]},
                    {"status": "new", "items": [{"offer": {"id": 9, "name": "Case"}}]}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/v5/orders"))
            .and(query_param("filter[customer]", "79160000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pagination": {"totalPageCount": 1},
                "orders": [{"status": "cancel-other", "items": []}]
            })))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let products = client()
            .products_by_phone(&credentials(&server), "79161234567", &token)
            .await
            .unwrap();
        assert_eq!(products, vec![Product { id: 7, name: "iPhone".into() }]);

        let err = client()
            .products_by_phone(&credentials(&server), "79160000000", &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no_orders_found");
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v5/store/product-groups"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "success": false, "errorMsg": "Wrong \"apiKey\" value."
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/v5/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "bad_filter", "message": "filter is invalid", "details": {"field": "customer"}
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/v5/store/products"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let creds = credentials(&server);
        let token = CancellationToken::new();
        let crm = client();

        let err = crm.product_groups(&creds, &token).await.unwrap_err();
        assert!(err.is_credential_error());

        let err = crm.products_by_phone(&creds, "79161234567", &token).await.unwrap_err();
        assert!(matches!(err, CrmError::Api { status: 400, ref code, .. } if code.as_deref() == Some("bad_filter")));

        let err: CrmError = crm
            .get::<serde_json::Value>(&creds, "store/products", &[], &token)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CrmError::Http {
                status: 502,
                body: "bad gateway".into()
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = MockServer::start().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = client()
            .get::<serde_json::Value>(&credentials(&server), "orders", &[], &token)
            .await
            .unwrap_err();
        assert_eq!(err, CrmError::Cancelled);
        assert_eq!(Error::from(err).kind(), "cancelled");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_configuration_error() {
        let creds = CrmCredentials {
            api_key: " ".into(),
            base_url: "https://shop.example".into(),
        };
        let err = client()
            .get::<serde_json::Value>(&creds, "orders", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "configuration_error");
        assert_eq!(Error::from(err).status_code(), 503);
    }
}
