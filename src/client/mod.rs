//! Cloud client adapter.
//!
//! [`Client`] is the typed surface every resource, data source and sweeper
//! talks to. It is cheap to clone and safe to share; all state lives in the
//! [`Transport`]. Every call takes a [`CancellationToken`] and aborts the
//! in-flight request when it fires.

pub mod error;
pub mod filter;
pub mod transport;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use error::{ApiError, ClientError};
pub use filter::{ApiFilter, Order};
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, HttpTransportConfig, Method, RawBody, Transport,
};

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default cap on pages fetched by a single list call.
pub const DEFAULT_MAX_PAGES: u32 = 20;

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "first_page")]
    pages: u32,
}

fn first_page() -> u32 {
    1
}

/// Typed access to the Linode REST API.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    page_size: u32,
    max_pages: u32,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Override pagination limits.
    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    /// Send a request, failing on non-2xx responses.
    pub async fn execute(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        debug!(method = %request.method, path = %request.path, "API request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            response = self.transport.execute(request) => response?.into_result(),
        }
    }

    /// GET a single object.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError> {
        let response = self.execute(ApiRequest::new(Method::Get, path), cancel).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    /// POST a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError> {
        let request = ApiRequest::new(Method::Post, path).with_body(serde_json::to_value(body)?);
        let response = self.execute(request, cancel).await?;
        Ok(serde_json::from_value(non_null(response.body))?)
    }

    /// PUT a JSON body.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError> {
        let request = ApiRequest::new(Method::Put, path).with_body(serde_json::to_value(body)?);
        let response = self.execute(request, cancel).await?;
        Ok(serde_json::from_value(non_null(response.body))?)
    }

    /// DELETE a path.
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.execute(ApiRequest::new(Method::Delete, path), cancel)
            .await
            .map(|_| ())
    }

    /// List a collection, following pages up to the configured cap.
    pub async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<&ApiFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ClientError> {
        let filter = filter.and_then(ApiFilter::to_value);
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let request = ApiRequest::new(Method::Get, path)
                .with_query("page", page)
                .with_query("page_size", self.page_size)
                .with_filter(filter.clone());
            let response = self.execute(request, cancel).await?;
            let batch: Page<T> = serde_json::from_value(response.body)?;
            items.extend(batch.data);

            if batch.page >= batch.pages {
                break;
            }
            if page >= self.max_pages {
                warn!(
                    path = %path,
                    pages = batch.pages,
                    max_pages = self.max_pages,
                    "List truncated at page cap"
                );
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    /// Send raw bytes to a presigned URL, returning the response headers.
    pub async fn upload(
        &self,
        method: Method,
        url: &str,
        raw: RawBody,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        self.execute(ApiRequest::presigned(method, url).with_raw(raw), cancel)
            .await
    }
}

fn non_null(body: Value) -> Value {
    if body.is_null() {
        Value::Object(Default::default())
    } else {
        body
    }
}
