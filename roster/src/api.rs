//! HR API boundary.
//!
//! [`HrApi`] is what the stores call; [`HttpApi`] implements it over reqwest.
//! Response bodies come either bare or wrapped in `{"data": ...}` and are
//! normalised here so nothing downstream has to sniff shapes.
use async_trait::async_trait;
use roster_resilience::RequestError;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::model::{
    DashboardSummary, Document, DocumentDraft, DocumentQuery, Employee, EmployeeDraft,
    EmployeeQuery,
};

/// A response body that may or may not be wrapped in a `data` envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ResponseBody<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    pub total: usize,
}

/// List responses: `{data, pagination}`, `{data, total}` or a bare array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListBody<T> {
    Paginated {
        data: Vec<T>,
        pagination: PageMeta,
    },
    Totalled {
        data: Vec<T>,
        total: usize,
    },
    Wrapped {
        data: Vec<T>,
    },
    Bare(Vec<T>),
}

/// One page of results with the server-side total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<ListBody<T>> for Paged<T> {
    fn from(body: ListBody<T>) -> Self {
        match body {
            ListBody::Paginated { data, pagination } => Self {
                items: data,
                total: pagination.total,
            },
            ListBody::Totalled { data, total } => Self { items: data, total },
            ListBody::Wrapped { data } | ListBody::Bare(data) => Self {
                total: data.len(),
                items: data,
            },
        }
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice::<ResponseBody<T>>(bytes)
        .map(ResponseBody::into_inner)
        .map_err(|e| RequestError::Decode(e.to_string()))
}

pub fn decode_list<T: DeserializeOwned>(bytes: &[u8]) -> Result<Paged<T>, RequestError> {
    serde_json::from_slice::<ListBody<T>>(bytes)
        .map(Paged::from)
        .map_err(|e| RequestError::Decode(e.to_string()))
}

/// `key=value&...` with form encoding.
pub fn query_string(pairs: &[(&str, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
        .finish()
}

pub fn with_query(path: &str, pairs: &[(&str, String)]) -> String {
    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", query_string(pairs))
    }
}

#[async_trait]
pub trait HrApi: Send + Sync {
    /// Absolute url for `path`, used for queue bookkeeping.
    fn url(&self, path: &str) -> String {
        path.to_string()
    }

    async fn list_employees(&self, query: &EmployeeQuery) -> Result<Paged<Employee>, RequestError>;
    async fn get_employee(&self, id: &str) -> Result<Employee, RequestError>;
    async fn create_employee(&self, draft: &EmployeeDraft) -> Result<Employee, RequestError>;
    async fn update_employee(&self, employee: &Employee) -> Result<Employee, RequestError>;
    async fn delete_employee(&self, id: &str) -> Result<(), RequestError>;
    async fn search_employees(&self, query: &str) -> Result<Vec<Employee>, RequestError>;

    async fn list_documents(&self, query: &DocumentQuery) -> Result<Vec<Document>, RequestError>;
    async fn list_employee_documents(&self, employee_id: &str)
    -> Result<Vec<Document>, RequestError>;
    async fn upload_document(&self, draft: &DocumentDraft) -> Result<Document, RequestError>;
    async fn update_document(&self, document: &Document) -> Result<Document, RequestError>;
    async fn delete_document(&self, id: &str) -> Result<(), RequestError>;

    async fn dashboard_summary(&self) -> Result<DashboardSummary, RequestError>;
}

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, RequestBuilder};
    use roster_config::{
        ApiSettings,
        http::{HttpClientParams, build_http_client},
    };
    use roster_resilience::RequestError;
    use serde::{Serialize, de::DeserializeOwned};
    use tracing::{debug, trace};

    use super::{HrApi, Paged, decode, decode_list, with_query};
    use crate::model::{
        DashboardSummary, Document, DocumentDraft, DocumentQuery, Employee, EmployeeDraft,
        EmployeeQuery,
    };

    /// [`HrApi`] over HTTP/JSON.
    #[derive(Debug, Clone)]
    pub struct HttpApi {
        client: Client,
        base_url: String,
        timeout: Duration,
    }

    impl HttpApi {
        pub fn new(settings: &ApiSettings) -> Result<Self, RequestError> {
            let client = build_http_client(HttpClientParams::from_settings(settings))
                .map_err(|e| RequestError::Internal(format!("unable to build http client: {e}")))?;
            Ok(Self::with_client(client, &settings.base_url, settings.timeout()))
        }

        pub fn with_client(client: Client, base_url: &str, timeout: Duration) -> Self {
            Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                timeout,
            }
        }

        fn transport_error(&self, err: reqwest::Error) -> RequestError {
            if err.is_timeout() {
                RequestError::Timeout(self.timeout)
            } else if err.is_decode() {
                RequestError::Decode(err.to_string())
            } else {
                RequestError::Network(err.to_string())
            }
        }

        async fn fetch_bytes(&self, request: RequestBuilder) -> Result<Vec<u8>, RequestError> {
            let response = request.send().await.map_err(|e| self.transport_error(e))?;
            let status = response.status();
            trace!(%status, url = %response.url(), "api response");
            let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

            if !status.is_success() {
                let message = error_message(&body)
                    .or_else(|| status.canonical_reason().map(str::to_string))
                    .unwrap_or_else(|| "request failed".to_string());
                debug!(%status, reason = %message, "api error response");
                return Err(RequestError::from_status(status.as_u16(), message));
            }
            Ok(body.to_vec())
        }

        async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
            let bytes = self.fetch_bytes(self.client.get(self.url(path))).await?;
            decode(&bytes)
        }

        async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Paged<T>, RequestError> {
            let bytes = self.fetch_bytes(self.client.get(self.url(path))).await?;
            decode_list(&bytes)
        }

        async fn send_json<B, T>(&self, request: RequestBuilder, body: &B) -> Result<T, RequestError>
        where
            B: Serialize + ?Sized,
            T: DeserializeOwned,
        {
            let bytes = self.fetch_bytes(request.json(body)).await?;
            decode(&bytes)
        }
    }

    /// Pull `message` or `error` out of a JSON error body.
    fn error_message(body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        ["message", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    #[async_trait]
    impl HrApi for HttpApi {
        fn url(&self, path: &str) -> String {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }

        async fn list_employees(&self, query: &EmployeeQuery) -> Result<Paged<Employee>, RequestError> {
            self.get_list(&with_query("employees", &query.to_pairs())).await
        }

        async fn get_employee(&self, id: &str) -> Result<Employee, RequestError> {
            self.get(&format!("employees/{id}")).await
        }

        async fn create_employee(&self, draft: &EmployeeDraft) -> Result<Employee, RequestError> {
            let request = self.client.post(self.url("employees"));
            self.send_json(request, draft).await
        }

        async fn update_employee(&self, employee: &Employee) -> Result<Employee, RequestError> {
            let request = self.client.put(self.url(&format!("employees/{}", employee.id)));
            self.send_json(request, employee).await
        }

        async fn delete_employee(&self, id: &str) -> Result<(), RequestError> {
            self.fetch_bytes(self.client.delete(self.url(&format!("employees/{id}"))))
                .await
                .map(|_| ())
        }

        async fn search_employees(&self, query: &str) -> Result<Vec<Employee>, RequestError> {
            let path = with_query("employees/search", &[("q", query.to_string())]);
            Ok(self.get_list(&path).await?.items)
        }

        async fn list_documents(&self, query: &DocumentQuery) -> Result<Vec<Document>, RequestError> {
            Ok(self.get_list(&with_query("documents", &query.to_pairs())).await?.items)
        }

        async fn list_employee_documents(
            &self,
            employee_id: &str,
        ) -> Result<Vec<Document>, RequestError> {
            Ok(self
                .get_list(&format!("employees/{employee_id}/documents"))
                .await?
                .items)
        }

        async fn upload_document(&self, draft: &DocumentDraft) -> Result<Document, RequestError> {
            let request = self.client.post(self.url("documents"));
            self.send_json(request, draft).await
        }

        async fn update_document(&self, document: &Document) -> Result<Document, RequestError> {
            let request = self.client.put(self.url(&format!("documents/{}", document.id)));
            self.send_json(request, document).await
        }

        async fn delete_document(&self, id: &str) -> Result<(), RequestError> {
            self.fetch_bytes(self.client.delete(self.url(&format!("documents/{id}"))))
                .await
                .map(|_| ())
        }

        async fn dashboard_summary(&self) -> Result<DashboardSummary, RequestError> {
            self.get("dashboard/summary").await
        }
    }

}
