use std::{future::Future, time::Duration};

use chrono::NaiveDate;
use roster_queue::HttpMethod;
use roster_resilience::RequestError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{StoreContext, StoreError, StoreState};
use crate::{
    api::with_query,
    debounce::Debouncer,
    model::{Document, DocumentDraft, DocumentKind, DocumentQuery},
};

const NAMESPACE: &str = "documents";
const SEARCH_TAG: &str = "documents:search";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentState {
    pub documents: Vec<Document>,
    pub search_results: Option<Vec<Document>>,
    /// Owner of the loaded list; `None` after [`DocumentStore::load_all`].
    pub employee_id: Option<String>,
    pub kind_filter: Option<DocumentKind>,
    pub search: String,
    pub in_flight: usize,
    pub error: Option<String>,
}

impl DocumentState {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    /// Search results when searching, narrowed by the kind filter.
    pub fn visible(&self) -> Vec<&Document> {
        self.search_results
            .as_deref()
            .unwrap_or(&self.documents)
            .iter()
            .filter(|d| self.kind_filter.is_none_or(|kind| d.kind == kind))
            .collect()
    }

    fn query(&self) -> DocumentQuery {
        DocumentQuery {
            employee_id: self.employee_id.clone(),
            kind: self.kind_filter,
            search: None,
        }
    }

    fn replace(&mut self, document: &Document) {
        let lists = std::iter::once(&mut self.documents).chain(self.search_results.as_mut());
        for list in lists {
            if let Some(slot) = list.iter_mut().find(|d| d.id == document.id) {
                *slot = document.clone();
            }
        }
    }

    /// Whether an upload for `employee_id` belongs in the loaded list.
    fn in_scope(&self, employee_id: &str) -> bool {
        self.employee_id.as_deref().is_none_or(|owner| owner == employee_id)
    }
}

impl StoreState for DocumentState {
    fn in_flight_mut(&mut self) -> &mut usize {
        &mut self.in_flight
    }

    fn error_mut(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

pub struct DocumentStore {
    ctx: StoreContext,
    state: watch::Sender<DocumentState>,
    search_debounce: Debouncer,
}

impl DocumentStore {
    pub fn new(ctx: StoreContext) -> Self {
        let debounce = Duration::from_millis(ctx.settings.debounce_ms);
        let (state, _) = watch::channel(DocumentState::default());
        Self {
            ctx,
            state,
            search_debounce: Debouncer::new(debounce),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DocumentState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> DocumentState {
        self.state.borrow().clone()
    }

    /// Every document the server lists, narrowed by the kind filter.
    pub async fn load_all(&self) -> Result<Vec<Document>, StoreError> {
        let query = DocumentQuery {
            employee_id: None,
            ..self.state.borrow().query()
        };
        let path = with_query(NAMESPACE, &query.to_pairs());
        let api = self.ctx.api.clone();
        let request = query.clone();
        self.fetch(&query.cache_key(), &path, None, move || {
            let api = api.clone();
            let query = request.clone();
            async move { api.list_documents(&query).await }
        })
        .await
    }

    pub async fn load_for_employee(&self, employee_id: &str) -> Result<Vec<Document>, StoreError> {
        if employee_id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "employee id is required".to_string()));
        }
        let key = format!("{NAMESPACE}:employeeId={employee_id}");
        let path = format!("employees/{employee_id}/{NAMESPACE}");
        let api = self.ctx.api.clone();
        let owner = employee_id.to_string();
        self.fetch(&key, &path, Some(employee_id), move || {
            let api = api.clone();
            let owner = owner.clone();
            async move { api.list_employee_documents(&owner).await }
        })
        .await
    }

    async fn fetch<F, Fut>(
        &self,
        key: &str,
        path: &str,
        employee_id: Option<&str>,
        op: F,
    ) -> Result<Vec<Document>, StoreError>
    where
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<Vec<Document>, RequestError>> + Send + 'static,
    {
        let _loading = self.ctx.loading(&self.state);
        match self.ctx.read(key, path, &[NAMESPACE], false, op).await {
            Ok(documents) => {
                debug!(key, count = documents.len(), "documents loaded");
                self.state.send_modify(|s| {
                    s.documents = documents.clone();
                    s.employee_id = employee_id.map(str::to_string);
                    s.search_results = None;
                    s.error = None;
                });
                Ok(documents)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Loading documents", err)),
        }
    }

    pub async fn upload(&self, draft: DocumentDraft) -> Result<Document, StoreError> {
        if let Err(message) = draft.validate() {
            return Err(self.ctx.reject(&self.state, message));
        }
        let _loading = self.ctx.loading(&self.state);
        let api = self.ctx.api.clone();
        let result = self
            .ctx
            .write(NAMESPACE, NAMESPACE, HttpMethod::Post, &[NAMESPACE], move || {
                let api = api.clone();
                let draft = draft.clone();
                async move { api.upload_document(&draft).await }
            })
            .await;

        match result {
            Ok(document) => {
                self.ctx.invalidate(&["documents:", "dashboard:"]);
                self.state.send_if_modified(|s| {
                    let listed = s.in_scope(&document.employee_id);
                    if listed {
                        s.documents.push(document.clone());
                    }
                    listed
                });
                info!(id = %document.id, employee_id = %document.employee_id, "document uploaded");
                self.ctx
                    .succeed(&self.state, &format!("{} uploaded", document.title));
                Ok(document)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Uploading document", err)),
        }
    }

    pub async fn update(&self, document: Document) -> Result<Document, StoreError> {
        if document.id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "document id is required".to_string()));
        }
        if document.title.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "document title is required".to_string()));
        }
        let _loading = self.ctx.loading(&self.state);
        let path = format!("{NAMESPACE}/{}", document.id);
        let api = self.ctx.api.clone();
        let result = self
            .ctx
            .write(NAMESPACE, &path, HttpMethod::Put, &[NAMESPACE], move || {
                let api = api.clone();
                let document = document.clone();
                async move { api.update_document(&document).await }
            })
            .await;

        match result {
            Ok(updated) => {
                self.ctx.invalidate(&["documents:", "dashboard:"]);
                self.state.send_modify(|s| s.replace(&updated));
                self.ctx
                    .succeed(&self.state, &format!("{} updated", updated.title));
                Ok(updated)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Updating document", err)),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "document id is required".to_string()));
        }
        let _loading = self.ctx.loading(&self.state);
        let path = format!("{NAMESPACE}/{id}");
        let api = self.ctx.api.clone();
        let owned_id = id.to_string();
        let result = self
            .ctx
            .write(NAMESPACE, &path, HttpMethod::Delete, &[NAMESPACE], move || {
                let api = api.clone();
                let id = owned_id.clone();
                async move { api.delete_document(&id).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.ctx.invalidate(&["documents:", "dashboard:"]);
                self.state.send_modify(|s| {
                    s.documents.retain(|d| d.id != id);
                    if let Some(results) = s.search_results.as_mut() {
                        results.retain(|d| d.id != id);
                    }
                });
                self.ctx.succeed(&self.state, "Document deleted");
                Ok(())
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Deleting document", err)),
        }
    }

    /// Loaded documents expiring within `within_days` of today, soonest
    /// first. Already expired documents are included.
    pub fn expiring(&self, within_days: i64) -> Vec<Document> {
        self.expiring_at(self.ctx.today(), within_days)
    }

    pub fn expiring_at(&self, today: NaiveDate, within_days: i64) -> Vec<Document> {
        let mut expiring: Vec<Document> = self
            .state
            .borrow()
            .documents
            .iter()
            .filter(|d| d.expires_within(today, within_days))
            .cloned()
            .collect();
        expiring.sort_by_key(|d| d.expiry_date);
        expiring
    }

    /// Debounced search within the loaded scope, falling back to local
    /// filtering when the server search fails.
    pub async fn search(&self, query: &str) -> Result<Vec<Document>, StoreError> {
        let query = query.trim().to_string();
        self.state.send_modify(|s| s.search = query.clone());
        if !self.search_debounce.settle().await {
            return Err(StoreError::Superseded);
        }
        self.ctx.queue.cancel_by_tag(SEARCH_TAG).await;
        if query.is_empty() {
            self.state.send_modify(|s| s.search_results = None);
            return Ok(self.state.borrow().documents.clone());
        }

        let _loading = self.ctx.loading(&self.state);
        let remote = DocumentQuery {
            search: Some(query.clone()),
            ..self.state.borrow().query()
        };
        let path = with_query(NAMESPACE, &remote.to_pairs());
        let api = self.ctx.api.clone();
        let request = remote.clone();
        let result = self
            .ctx
            .read(&remote.cache_key(), &path, &[NAMESPACE, SEARCH_TAG], false, move || {
                let api = api.clone();
                let query = request.clone();
                async move { api.list_documents(&query).await }
            })
            .await;

        let results = match result {
            Ok(results) => results,
            Err(err) if err.is_cancelled() => return Err(StoreError::Superseded),
            Err(err) => {
                warn!(error = %err, "remote document search failed, filtering locally");
                let needle = query.to_lowercase();
                let state = self.state.borrow();
                state
                    .documents
                    .iter()
                    .filter(|d| d.matches(&needle))
                    .cloned()
                    .collect()
            }
        };
        self.state.send_modify(|s| {
            s.search_results = Some(results.clone());
            s.error = None;
        });
        Ok(results)
    }

    /// Narrow the visible list by kind. The next load also asks the server
    /// for that kind only.
    pub fn set_kind_filter(&self, kind: Option<DocumentKind>) {
        self.state.send_if_modified(|s| {
            let changed = s.kind_filter != kind;
            s.kind_filter = kind;
            changed
        });
    }
}
