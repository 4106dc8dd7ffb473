use std::time::Duration;

use roster_queue::HttpMethod;
use roster_resilience::RequestError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{StoreContext, StoreError, StoreState};
use crate::{
    api::{Paged, with_query},
    debounce::Debouncer,
    model::{
        DashboardSummary, Employee, EmployeeDraft, EmployeeFilters, EmployeeQuery,
        employee::validate_email,
    },
    notify::Severity,
    pagination::PaginationState,
};

const NAMESPACE: &str = "employees";
const SEARCH_TAG: &str = "employees:search";
const DASHBOARD: &str = "dashboard";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmployeeState {
    /// Current page as last returned by the server.
    pub employees: Vec<Employee>,
    /// Results of the active search; `None` when not searching.
    pub search_results: Option<Vec<Employee>>,
    pub selected: Option<Employee>,
    pub pagination: PaginationState,
    pub filters: EmployeeFilters,
    pub search: String,
    pub in_flight: usize,
    pub error: Option<String>,
    pub summary: Option<DashboardSummary>,
}

impl EmployeeState {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    /// What a list view should show: search results when searching.
    pub fn visible(&self) -> &[Employee] {
        self.search_results.as_deref().unwrap_or(&self.employees)
    }
}

impl StoreState for EmployeeState {
    fn in_flight_mut(&mut self) -> &mut usize {
        &mut self.in_flight
    }

    fn error_mut(&mut self) -> &mut Option<String> {
        &mut self.error
    }
}

pub struct EmployeeStore {
    ctx: StoreContext,
    state: watch::Sender<EmployeeState>,
    search_debounce: Debouncer,
    filter_debounce: Debouncer,
}

impl EmployeeStore {
    pub fn new(ctx: StoreContext) -> Self {
        let debounce = Duration::from_millis(ctx.settings.debounce_ms);
        let (state, _) = watch::channel(EmployeeState {
            pagination: PaginationState::new(ctx.settings.page_size),
            ..EmployeeState::default()
        });
        Self {
            ctx,
            state,
            search_debounce: Debouncer::new(debounce),
            filter_debounce: Debouncer::new(debounce),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<EmployeeState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> EmployeeState {
        self.state.borrow().clone()
    }

    /// Load `page` with the current filters and search.
    pub async fn load(&self, page: usize) -> Result<(), StoreError> {
        self.fetch_page(page, false).await
    }

    /// Reload the current page, bypassing the cache.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let page = self.state.borrow().pagination.page();
        self.fetch_page(page, true).await
    }

    async fn fetch_page(&self, page: usize, force_refresh: bool) -> Result<(), StoreError> {
        let _loading = self.ctx.loading(&self.state);
        // clamp against the last known total so the list and page agree
        let mut page = {
            let pagination = self.state.borrow().pagination;
            if pagination.total() > 0 {
                page.clamp(1, pagination.total_pages())
            } else {
                page.max(1)
            }
        };

        loop {
            let query = {
                let state = self.state.borrow();
                EmployeeQuery {
                    search: Some(state.search.clone()).filter(|s| !s.is_empty()),
                    filters: state.filters.clone(),
                    ..EmployeeQuery::new(page, state.pagination.limit())
                }
            };
            let path = with_query(NAMESPACE, &query.to_pairs());

            let api = self.ctx.api.clone();
            let request = query.clone();
            let result = self
                .ctx
                .read(&query.cache_key(), &path, &[NAMESPACE], force_refresh, move || {
                    let api = api.clone();
                    let query = request.clone();
                    async move { api.list_employees(&query).await }
                })
                .await;

            let Paged { items, total } = match result {
                Ok(paged) => paged,
                Err(err) => return Err(self.ctx.fail(&self.state, "Loading employees", err)),
            };

            let mut pagination = self.state.borrow().pagination;
            pagination.set_total(total);
            pagination.set_page(query.page);
            if pagination.page() != query.page {
                // the server total shrank below the requested page
                debug!(
                    requested = query.page,
                    last = pagination.page(),
                    total,
                    "page out of range"
                );
                page = pagination.page();
                continue;
            }

            debug!(page = query.page, count = items.len(), total, "employees loaded");
            self.state.send_modify(|s| {
                s.employees = items;
                s.pagination = pagination;
                s.error = None;
            });
            return Ok(());
        }
    }

    /// Fetch one employee and refresh its row if it is on the current page.
    pub async fn get(&self, id: &str) -> Result<Employee, StoreError> {
        if id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "employee id is required".to_string()));
        }
        let _loading = self.ctx.loading(&self.state);
        let path = format!("{NAMESPACE}/{id}");
        let api = self.ctx.api.clone();
        let owned_id = id.to_string();
        let result = self
            .ctx
            .read(&format!("{NAMESPACE}:id={id}"), &path, &[NAMESPACE], false, move || {
                let api = api.clone();
                let id = owned_id.clone();
                async move { api.get_employee(&id).await }
            })
            .await;

        match result {
            Ok(employee) => {
                self.state.send_modify(|s| replace_by_id(s, &employee));
                Ok(employee)
            }
            Err(RequestError::Client { status: 404, .. }) => {
                let err = StoreError::NotFound(format!("employee {id}"));
                self.state.send_modify(|s| s.error = Some(err.to_string()));
                self.ctx.notify(&err.to_string(), Severity::Warning);
                Err(err)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Loading employee", err)),
        }
    }

    pub async fn add(&self, draft: EmployeeDraft) -> Result<Employee, StoreError> {
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
                async move { api.create_employee(&draft).await }
            })
            .await;

        match result {
            Ok(created) => {
                self.ctx.invalidate(&["employees:", "dashboard:"]);
                self.state.send_modify(|s| {
                    s.employees.push(created.clone());
                    let total = s.pagination.total() + 1;
                    s.pagination.set_total(total);
                });
                info!(id = %created.id, "employee created");
                self.ctx
                    .succeed(&self.state, &format!("{} added", created.full_name()));
                Ok(created)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Adding employee", err)),
        }
    }

    pub async fn update(&self, employee: Employee) -> Result<Employee, StoreError> {
        if employee.id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "employee id is required".to_string()));
        }
        if let Err(message) = validate_email(&employee.email) {
            return Err(self.ctx.reject(&self.state, message));
        }
        let _loading = self.ctx.loading(&self.state);
        let path = format!("{NAMESPACE}/{}", employee.id);
        let api = self.ctx.api.clone();
        let result = self
            .ctx
            .write(NAMESPACE, &path, HttpMethod::Put, &[NAMESPACE], move || {
                let api = api.clone();
                let employee = employee.clone();
                async move { api.update_employee(&employee).await }
            })
            .await;

        match result {
            Ok(updated) => {
                self.ctx.invalidate(&["employees:", "dashboard:"]);
                self.state.send_modify(|s| replace_by_id(s, &updated));
                self.ctx
                    .succeed(&self.state, &format!("{} updated", updated.full_name()));
                Ok(updated)
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Updating employee", err)),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if id.trim().is_empty() {
            return Err(self.ctx.reject(&self.state, "employee id is required".to_string()));
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
                async move { api.delete_employee(&id).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.ctx.invalidate(&["employees:", "dashboard:"]);
                self.state.send_modify(|s| {
                    let before = s.employees.len();
                    s.employees.retain(|e| e.id != id);
                    if s.employees.len() < before {
                        let total = s.pagination.total().saturating_sub(1);
                        s.pagination.set_total(total);
                    }
                    if let Some(results) = s.search_results.as_mut() {
                        results.retain(|e| e.id != id);
                    }
                    if s.selected.as_ref().is_some_and(|e| e.id == id) {
                        s.selected = None;
                    }
                });
                self.ctx.succeed(&self.state, "Employee deleted");
                Ok(())
            }
            Err(err) => Err(self.ctx.fail(&self.state, "Deleting employee", err)),
        }
    }

    /// Select an employee from the loaded page; `None` clears. Returns whether
    /// the selection now holds a record.
    pub fn select(&self, id: Option<&str>) -> bool {
        let mut found = false;
        self.state.send_modify(|s| {
            let chosen = id.and_then(|id| s.visible().iter().find(|e| e.id == id).cloned());
            found = chosen.is_some();
            s.selected = chosen;
        });
        found
    }

    /// Debounced search. A newer call or a newer remote request supersedes
    /// this one; a failed remote search falls back to filtering the loaded
    /// page locally.
    pub async fn search(&self, query: &str) -> Result<Vec<Employee>, StoreError> {
        let query = query.trim().to_string();
        self.state.send_modify(|s| s.search = query.clone());
        if !self.search_debounce.settle().await {
            return Err(StoreError::Superseded);
        }
        let cancelled = self.ctx.queue.cancel_by_tag(SEARCH_TAG).await;
        if cancelled > 0 {
            debug!(cancelled, "previous search cancelled");
        }
        if query.is_empty() {
            self.state.send_modify(|s| s.search_results = None);
            return Ok(self.state.borrow().employees.clone());
        }

        let _loading = self.ctx.loading(&self.state);
        let path = with_query("employees/search", &[("q", query.clone())]);
        let key = format!("{SEARCH_TAG}:q={query}");
        let api = self.ctx.api.clone();
        let remote_query = query.clone();
        let result = self
            .ctx
            .read(&key, &path, &[NAMESPACE, SEARCH_TAG], false, move || {
                let api = api.clone();
                let query = remote_query.clone();
                async move { api.search_employees(&query).await }
            })
            .await;

        let results = match result {
            Ok(results) => results,
            Err(err) if err.is_cancelled() => return Err(StoreError::Superseded),
            Err(err) => {
                warn!(error = %err, "remote search failed, filtering locally");
                let needle = query.to_lowercase();
                let state = self.state.borrow();
                state
                    .employees
                    .iter()
                    .filter(|e| e.matches(&needle))
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

    /// Debounced filter change; reloads from page 1.
    pub async fn set_filters(&self, filters: EmployeeFilters) -> Result<(), StoreError> {
        self.state.send_modify(|s| s.filters = filters);
        if !self.filter_debounce.settle().await {
            return Err(StoreError::Superseded);
        }
        self.fetch_page(1, false).await
    }

    pub async fn clear_filters(&self) -> Result<(), StoreError> {
        self.filter_debounce.cancel();
        self.search_debounce.cancel();
        self.state.send_modify(|s| {
            s.filters = EmployeeFilters::default();
            s.search.clear();
            s.search_results = None;
        });
        self.fetch_page(1, false).await
    }

    pub async fn set_page(&self, page: usize) -> Result<(), StoreError> {
        self.fetch_page(page, false).await
    }

    /// Change the page size; always returns to page 1.
    pub async fn set_limit(&self, limit: usize) -> Result<(), StoreError> {
        self.state.send_modify(|s| s.pagination.set_limit(limit));
        self.fetch_page(1, false).await
    }

    /// Dashboard figures from the server, or computed from the loaded page
    /// when the server cannot provide them.
    pub async fn summary(&self) -> Result<DashboardSummary, StoreError> {
        let _loading = self.ctx.loading(&self.state);
        let api = self.ctx.api.clone();
        let result = self
            .ctx
            .read("dashboard:summary", "dashboard/summary", &[DASHBOARD], false, move || {
                let api = api.clone();
                async move { api.dashboard_summary().await }
            })
            .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "dashboard unavailable, computing locally");
                let state = self.state.borrow();
                DashboardSummary::from_records(
                    &state.employees,
                    &[],
                    self.ctx.today(),
                    self.ctx.settings.expiry_warning_days,
                )
            }
        };
        self.state.send_modify(|s| s.summary = Some(summary.clone()));
        Ok(summary)
    }
}

fn replace_by_id(state: &mut EmployeeState, employee: &Employee) {
    let lists = std::iter::once(&mut state.employees).chain(state.search_results.as_mut());
    for list in lists {
        if let Some(slot) = list.iter_mut().find(|e| e.id == employee.id) {
            *slot = employee.clone();
        }
    }
    if let Some(selected) = state.selected.as_mut().filter(|e| e.id == employee.id) {
        *selected = employee.clone();
    }
}
