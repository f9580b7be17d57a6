//! Pagination over list endpoints.
//!
//! Endpoints that return `{"results": [...], "total_results": N}` can be
//! paged either by page number or, for large result sets, by ID
//! (`order_by=id` with `id_above`). Every page goes through the session, so
//! pages are cached and rate limited like any other request.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::api;
use crate::error::{ClientError, ClientResult};
use crate::request::ApiRequest;
use crate::session::ClientSession;

/// How the next page is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaginationMethod {
    /// `page=1, 2, ...`
    #[default]
    Page,
    /// `order_by=id&order=asc&id_above=<last id>`; required past 10k results
    Id,
}

/// Split a list response into its results and reported total.
///
/// Accepts either a results envelope or a bare JSON array.
fn split_page(body: Value) -> ClientResult<(Vec<Value>, Option<usize>)> {
    match body {
        Value::Array(results) => Ok((results, None)),
        Value::Object(mut map) => {
            let total = map
                .get("total_results")
                .and_then(Value::as_u64)
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
            match map.remove("results") {
                Some(Value::Array(results)) => Ok((results, total)),
                Some(other) => Err(ClientError::InvalidRequest(format!(
                    "expected a results array, got {other}"
                ))),
                None => Ok((vec![Value::Object(map)], total)),
            }
        }
        other => Ok((vec![other], None)),
    }
}

fn decode<T: DeserializeOwned>(results: Vec<Value>) -> ClientResult<Vec<T>> {
    results.into_iter().map(|r| serde_json::from_value(r).map_err(ClientError::from)).collect()
}

/// Paginated request that yields results of type `T`.
pub struct Paginator<T = Value> {
    session: ClientSession,
    request: ApiRequest,
    method: PaginationMethod,
    limit: Option<usize>,
    per_page: usize,
    page: u32,
    id_above: Option<String>,
    exhausted: bool,
    results_fetched: usize,
    total_results: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Paginator<T> {
    /// Page through `request`. Any `page` or `per_page` it carries is replaced.
    #[must_use]
    pub fn new(session: ClientSession, mut request: ApiRequest) -> Self {
        request.params.retain(|(k, _)| k != "page" && k != "per_page");
        tracing::debug!(url = %request.url, params = ?request.params, "Prepared paginated request");
        Self {
            session,
            request,
            method: PaginationMethod::Page,
            limit: None,
            per_page: api::PER_PAGE_RESULTS,
            page: 1,
            id_above: None,
            exhausted: false,
            results_fetched: 0,
            total_results: None,
            _marker: PhantomData,
        }
    }

    /// Select the pagination method.
    #[must_use]
    pub fn method(mut self, method: PaginationMethod) -> Self {
        self.method = method;
        if method == PaginationMethod::Id {
            self.request.params.retain(|(k, _)| k != "order_by" && k != "order");
            self.request.params.push(("order_by".into(), "id".into()));
            self.request.params.push(("order".into(), "asc".into()));
        }
        self
    }

    /// Stop after this many results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Results per request.
    #[must_use]
    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    #[must_use]
    pub const fn results_fetched(&self) -> usize {
        self.results_fetched
    }

    /// Total reported by the first page, if fetched yet.
    #[must_use]
    pub const fn total_results(&self) -> Option<usize> {
        self.total_results
    }

    fn page_request(&self, per_page: usize) -> ApiRequest {
        let request = self.request.clone().param("per_page", per_page);
        match self.method {
            PaginationMethod::Page => request.param("page", self.page),
            PaginationMethod::Id => request.param_opt("id_above", self.id_above.as_deref()),
        }
    }

    /// Fetch the next page. Returns an empty list once exhausted.
    pub async fn next_page(&mut self) -> ClientResult<Vec<T>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let per_page = match self.limit {
            Some(limit) => self.per_page.min(limit.saturating_sub(self.results_fetched)),
            None => self.per_page,
        };
        if per_page == 0 {
            self.exhausted = true;
            return Ok(Vec::new());
        }

        let response = self.session.request(self.page_request(per_page)).await?;
        let (results, total) = split_page(response.json()?)?;

        // With ID pagination only the first page's total is accurate
        if self.total_results.is_none() {
            self.total_results = Some(total.unwrap_or(results.len()));
        }
        let first_page = self.results_fetched == 0;
        self.results_fetched += results.len();
        self.advance(&results);

        if first_page && !self.exhausted {
            self.estimate();
        }
        decode(results)
    }

    fn advance(&mut self, results: &[Value]) {
        let limit_reached = self.limit.is_some_and(|limit| self.results_fetched >= limit);
        let total_reached = self.total_results.is_some_and(|total| self.results_fetched >= total);

        if results.is_empty() || limit_reached || total_reached {
            self.exhausted = true;
            return;
        }

        match self.method {
            PaginationMethod::Page => self.page += 1,
            PaginationMethod::Id => {
                let last_id = results.last().and_then(|r| r.get("id")).map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                match last_id {
                    Some(id) => self.id_above = Some(id),
                    None => {
                        tracing::warn!("Result has no ID; stopping ID-based pagination");
                        self.exhausted = true;
                    }
                }
            }
        }
    }

    fn estimate(&self) {
        let Some(total) = self.total_results else {
            return;
        };
        let total_requests = total.div_ceil(self.per_page);
        let delay = self.session.rate_budget().estimate_delay(total_requests);
        tracing::info!(
            total_results = total,
            total_requests,
            estimated_seconds = delay.as_secs(),
            "Paginated query will take multiple requests"
        );
        if total > api::LARGE_REQUEST_WARNING {
            tracing::warn!(
                total_results = total,
                export_url = api::EXPORT_URL,
                "Request is larger than recommended for API usage; consider the export tool"
            );
        }
    }

    /// Fetch every remaining result.
    pub async fn all(mut self) -> ClientResult<Vec<T>> {
        let mut results = Vec::new();
        while !self.exhausted {
            results.extend(self.next_page().await?);
        }
        Ok(results)
    }

    /// Fetch only the first result.
    pub async fn one(mut self) -> ClientResult<Option<T>> {
        self.per_page = 1;
        Ok(self.next_page().await?.into_iter().next())
    }

    /// Total number of results, without fetching result data.
    ///
    /// Sends `per_page=0` unless a page has already reported the total.
    pub async fn count(&mut self) -> ClientResult<usize> {
        if let Some(total) = self.total_results {
            return Ok(total);
        }
        let response = self.session.request(self.request.clone().param("per_page", 0)).await?;
        let (_, total) = split_page(response.json()?)?;
        let total = total.ok_or_else(|| {
            ClientError::InvalidRequest("response has no total_results".to_string())
        })?;
        self.total_results = Some(total);
        Ok(total)
    }

    /// Stream results one at a time, fetching pages as needed.
    pub fn into_stream(self) -> impl Stream<Item = ClientResult<T>> {
        let mut paginator = self;
        async_stream::stream! {
            while !paginator.exhausted {
                match paginator.next_page().await {
                    Ok(page) => {
                        for result in page {
                            yield Ok(result);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

impl<T> fmt::Display for Paginator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Paginator({}, fetched={}/", self.request.url, self.results_fetched)?;
        match self.total_results {
            Some(total) => write!(f, "{total})"),
            None => write!(f, "unknown)"),
        }
    }
}

/// Fetches records from an endpoint that accepts one ID per request.
pub struct IdPaginator<T = Value> {
    session: ClientSession,
    request: ApiRequest,
    ids: VecDeque<String>,
    results_fetched: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> IdPaginator<T> {
    #[must_use]
    pub fn new<I, V>(session: ClientSession, request: ApiRequest, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self {
            session,
            request,
            ids: ids.into_iter().map(|id| id.to_string()).collect(),
            results_fetched: 0,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub const fn results_fetched(&self) -> usize {
        self.results_fetched
    }

    /// Fetch the record for the next ID.
    pub async fn next_page(&mut self) -> ClientResult<Vec<T>> {
        let Some(id) = self.ids.pop_front() else {
            return Ok(Vec::new());
        };
        let response = self.session.request(self.request.clone().ids([id])).await?;
        let (results, _) = split_page(response.json()?)?;
        self.results_fetched += 1;
        decode(results)
    }

    /// Fetch the records for all remaining IDs.
    pub async fn all(mut self) -> ClientResult<Vec<T>> {
        let mut results = Vec::new();
        while !self.is_exhausted() {
            results.extend(self.next_page().await?);
        }
        Ok(results)
    }
}
