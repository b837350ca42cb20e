//! Page-by-page retrieval
//!
//! One logical fetch is a strictly sequential run of blocking requests. The
//! first failing page aborts the run and everything fetched so far is dropped
//! with it.

use crate::error::{classify_graphql_errors, ExplorerError, Result};
use crate::fetch::normalize::{normalize, Endpoint, PageMeta, Resource};
use crate::fetch::query::FilterSet;
use crate::fetch::transport::Transport;
use crate::types::SessionContext;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// One page of records, in server order
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub index: usize,
    pub records: Vec<Value>,
    pub total_count: Option<u64>,
    pub total_pages: Option<u64>,
    pub has_next_page: Option<bool>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Walks a resource page by page until the server runs out of records
pub struct PaginatedFetcher<'a, T: Transport + ?Sized> {
    session: &'a SessionContext,
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> PaginatedFetcher<'a, T> {
    pub fn new(session: &'a SessionContext, transport: &'a T) -> Self {
        PaginatedFetcher { session, transport }
    }

    /// Fetch every page of `resource`
    ///
    /// Stops after a short page, once a declared `totalCount` or
    /// `totalPages` is reached, or when the server says there is no next
    /// page. Unpaginated resources take exactly one request.
    ///
    /// A server that ignores the page arguments is detected two ways: a page
    /// larger than `page_size` is kept and ends the run, and a page identical
    /// to the previous one is dropped and ends the run.
    pub fn fetch_all(&self, resource: &Resource, filters: &FilterSet, page_size: usize) -> Result<Vec<Page>> {
        if page_size == 0 {
            return Err(ExplorerError::validation("page size must be at least 1"));
        }

        let mut pages = Vec::new();
        let mut fetched: u64 = 0;
        let mut index = 0;

        loop {
            let page = self.fetch_page(resource, filters, index, page_size)?;
            fetched += page.len() as u64;

            debug!(
                resource = %resource.label(),
                page = index,
                records = page.len(),
                total = ?page.total_count,
                "fetched page"
            );

            if !resource.is_paginated() {
                pages.push(page);
                break;
            }

            let repeated = !page.is_empty()
                && pages
                    .last()
                    .map_or(false, |prev: &Page| prev.records == page.records);
            if repeated {
                warn!(
                    resource = %resource.label(),
                    page = index,
                    "server returned the previous page again, ignoring page arguments"
                );
                fetched -= page.len() as u64;
                break;
            }

            let oversized = page.len() > page_size;
            if oversized {
                warn!(
                    resource = %resource.label(),
                    page = index,
                    records = page.len(),
                    page_size,
                    "page larger than requested, server is not paginating"
                );
            }

            let short_page = page.len() < page_size;
            let total_reached = page.total_count.map_or(false, |total| fetched >= total);
            let last_page = page.total_pages.map_or(false, |pages| index as u64 + 1 >= pages);
            let no_next = page.has_next_page == Some(false);

            pages.push(page);

            if short_page || oversized || total_reached || last_page || no_next {
                break;
            }
            index += 1;
        }

        info!(
            resource = %resource.label(),
            pages = pages.len(),
            records = fetched,
            "fetch complete"
        );
        Ok(pages)
    }

    /// Fetch every page and concatenate the records in fetch order
    pub fn fetch_records(&self, resource: &Resource, filters: &FilterSet, page_size: usize) -> Result<Vec<Value>> {
        let pages = self.fetch_all(resource, filters, page_size)?;
        Ok(pages.into_iter().flat_map(|page| page.records).collect())
    }

    fn fetch_page(&self, resource: &Resource, filters: &FilterSet, index: usize, page_size: usize) -> Result<Page> {
        let payload = match resource.endpoint() {
            Endpoint::Rest { route } => self.get_rest(resource, route, filters, index, page_size)?,
            Endpoint::GraphQl { query } => self.post_graphql(resource, query, filters, index, page_size)?,
        };

        let meta = PageMeta::from_payload(&payload);
        let records = normalize(payload, resource)?;

        Ok(Page {
            index,
            records,
            total_count: meta.total_count,
            total_pages: meta.total_pages,
            has_next_page: meta.has_next_page,
        })
    }

    fn get_rest(
        &self,
        resource: &Resource,
        route: &str,
        filters: &FilterSet,
        index: usize,
        page_size: usize,
    ) -> Result<Value> {
        let url = format!("{}{}", self.session.url_rest(), route);

        let mut query: Vec<(String, String)> = resource.params().to_vec();
        query.extend(filters.to_rest_params());
        if resource.is_paginated() {
            query.push(("page".to_string(), index.to_string()));
            query.push(("pageSize".to_string(), page_size.to_string()));
        }

        let response = self.transport.get(&url, &query, self.session.headers_rest())?;
        response.into_json(&url)
    }

    fn post_graphql(
        &self,
        resource: &Resource,
        query: &str,
        filters: &FilterSet,
        index: usize,
        page_size: usize,
    ) -> Result<Value> {
        let url = self.session.url_graphql();

        let mut variables: Map<String, Value> = resource.variables().clone();
        if let Some(filter) = filters.to_graphql_filter() {
            variables.insert("filter".to_string(), filter);
        }
        if resource.is_paginated() {
            variables.insert("page".to_string(), Value::from(index));
            variables.insert("pageSize".to_string(), Value::from(page_size));
        }

        let mut body = Map::new();
        body.insert("query".to_string(), Value::String(query.to_string()));
        body.insert("variables".to_string(), Value::Object(variables));

        let response = self
            .transport
            .post_json(url, &Value::Object(body), self.session.headers_graphql())?;
        let status = response.status;
        let payload = response.into_json(url)?;
        classify_graphql_errors(url, status, &payload)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fetch::query::QueryBuilder;
    use crate::fetch::transport::{HttpResponse, ScriptedTransport};
    use serde_json::json;

    fn session() -> SessionContext {
        SessionContext::from_token("t0k3n", "http://silex/rest", "http://silex/graphql")
    }

    fn rest_page(start: usize, count: usize, total: u64) -> Value {
        let records: Vec<Value> = (start..start + count)
            .map(|i| json!({"uri": format!("dev:{}", i), "name": format!("device {}", i)}))
            .collect();
        json!({
            "metadata": {"pagination": {"totalCount": total, "pageSize": 20}},
            "result": records
        })
    }

    #[test]
    fn test_fetches_until_total_count() {
        let transport = ScriptedTransport::new()
            .respond_json(200, rest_page(0, 20, 55))
            .respond_json(200, rest_page(20, 20, 55))
            .respond_json(200, rest_page(40, 15, 55));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);
        let resource = Resource::rest("devices", "/core/devices");

        let pages = fetcher.fetch_all(&resource, &FilterSet::new(), 20).unwrap();

        assert_eq!(transport.request_count(), 3);
        assert_eq!(pages.len(), 3);
        let records: Vec<Value> = pages.into_iter().flat_map(|p| p.records).collect();
        assert_eq!(records.len(), 55);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record["uri"], format!("dev:{}", i));
        }

        let requests = transport.requests();
        assert_eq!(requests[0].url, "http://silex/rest/core/devices");
        assert_eq!(requests[2].param("page"), Some("2"));
        assert_eq!(requests[2].param("pageSize"), Some("20"));
        assert_eq!(requests[0].headers["Authorization"], "Bearer t0k3n");
    }

    #[test]
    fn test_stops_when_total_reached_on_full_page() {
        let transport = ScriptedTransport::new()
            .respond_json(200, rest_page(0, 20, 40))
            .respond_json(200, rest_page(20, 20, 40));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let records = fetcher
            .fetch_records(&Resource::rest("devices", "/core/devices"), &FilterSet::new(), 20)
            .unwrap();

        assert_eq!(records.len(), 40);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_has_next_page_false_stops() {
        let transport = ScriptedTransport::new().respond_json(
            200,
            json!({
                "metadata": {"pagination": {"hasNextPage": false}},
                "result": (0..5).map(|i| json!({"uri": i})).collect::<Vec<_>>()
            }),
        );
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let pages = fetcher
            .fetch_all(&Resource::rest("devices", "/core/devices"), &FilterSet::new(), 5)
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_total_pages_stops_on_full_page() {
        let page = |start: usize| {
            json!({
                "metadata": {"pagination": {"totalPages": 2}},
                "result": (start..start + 5).map(|i| json!({"uri": i})).collect::<Vec<_>>()
            })
        };
        let transport = ScriptedTransport::new()
            .respond_json(200, page(0))
            .respond_json(200, page(5))
            .respond_json(200, page(10));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let records = fetcher
            .fetch_records(&Resource::rest("devices", "/core/devices"), &FilterSet::new(), 5)
            .unwrap();

        assert_eq!(records.len(), 10);
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.remaining(), 1);
    }

    fn objects(count: usize) -> Value {
        json!({"data": {"ScientificObject": (0..count).map(|i| json!({"_id": format!("so{}", i)})).collect::<Vec<_>>()}})
    }

    #[test]
    fn test_oversized_page_ends_fetch() {
        let transport = ScriptedTransport::new()
            .respond_json(200, objects(3))
            .respond_json(200, objects(3));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);
        let resource = Resource::graphql("ScientificObject", "query { ScientificObject { _id } }").paginated(true);

        let records = fetcher.fetch_records(&resource, &FilterSet::new(), 2).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_repeated_page_ends_fetch() {
        let transport = ScriptedTransport::new()
            .respond_json(200, objects(2))
            .respond_json(200, objects(2))
            .respond_json(200, objects(2));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);
        let resource = Resource::graphql("ScientificObject", "query { ScientificObject { _id } }").paginated(true);

        let pages = fetcher.fetch_all(&resource, &FilterSet::new(), 2).unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].records[1]["_id"], "so1");
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.remaining(), 1);
    }

    #[test]
    fn test_failure_mid_fetch_discards_everything() {
        let transport = ScriptedTransport::new()
            .respond_json(200, rest_page(0, 20, 55))
            .respond(HttpResponse::new(500, "boom"))
            .respond_json(200, rest_page(40, 15, 55));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let err = fetcher
            .fetch_all(&Resource::rest("devices", "/core/devices"), &FilterSet::new(), 20)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Request);
        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.remaining(), 1);
    }

    #[test]
    fn test_zero_page_size_never_hits_network() {
        let transport = ScriptedTransport::new();
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let err = fetcher
            .fetch_all(&Resource::rest("devices", "/core/devices"), &FilterSet::new(), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_graphql_errors_abort() {
        let transport = ScriptedTransport::new().respond_json(
            200,
            json!({"data": null, "errors": [{"message": "Cannot query field"}]}),
        );
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let err = fetcher
            .fetch_all(&Resource::graphql("Experiment", "query { Experiment { _id } }"), &FilterSet::new(), 20)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Request);
        assert!(err.to_string().contains("Cannot query field"));
    }

    #[test]
    fn test_graphql_request_shape() {
        let transport = ScriptedTransport::new()
            .respond_json(200, json!({"data": {"ScientificObject": [{"_id": "so1"}]}}));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);
        let resource = Resource::graphql("ScientificObject", "query Q { ScientificObject { _id } }")
            .with_variable("experience", json!(["EXP_ZA17_2017_04_01"]))
            .paginated(true);
        let filters = QueryBuilder::new().equals("type", Some("vocabulary:Plant")).build().unwrap();

        let records = fetcher.fetch_records(&resource, &filters, 10).unwrap();
        assert_eq!(records.len(), 1);

        let request = &transport.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "http://silex/graphql");
        assert_eq!(
            request.body.as_ref().unwrap()["variables"],
            json!({
                "experience": ["EXP_ZA17_2017_04_01"],
                "filter": {"type": "vocabulary:Plant"},
                "page": 0,
                "pageSize": 10
            })
        );
        assert_eq!(request.headers["Content-Type"], "application/json");
    }

    #[test]
    fn test_unpaginated_graphql_sends_no_filter_or_page() {
        let transport = ScriptedTransport::new()
            .respond_json(200, json!({"data": {"Experiment": (0..30).map(|i| json!({"_id": i})).collect::<Vec<_>>()}}));
        let session = session();
        let fetcher = PaginatedFetcher::new(&session, &transport);

        let records = fetcher
            .fetch_records(&Resource::graphql("Experiment", "query { Experiment { _id } }"), &FilterSet::new(), 20)
            .unwrap();

        assert_eq!(records.len(), 30);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.requests()[0].body.as_ref().unwrap()["variables"], json!({}));
    }
}
