use crate::core::filter::CollectionFilter;
use crate::io::stac::{BandMapping, ItemCollection, Link, SearchParams};
use crate::types::{CompareError, CompareResult, ImageRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Anything that can list the images of a collection matching a filter
pub trait Catalog {
    /// Records matching `filter`, ordered by acquisition time then id
    fn search(&self, filter: &CollectionFilter) -> CompareResult<Vec<ImageRecord>>;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

/// Where a collection's items come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogSource {
    /// STAC API root or `/search` endpoint
    Stac { url: String },
    /// STAC ItemCollection JSON on disk
    Local { path: PathBuf },
}

/// A collection inside a catalog, plus how its assets map to bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Collection id as the catalog knows it
    pub id: String,
    pub source: CatalogSource,
    #[serde(default)]
    pub bands: Vec<BandMapping>,
}

impl CollectionSpec {
    /// Open the catalog this collection lives in
    pub fn open(&self, options: &HttpOptions) -> CompareResult<Box<dyn Catalog>> {
        match &self.source {
            CatalogSource::Stac { url } => Ok(Box::new(StacApiCatalog::new(
                url,
                &self.id,
                self.bands.clone(),
                options.clone(),
            )?)),
            CatalogSource::Local { path } => Ok(Box::new(LocalCatalog::new(
                path,
                &self.id,
                self.bands.clone(),
            ))),
        }
    }
}

/// HTTP behaviour of remote catalogs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub timeout_secs: u64,
    /// Retries on transient failures (5xx, 429, connection errors)
    pub max_retries: u32,
    /// Items requested per page
    pub page_size: u32,
    /// Upper bound on items collected across pages
    pub max_items: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            page_size: 100,
            max_items: 500,
        }
    }
}

/// Search endpoint for a STAC API base url
pub fn search_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/search") {
        base.to_string()
    } else {
        format!("{}/search", base)
    }
}

/// Convert one page of items, dropping the ones missing mapped assets
fn records_from_page(
    page: &ItemCollection,
    collection: &str,
    mapping: &[BandMapping],
) -> CompareResult<Vec<ImageRecord>> {
    let mut records = Vec::with_capacity(page.features.len());
    for item in &page.features {
        if let Some(record) = item.to_record(collection, mapping)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// STAC Item Search over HTTP (blocking)
pub struct StacApiCatalog {
    url: String,
    collection: String,
    mapping: Vec<BandMapping>,
    options: HttpOptions,
    client: reqwest::blocking::Client,
}

impl StacApiCatalog {
    pub fn new(
        base_url: &str,
        collection: &str,
        mapping: Vec<BandMapping>,
        options: HttpOptions,
    ) -> CompareResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| CompareError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: search_url(base_url),
            collection: collection.to_string(),
            mapping,
            options,
            client,
        })
    }

    pub fn search_params(&self, filter: &CollectionFilter) -> SearchParams {
        SearchParams {
            collections: Some(vec![self.collection.clone()]),
            bbox: Some(filter.aoi.bbox().to_stac().to_vec()),
            datetime: Some(filter.window.to_stac_interval()),
            limit: Some(self.options.page_size),
            token: None,
        }
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(500 * (1u64 << (attempt - 1).min(6)))
    }

    /// Send a request, retrying transient failures with exponential backoff
    fn send_with_retry<F>(&self, what: &str, build: F) -> CompareResult<ItemCollection>
    where
        F: Fn() -> reqwest::blocking::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                log::warn!(
                    "Retrying {} in {} ms (attempt {}/{})",
                    what,
                    delay.as_millis(),
                    attempt,
                    self.options.max_retries
                );
                std::thread::sleep(delay);
            }

            match build().send() {
                Ok(response) if response.status().is_success() => {
                    let body = response
                        .text()
                        .map_err(|e| CompareError::Http(format!("Failed to read response: {}", e)))?;
                    return serde_json::from_str(&body).map_err(|e| {
                        CompareError::InvalidFormat(format!("{} returned invalid STAC JSON: {}", what, e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().unwrap_or_default();
                    last_err = Some(CompareError::Http(format!(
                        "{} returned HTTP {}: {}",
                        what,
                        status,
                        body.chars().take(500).collect::<String>()
                    )));
                    if !is_retryable(status) {
                        break;
                    }
                }
                Err(e) => {
                    last_err = Some(CompareError::Http(format!("{} failed: {}", what, e)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CompareError::Http(format!("{} failed", what))))
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> CompareResult<ItemCollection> {
        log::debug!("POST {} {}", url, body);
        self.send_with_retry("STAC search", || self.client.post(url).json(body))
    }

    fn follow(&self, link: &Link, params: &SearchParams) -> CompareResult<ItemCollection> {
        match next_request_body(link, params)? {
            Some(body) => self.post(&link.href, &body),
            None => {
                log::debug!("GET {}", link.href);
                self.send_with_retry("STAC pagination", || self.client.get(&link.href))
            }
        }
    }
}

/// Server errors and rate limiting may clear up; other client errors will not
fn is_retryable(status: reqwest::StatusCode) -> bool {
    !status.is_client_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Body of the POST a next link asks for, or `None` when it is a plain GET.
///
/// With `merge: true` the link body overrides keys of the original search;
/// otherwise it replaces the search body.
fn next_request_body(link: &Link, params: &SearchParams) -> CompareResult<Option<serde_json::Value>> {
    let method = link.method.as_deref().unwrap_or("GET").to_uppercase();
    if method != "POST" {
        return Ok(None);
    }
    let mut body = serde_json::to_value(params)?;
    match (&link.body, link.merge.unwrap_or(false)) {
        (Some(link_body), true) => {
            if let (Some(base), Some(extra)) = (body.as_object_mut(), link_body.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
        (Some(link_body), false) => body = link_body.clone(),
        (None, _) => {}
    }
    Ok(Some(body))
}

/// Collects records across search pages, capped at `max_items`
struct PageAccumulator {
    max_items: usize,
    records: Vec<ImageRecord>,
    pages: usize,
}

impl PageAccumulator {
    fn new(max_items: usize) -> Self {
        Self {
            max_items,
            records: Vec::new(),
            pages: 0,
        }
    }

    /// Take one page; returns the link to fetch next, if pagination goes on
    fn add(&mut self, page: &ItemCollection, records: Vec<ImageRecord>) -> Option<Link> {
        self.pages += 1;
        if page.features.is_empty() {
            return None;
        }
        self.records.extend(records);
        if self.records.len() >= self.max_items {
            if self.records.len() > self.max_items || page.next_link().is_some() {
                log::warn!("Stopping pagination at {} items", self.max_items);
            }
            self.records.truncate(self.max_items);
            return None;
        }
        page.next_link().cloned()
    }
}

impl Catalog for StacApiCatalog {
    fn search(&self, filter: &CollectionFilter) -> CompareResult<Vec<ImageRecord>> {
        let params = self.search_params(filter);
        log::info!("Searching {} for '{}' in {:?}", self.url, self.collection, params.datetime);

        let mut pages = PageAccumulator::new(self.options.max_items);
        let mut page = self.post(&self.url, &serde_json::to_value(&params)?)?;
        while let Some(next) = pages.add(&page, records_from_page(&page, &self.collection, &self.mapping)?) {
            page = self.follow(&next, &params)?;
        }

        log::info!("Catalog returned {} record(s) over {} page(s)", pages.records.len(), pages.pages);
        Ok(filter.apply(pages.records))
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.url, self.collection)
    }
}

/// ItemCollection file on disk; relative asset hrefs resolve against it
pub struct LocalCatalog {
    path: PathBuf,
    collection: String,
    mapping: Vec<BandMapping>,
}

impl LocalCatalog {
    pub fn new<P: AsRef<Path>>(path: P, collection: &str, mapping: Vec<BandMapping>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            collection: collection.to_string(),
            mapping,
        }
    }

    fn resolve(&self, href: &str) -> String {
        if href.contains("://") || href.starts_with("/vsi") || Path::new(href).is_absolute() {
            return href.to_string();
        }
        match self.path.parent() {
            Some(dir) => dir.join(href).to_string_lossy().to_string(),
            None => href.to_string(),
        }
    }
}

impl Catalog for LocalCatalog {
    fn search(&self, filter: &CollectionFilter) -> CompareResult<Vec<ImageRecord>> {
        log::info!("Reading local catalog: {}", self.path.display());
        let content = std::fs::read_to_string(&self.path)?;
        let page: ItemCollection = serde_json::from_str(&content)?;

        let mut records = Vec::new();
        for item in &page.features {
            // One file may hold several collections
            if let Some(c) = &item.collection {
                if c != &self.collection {
                    continue;
                }
            }
            if let Some(mut record) = item.to_record(&self.collection, &self.mapping)? {
                for source in record.bands.values_mut() {
                    source.href = self.resolve(&source.href);
                }
                records.push(record);
            }
        }
        Ok(filter.apply(records))
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.path.display(), self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Aoi, TimeWindow};
    use serde_json::json;

    #[test]
    fn test_search_url() {
        assert_eq!(search_url("https://stac.example.com/v1/"), "https://stac.example.com/v1/search");
        assert_eq!(search_url("https://stac.example.com/v1/search"), "https://stac.example.com/v1/search");
    }

    #[test]
    fn test_search_params_from_filter() {
        let aoi = Aoi::from_ring(vec![(10.0, 45.0), (10.01, 45.0), (10.01, 45.01), (10.0, 45.01)]).unwrap();
        let window = TimeWindow::from_date_str("2021-04-02", 2).unwrap();
        let catalog = StacApiCatalog::new("https://stac.example.com", "s2", vec![], HttpOptions::default()).unwrap();
        let params = catalog.search_params(&CollectionFilter::new(aoi, window));
        assert_eq!(params.collections, Some(vec!["s2".to_string()]));
        assert_eq!(params.bbox, Some(vec![10.0, 45.0, 10.01, 45.01]));
        assert_eq!(params.limit, Some(100));
        assert_eq!(catalog.describe(), "https://stac.example.com/search [s2]");
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(StacApiCatalog::backoff(1), Duration::from_millis(500));
        assert_eq!(StacApiCatalog::backoff(3), Duration::from_millis(2000));
    }

    fn item(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "bbox": [10.0, 45.0, 10.1, 45.1],
            "properties": { "datetime": "2021-04-02T10:20:00Z" },
            "assets": { "label": { "href": format!("https://data.example.com/{}.tif", id) } }
        })
    }

    fn page(ids: &[&str], next: Option<serde_json::Value>) -> ItemCollection {
        let features: Vec<serde_json::Value> = ids.iter().map(|id| item(id)).collect();
        let links: Vec<serde_json::Value> = next.into_iter().collect();
        serde_json::from_value(json!({ "type": "FeatureCollection", "features": features, "links": links })).unwrap()
    }

    fn records(page: &ItemCollection) -> Vec<ImageRecord> {
        records_from_page(page, "dw", &[BandMapping::new("label", "label", 1)]).unwrap()
    }

    fn params() -> SearchParams {
        SearchParams {
            collections: Some(vec!["dw".to_string()]),
            bbox: Some(vec![10.0, 45.0, 10.01, 45.01]),
            datetime: Some("2021-04-02T00:00:00.000Z/2021-04-03T23:59:59.999Z".to_string()),
            limit: Some(100),
            token: None,
        }
    }

    #[test]
    fn test_retry_decision_by_status() {
        use reqwest::StatusCode;
        for status in [StatusCode::SERVICE_UNAVAILABLE, StatusCode::BAD_GATEWAY, StatusCode::TOO_MANY_REQUESTS] {
            assert!(is_retryable(status), "{} should be retried", status);
        }
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::UNAUTHORIZED] {
            assert!(!is_retryable(status), "{} should not be retried", status);
        }
    }

    #[test]
    fn test_next_request_body() {
        let get = Link { rel: "next".to_string(), href: "https://x/search?page=2".to_string(), method: None, body: None, merge: None };
        assert_eq!(next_request_body(&get, &params()).unwrap(), None);

        let merged = Link {
            rel: "next".to_string(),
            href: "https://x/search".to_string(),
            method: Some("post".to_string()),
            body: Some(json!({ "token": "abc", "limit": 50 })),
            merge: Some(true),
        };
        let body = next_request_body(&merged, &params()).unwrap().unwrap();
        assert_eq!(body["token"], "abc");
        assert_eq!(body["limit"], 50);
        assert_eq!(body["collections"], json!(["dw"]));

        let replaced = Link { merge: Some(false), ..merged.clone() };
        let body = next_request_body(&replaced, &params()).unwrap().unwrap();
        assert_eq!(body, json!({ "token": "abc", "limit": 50 }));

        let bare_post = Link { body: None, ..merged };
        let body = next_request_body(&bare_post, &params()).unwrap().unwrap();
        assert_eq!(body, serde_json::to_value(params()).unwrap());
    }

    #[test]
    fn test_pagination_follows_next_until_done() {
        let next = json!({ "rel": "next", "href": "https://x/search?page=2" });
        let mut pages = PageAccumulator::new(500);

        let first = page(&["a", "b"], Some(next));
        assert_eq!(pages.add(&first, records(&first)).map(|l| l.href), Some("https://x/search?page=2".to_string()));

        let last = page(&["c"], None);
        assert!(pages.add(&last, records(&last)).is_none());
        assert_eq!(pages.records.len(), 3);
        assert_eq!(pages.pages, 2);
    }

    #[test]
    fn test_pagination_stops_on_empty_page_and_item_cap() {
        let next = json!({ "rel": "next", "href": "https://x/search?page=2" });

        let mut pages = PageAccumulator::new(500);
        let empty = page(&[], Some(next.clone()));
        assert!(pages.add(&empty, records(&empty)).is_none());
        assert!(pages.records.is_empty());

        let mut capped = PageAccumulator::new(3);
        let first = page(&["a", "b"], Some(next.clone()));
        assert!(capped.add(&first, records(&first)).is_some());
        let second = page(&["c", "d"], Some(next));
        assert!(capped.add(&second, records(&second)).is_none());
        let ids: Vec<&str> = capped.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    /// Answers one connection per canned (status, body) response, returning the request bodies
    fn serve(listener: std::net::TcpListener, responses: Vec<(u16, String)>) -> std::thread::JoinHandle<Vec<String>> {
        use std::io::{Read, Write};
        std::thread::spawn(move || {
            let mut bodies = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                let header_end = loop {
                    let n = stream.read(&mut buf).unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    assert!(n > 0, "connection closed before headers ended");
                };
                let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                while request.len() < header_end + length {
                    let n = stream.read(&mut buf).unwrap();
                    assert!(n > 0, "connection closed before body ended");
                    request.extend_from_slice(&buf[..n]);
                }
                bodies.push(String::from_utf8_lossy(&request[header_end..]).to_string());

                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
            bodies
        })
    }

    #[test]
    fn test_search_retries_unavailable_then_pages_through() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let first = json!({
            "type": "FeatureCollection",
            "features": [item("a"), item("b")],
            "links": [{
                "rel": "next",
                "href": format!("{}/search", base),
                "method": "POST",
                "body": { "token": "page2" },
                "merge": true
            }]
        });
        let second = json!({ "type": "FeatureCollection", "features": [item("c")] });
        let server = serve(
            listener,
            vec![
                (503, "busy".to_string()),
                (200, first.to_string()),
                (200, second.to_string()),
            ],
        );

        let options = HttpOptions { max_retries: 2, ..Default::default() };
        let catalog = StacApiCatalog::new(&base, "dw", vec![BandMapping::new("label", "label", 1)], options).unwrap();
        let aoi = Aoi::from_ring(vec![(10.0, 45.0), (10.01, 45.0), (10.01, 45.01), (10.0, 45.01)]).unwrap();
        let window = TimeWindow::from_date_str("2021-04-02", 2).unwrap();
        let records = catalog.search(&CollectionFilter::new(aoi, window)).unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let bodies = server.join().unwrap();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0], bodies[1]);
        let follow: serde_json::Value = serde_json::from_str(&bodies[2]).unwrap();
        assert_eq!(follow["token"], "page2");
        assert_eq!(follow["collections"], json!(["dw"]));
    }

    #[test]
    fn test_local_catalog_filters_and_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "id": "in-window", "collection": "dw",
                    "bbox": [10.0, 45.0, 10.1, 45.1],
                    "properties": { "datetime": "2021-04-02T10:20:00Z" },
                    "assets": { "label": { "href": "label.tif" } }
                },
                {
                    "id": "too-late", "collection": "dw",
                    "bbox": [10.0, 45.0, 10.1, 45.1],
                    "properties": { "datetime": "2021-04-05T10:20:00Z" },
                    "assets": { "label": { "href": "late.tif" } }
                },
                {
                    "id": "other-collection", "collection": "s2",
                    "bbox": [10.0, 45.0, 10.1, 45.1],
                    "properties": { "datetime": "2021-04-02T10:20:00Z" },
                    "assets": { "label": { "href": "x.tif" } }
                }
            ]
        });
        std::fs::write(&path, doc.to_string()).unwrap();

        let catalog = LocalCatalog::new(&path, "dw", vec![BandMapping::new("label", "label", 1)]);
        let aoi = Aoi::from_ring(vec![(10.0, 45.0), (10.01, 45.0), (10.01, 45.01), (10.0, 45.01)]).unwrap();
        let window = TimeWindow::from_date_str("2021-04-02", 2).unwrap();
        let records = catalog.search(&CollectionFilter::new(aoi, window)).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "in-window");
        assert_eq!(
            records[0].source("label").unwrap().href,
            dir.path().join("label.tif").to_string_lossy()
        );
    }
}
