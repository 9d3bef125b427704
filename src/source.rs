//! Record sources: an S3-compatible object store, local files, and the
//! built-in sample.

use std::fs;
use std::path::PathBuf;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::config::SourceSettings;
use crate::error::IngestError;
use crate::ingest::{SAMPLE_CSV, has_required_columns};
use crate::retry::RetryPolicy;
use crate::traits::{CsvDocument, RecordSource};

/// Reads delivery CSVs over plain HTTP GETs against a path-style bucket
/// URL (`{endpoint}/{bucket}/{key}`).
///
/// The sample key is tried first. When it is missing or unusable the full
/// dataset is read instead: every `.csv` object under the configured prefix
/// (ListObjectsV2), or the explicit keys when any are set. Transport
/// failures and 5xx responses are retried with the configured policy.
#[derive(Debug, Clone)]
pub struct ObjectStoreSource {
    settings: SourceSettings,
    retry: RetryPolicy,
    client: Client,
}

impl ObjectStoreSource {
    pub fn new(settings: SourceSettings, retry: RetryPolicy) -> Result<Self, IngestError> {
        retry.validate()?;
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|source| IngestError::Http {
                url: settings.base_url(),
                source,
            })?;

        Ok(Self {
            settings,
            retry,
            client,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.settings.base_url(),
            self.settings.bucket,
            key.trim_start_matches('/')
        )
    }

    /// Downloads one object. `None` means the object does not exist.
    pub fn get_object(&self, key: &str) -> Result<Option<String>, IngestError> {
        let url = self.object_url(key);
        self.retry
            .run("get_object", || self.get_once(&url), is_retryable)
            .map_err(|source| IngestError::Http {
                url: url.clone(),
                source,
            })
    }

    fn get_once(&self, url: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self.client.get(url).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.text()?;
        debug!(url, bytes = body.len(), "downloaded object");
        Ok(Some(body))
    }

    /// Lists every `.csv` key under `prefix`, in listing order, following
    /// continuation tokens until the listing is complete.
    pub fn list_csv_keys(&self, prefix: &str) -> Result<Vec<String>, IngestError> {
        let url = format!("{}/{}", self.settings.base_url(), self.settings.bucket);
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .retry
                .run("list_objects", || self.list_once(&url, prefix, token.as_deref()), is_retryable)
                .map_err(|source| IngestError::Http {
                    url: url.clone(),
                    source,
                })?;

            keys.extend(page.keys.into_iter().filter(|key| key.ends_with(".csv")));
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        debug!(bucket = %self.settings.bucket, prefix, objects = keys.len(), "listed csv objects");
        Ok(keys)
    }

    fn list_once(&self, url: &str, prefix: &str, token: Option<&str>) -> Result<ListPage, reqwest::Error> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }
        let body = self.client.get(url).query(&query).send()?.error_for_status()?.text()?;
        Ok(ListPage::parse(&body))
    }

    /// Keeps `contents` if it is a usable CSV; logs and drops it otherwise.
    fn accept(&self, key: &str, contents: String, documents: &mut Vec<CsvDocument>) -> bool {
        if contents.trim().is_empty() {
            warn!(bucket = %self.settings.bucket, key, "object is empty, skipping");
            return false;
        }
        if !has_required_columns(&contents) {
            warn!(bucket = %self.settings.bucket, key, "object lacks required columns, skipping");
            return false;
        }
        documents.push(CsvDocument {
            origin: format!("s3://{}/{}", self.settings.bucket, key),
            contents,
        });
        true
    }
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq, Eq)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

impl ListPage {
    fn parse(body: &str) -> Self {
        Self {
            keys: element_texts(body, "Key"),
            truncated: element_texts(body, "IsTruncated").first().is_some_and(|value| value == "true"),
            next_token: element_texts(body, "NextContinuationToken").into_iter().next(),
        }
    }
}

/// Text of every `<tag>...</tag>` element in `body`, in document order.
fn element_texts(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start + open.len()..];
        let Some(end) = rest.find(&close) else { break };
        values.push(unescape_xml(&rest[..end]));
        rest = &rest[end + close.len()..];
    }
    values
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.is_body()
        || err.status().is_some_and(|status| status.is_server_error())
}

impl RecordSource for ObjectStoreSource {
    fn fetch(&self) -> Result<Vec<CsvDocument>, IngestError> {
        let mut documents = Vec::new();
        let sample_key = self.settings.sample_key.as_str();

        match self.get_object(sample_key)? {
            Some(contents) => {
                if self.accept(sample_key, contents, &mut documents) {
                    info!(bucket = %self.settings.bucket, key = sample_key, "using sample dataset");
                    return Ok(documents);
                }
            }
            None => info!(key = sample_key, "sample dataset not found, reading full dataset"),
        }

        let keys = if self.settings.keys.is_empty() {
            let listed = self.list_csv_keys(&self.settings.prefix)?;
            listed.into_iter().filter(|key| key != sample_key).collect()
        } else {
            self.settings.keys.clone()
        };

        for key in &keys {
            match self.get_object(key)? {
                Some(contents) => {
                    self.accept(key, contents, &mut documents);
                }
                None => warn!(bucket = %self.settings.bucket, key = %key, "object not found, skipping"),
            }
        }

        if documents.is_empty() {
            return Err(IngestError::NoData {
                location: format!(
                    "{}/{}/{}",
                    self.settings.base_url(),
                    self.settings.bucket,
                    self.settings.prefix
                ),
            });
        }
        info!(bucket = %self.settings.bucket, objects = documents.len(), "loaded full dataset");
        Ok(documents)
    }
}

/// Local CSV files, read in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    paths: Vec<PathBuf>,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl RecordSource for FileSource {
    fn fetch(&self) -> Result<Vec<CsvDocument>, IngestError> {
        self.paths
            .iter()
            .map(|path| {
                let contents = fs::read_to_string(path).map_err(|source| IngestError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(CsvDocument {
                    origin: path.display().to_string(),
                    contents,
                })
            })
            .collect()
    }
}

/// The five built-in sample deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSource;

impl RecordSource for SampleSource {
    fn fetch(&self) -> Result<Vec<CsvDocument>, IngestError> {
        Ok(vec![CsvDocument {
            origin: "sample".to_string(),
            contents: SAMPLE_CSV.to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::ingest::parse_documents;

    type Responses = Arc<Mutex<HashMap<String, Vec<(u16, String)>>>>;

    /// Serves canned responses per request path. The last response for a
    /// path repeats; unknown paths get 404.
    fn serve(routes: &[(&str, &[(u16, &str)])]) -> (String, Responses) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let responses: Responses = Arc::new(Mutex::new(
            routes
                .iter()
                .map(|(path, seq)| {
                    let seq = seq.iter().map(|(code, body)| (*code, body.to_string())).collect();
                    (path.to_string(), seq)
                })
                .collect(),
        ));

        let shared = Arc::clone(&responses);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (code, body) = {
                    let mut map = shared.lock().unwrap();
                    match map.get_mut(&path) {
                        Some(seq) if seq.len() > 1 => seq.remove(0),
                        Some(seq) => seq[0].clone(),
                        None => (404, String::new()),
                    }
                };
                let response = format!(
                    "HTTP/1.1 {code} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (addr.to_string(), responses)
    }

    fn source(endpoint: String) -> ObjectStoreSource {
        let settings = SourceSettings {
            endpoint,
            bucket: "logistics-data".to_string(),
            keys: vec!["raw/a.csv".to_string(), "raw/b.csv".to_string()],
            timeout_secs: 5,
            ..SourceSettings::default()
        };
        ObjectStoreSource::new(settings, RetryPolicy::immediate(3)).unwrap()
    }

    const ROW_A: &str = "delivery_id,pickup_lat,pickup_lon,dropoff_lat,dropoff_lon,timestamp\n\
                         1,40.7128,-74.0060,40.7140,-74.0070,2025-02-20 10:00:00\n";
    const ROW_B: &str = "delivery_id,pickup_lat,pickup_lon,dropoff_lat,dropoff_lon,timestamp\n\
                         2,40.7130,-74.0050,40.7150,-74.0060,2025-02-20 10:05:00\n";

    #[test]
    fn test_object_url_is_path_style() {
        let source = source("minio:9000/".to_string());
        assert_eq!(
            source.object_url("/raw/deliveries.csv"),
            "http://minio:9000/logistics-data/raw/deliveries.csv"
        );
    }

    #[test]
    fn test_sample_object_wins() {
        let (endpoint, _) = serve(&[
            ("/logistics-data/raw/sample_deliveries.csv", &[(200, SAMPLE_CSV)]),
            ("/logistics-data/raw/a.csv", &[(200, ROW_A)]),
        ]);
        let docs = source(endpoint).fetch().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].origin, "s3://logistics-data/raw/sample_deliveries.csv");
        assert_eq!(parse_documents(&docs).unwrap().records.len(), 5);
    }

    #[test]
    fn test_falls_back_to_full_dataset() {
        let (endpoint, _) = serve(&[
            ("/logistics-data/raw/a.csv", &[(200, ROW_A)]),
            ("/logistics-data/raw/b.csv", &[(200, ROW_B)]),
        ]);
        let docs = source(endpoint).fetch().unwrap();
        let ids: Vec<u64> = parse_documents(&docs).unwrap().records.iter().map(|r| r.id().0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    const LISTING: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <ListBucketResult><Name>logistics-data</Name><Prefix>raw/</Prefix><KeyCount>3</KeyCount>\
        <IsTruncated>false</IsTruncated>\
        <Contents><Key>raw/2025/b.csv</Key><Size>120</Size></Contents>\
        <Contents><Key>raw/README.txt</Key><Size>9</Size></Contents>\
        <Contents><Key>raw/a.csv</Key><Size>120</Size></Contents>\
        </ListBucketResult>";

    #[test]
    fn test_lists_prefix_when_no_keys_are_set() {
        let (endpoint, _) = serve(&[
            ("/logistics-data?list-type=2&prefix=raw%2F", &[(200, LISTING)]),
            ("/logistics-data/raw/2025/b.csv", &[(200, ROW_B)]),
            ("/logistics-data/raw/a.csv", &[(200, ROW_A)]),
        ]);
        let settings = SourceSettings {
            endpoint,
            timeout_secs: 5,
            ..SourceSettings::default()
        };
        let source = ObjectStoreSource::new(settings, RetryPolicy::immediate(3)).unwrap();

        let docs = source.fetch().unwrap();
        let origins: Vec<&str> = docs.iter().map(|doc| doc.origin.as_str()).collect();
        assert_eq!(origins, vec!["s3://logistics-data/raw/2025/b.csv", "s3://logistics-data/raw/a.csv"]);
        let ids: Vec<u64> = parse_documents(&docs).unwrap().records.iter().map(|r| r.id().0).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_listing_follows_continuation_tokens() {
        let first = "<ListBucketResult><IsTruncated>true</IsTruncated>\
                     <Contents><Key>raw/a.csv</Key></Contents>\
                     <NextContinuationToken>page+2</NextContinuationToken></ListBucketResult>";
        let second = "<ListBucketResult><IsTruncated>false</IsTruncated>\
                      <Contents><Key>raw/b&amp;c.csv</Key></Contents></ListBucketResult>";
        let (endpoint, _) = serve(&[
            ("/logistics-data?list-type=2&prefix=raw%2F", &[(200, first)]),
            (
                "/logistics-data?list-type=2&prefix=raw%2F&continuation-token=page%2B2",
                &[(200, second)],
            ),
        ]);
        let keys = source(endpoint).list_csv_keys("raw/").unwrap();
        assert_eq!(keys, vec!["raw/a.csv", "raw/b&c.csv"]);
    }

    #[test]
    fn test_empty_listing_is_no_data() {
        let empty = "<ListBucketResult><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>";
        let (endpoint, _) = serve(&[("/logistics-data?list-type=2&prefix=raw%2F", &[(200, empty)])]);
        let settings = SourceSettings {
            endpoint,
            timeout_secs: 5,
            ..SourceSettings::default()
        };
        let err = ObjectStoreSource::new(settings, RetryPolicy::immediate(1))
            .unwrap()
            .fetch()
            .unwrap_err();
        assert!(matches!(err, IngestError::NoData { .. }), "got {err:?}");
    }

    #[test]
    fn test_inverted_retry_bounds_are_rejected() {
        let retry = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1));
        let err = ObjectStoreSource::new(SourceSettings::default(), retry).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_skips_empty_and_invalid_objects() {
        let (endpoint, _) = serve(&[
            ("/logistics-data/raw/a.csv", &[(200, "  \n")]),
            ("/logistics-data/raw/b.csv", &[(200, "id,lat\n1,2\n")]),
        ]);
        let err = source(endpoint).fetch().unwrap_err();
        assert!(matches!(err, IngestError::NoData { .. }), "got {err:?}");
    }

    #[test]
    fn test_retries_server_errors() {
        let (endpoint, _) = serve(&[(
            "/logistics-data/raw/sample_deliveries.csv",
            &[(503, ""), (500, ""), (200, SAMPLE_CSV)],
        )]);
        let docs = source(endpoint).fetch().unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let (endpoint, responses) = serve(&[(
            "/logistics-data/raw/sample_deliveries.csv",
            &[(403, ""), (200, SAMPLE_CSV)],
        )]);
        let err = source(endpoint).fetch().unwrap_err();
        assert!(matches!(err, IngestError::Http { .. }));
        let remaining = responses.lock().unwrap()["/logistics-data/raw/sample_deliveries.csv"].len();
        assert_eq!(remaining, 1, "only the 403 was consumed");
    }

    #[test]
    fn test_file_source_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, ROW_A).unwrap();
        fs::write(&b, ROW_B).unwrap();

        let docs = FileSource::new(vec![b.clone(), a]).fetch().unwrap();
        assert_eq!(docs[0].origin, b.display().to_string());
        assert_eq!(docs[1].contents, ROW_A);
    }

    #[test]
    fn test_file_source_missing_file() {
        let err = FileSource::new(vec![PathBuf::from("/no/such/file.csv")]).fetch().unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[test]
    fn test_sample_source() {
        let docs = SampleSource.fetch().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].contents, SAMPLE_CSV);
    }
}
