//! Fetches raw sales reports and JSON resources from the App Store Connect API.

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize};

use std::{
    io::Read,
    sync::{Arc, LazyLock},
};

use crate::{
    auth::TokenManager,
    error::{Error, Result},
    options::ReportRequest,
};

pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com/v1";

/// Media type the sales report endpoint answers with.
pub const GZIP_MEDIA_TYPE: &str = "application/a-gzip";

pub const JSON_MEDIA_TYPE: &str = "application/json";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

static NO_SALES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)no sales").expect("no-sales pattern compiles"));

/// An authenticated GET request.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub bearer_token: String,
    pub accept: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Status code and reason phrase, e.g. `500 Internal Server Error`.
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn has_media_type(&self, media_type: &str) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case(media_type))
    }
}

/// Sends HTTP requests. Implemented over `reqwest` and by test fakes.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the request cannot be sent or the body
    /// cannot be read. Error statuses are not errors at this level.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Clone, Debug, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        ReqwestClient { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .client
            .get(&request.url)
            .bearer_auth(&request.bearer_token)
            .header(ACCEPT, &request.accept)
            .send()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.to_string(),
            content_type,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    detail: String,
}

impl ErrorEnvelope {
    fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|envelope| !envelope.errors.is_empty())
    }

    /// Reports whether the API is saying there were no sales in the period.
    fn is_no_data(&self, status: u16) -> bool {
        status == 404
            && self
                .errors
                .iter()
                .any(|e| e.code == "NOT_FOUND" && NO_SALES.is_match(&e.detail))
    }

    fn into_error(mut self, status: u16) -> Error {
        let first = self.errors.swap_remove(0);
        Error::Api {
            status,
            code: first.code,
            detail: first.detail,
        }
    }
}

/// Decompresses a gzip report body, including every concatenated member.
///
/// # Errors
///
/// Returns [`Error::Decompress`] if `body` is not valid gzip.
pub fn gunzip(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(body).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Authenticated access to the App Store Connect API.
pub struct Transport {
    http: Arc<dyn HttpClient>,
    tokens: Arc<TokenManager>,
    base_url: String,
}

impl Transport {
    #[must_use]
    pub fn new(http: Arc<dyn HttpClient>, tokens: Arc<TokenManager>, base_url: &str) -> Self {
        Transport {
            http,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the URL of the report described by `request`.
    #[must_use]
    pub fn report_url(&self, request: &ReportRequest) -> String {
        format!(
            "{}/salesReports?filter[frequency]={}&filter[reportType]={}&filter[reportSubType]={}&filter[vendorNumber]={}&filter[reportDate]={}",
            self.base_url,
            request.period,
            request.report_type,
            request.report_type.sub_type(),
            request.vendor_number,
            request.date,
        )
    }

    /// Fetches the JSON resource at `path`, relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no token can be produced,
    /// [`Error::Request`] if the request fails, [`Error::Api`] or
    /// [`Error::Http`] for error statuses, and [`Error::UnexpectedFormat`]
    /// if the body does not decode as `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.tokens.get_token()?;
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "requesting resource");

        let response = self
            .http
            .get(HttpRequest {
                url,
                bearer_token: token,
                accept: JSON_MEDIA_TYPE.to_string(),
            })
            .await?;
        tracing::debug!(
            status = response.status,
            bytes = response.body.len(),
            "received resource response"
        );

        if !response.is_success() {
            return Err(match ErrorEnvelope::from_body(&response.body) {
                Some(envelope) => envelope.into_error(response.status),
                None => Error::Http(response.status_text),
            });
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| Error::UnexpectedFormat(format!("decoding {path}: {e}")))
    }

    /// Fetches the decompressed tab-separated report.
    ///
    /// Returns `Ok(None)` when the API says there were no sales in the
    /// requested period, or sends an empty body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no token can be produced,
    /// [`Error::Request`] if the request fails, [`Error::Api`] or
    /// [`Error::Http`] for error statuses, [`Error::UnexpectedFormat`] for a
    /// JSON success body, and [`Error::Decompress`] for a corrupt gzip body.
    pub async fn fetch_report(&self, request: &ReportRequest) -> Result<Option<Vec<u8>>> {
        let token = self.tokens.get_token()?;
        let url = self.report_url(request);
        tracing::debug!(%url, "requesting sales report");

        let response = self
            .http
            .get(HttpRequest {
                url,
                bearer_token: token,
                accept: GZIP_MEDIA_TYPE.to_string(),
            })
            .await?;
        tracing::debug!(
            status = response.status,
            content_type = response.content_type.as_deref().unwrap_or_default(),
            bytes = response.body.len(),
            "received sales report response"
        );

        if !response.is_success() {
            return match ErrorEnvelope::from_body(&response.body) {
                Some(envelope) if envelope.is_no_data(response.status) => {
                    tracing::info!(date = %request.date, "no sales reported for period");
                    Ok(None)
                }
                Some(envelope) => Err(envelope.into_error(response.status)),
                None => Err(Error::Http(response.status_text)),
            };
        }

        if response.has_media_type(JSON_MEDIA_TYPE) {
            return match ErrorEnvelope::from_body(&response.body) {
                Some(envelope) => Err(envelope.into_error(response.status)),
                None => Err(Error::UnexpectedFormat(
                    "JSON body where a report was expected".to_string(),
                )),
            };
        }

        if response.body.is_empty() {
            tracing::info!(date = %request.date, "empty sales report body");
            return Ok(None);
        }
        let gzipped = [GZIP_MEDIA_TYPE, "application/gzip", "application/x-gzip"]
            .iter()
            .any(|mt| response.has_media_type(mt))
            || response.body.starts_with(&GZIP_MAGIC);
        if gzipped {
            let decoded = gunzip(&response.body)?;
            tracing::debug!(bytes = decoded.len(), "decompressed sales report");
            return Ok(Some(decoded));
        }
        Ok(Some(response.body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        auth::Credentials,
        options::{Period, ReportType},
    };
    use flate2::{write::GzEncoder, Compression};
    use std::{io::Write, sync::Mutex};

    /// Answers every request with the same response and records the URLs.
    #[derive(Default)]
    pub(crate) struct FakeHttp {
        pub response: HttpResponse,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    pub(crate) fn tokens() -> Arc<TokenManager> {
        Arc::new(TokenManager::new(Credentials {
            key_id: "KEY".to_string(),
            issuer_id: "ISSUER".to_string(),
            private_key: std::fs::read_to_string("testdata/es256.pem").unwrap(),
        }))
    }

    pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn request() -> ReportRequest {
        ReportRequest {
            period: Period::Daily,
            date: "2024-03-01".to_string(),
            report_type: ReportType::Sales,
            vendor_number: "85012345".to_string(),
        }
    }

    async fn fetch(response: HttpResponse) -> (Result<Option<Vec<u8>>>, Arc<FakeHttp>) {
        let http = Arc::new(FakeHttp {
            response,
            ..FakeHttp::default()
        });
        let transport = Transport::new(http.clone(), tokens(), DEFAULT_BASE_URL);
        (transport.fetch_report(&request()).await, http)
    }

    fn json(status: u16, status_text: &str, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            status_text: status_text.to_string(),
            content_type: Some("application/json".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn fetch_report_fn_sends_authenticated_filtered_request() {
        let (result, http) = fetch(HttpResponse {
            status: 200,
            content_type: Some(GZIP_MEDIA_TYPE.to_string()),
            body: gzip(b"Title\tUnits\n"),
            ..HttpResponse::default()
        })
        .await;

        assert_eq!(result.unwrap().unwrap(), b"Title\tUnits\n");
        let requests = http.requests.lock().unwrap();
        assert_eq!(
            requests[0].url,
            "https://api.appstoreconnect.apple.com/v1/salesReports?filter[frequency]=DAILY&filter[reportType]=SALES&filter[reportSubType]=SUMMARY&filter[vendorNumber]=85012345&filter[reportDate]=2024-03-01"
        );
        assert_eq!(requests[0].accept, GZIP_MEDIA_TYPE);
        assert!(!requests[0].bearer_token.is_empty());
    }

    #[tokio::test]
    async fn fetch_report_fn_sniffs_gzip_and_passes_plain_bodies_through() {
        let (result, _) = fetch(HttpResponse {
            status: 200,
            content_type: Some("application/octet-stream".to_string()),
            body: gzip(b"gz"),
            ..HttpResponse::default()
        })
        .await;
        assert_eq!(result.unwrap().unwrap(), b"gz");

        let (result, _) = fetch(HttpResponse {
            status: 200,
            content_type: Some("text/tab-separated-values".to_string()),
            body: b"plain".to_vec(),
            ..HttpResponse::default()
        })
        .await;
        assert_eq!(result.unwrap().unwrap(), b"plain");
    }

    #[tokio::test]
    async fn fetch_report_fn_treats_empty_body_as_no_data() {
        let (result, _) = fetch(HttpResponse {
            status: 200,
            content_type: Some("text/plain".to_string()),
            ..HttpResponse::default()
        })
        .await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_report_fn_treats_no_sales_404_as_no_data() {
        let body = r#"{"errors":[{"status":"404","code":"NOT_FOUND","title":"The specified resource does not exist","detail":"There were no sales for the date specified."}]}"#;
        let (result, _) = fetch(json(404, "404 Not Found", body)).await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_report_fn_surfaces_api_error_envelope() {
        let body = r#"{"errors":[{"status":"403","code":"FORBIDDEN_ERROR","title":"Forbidden","detail":"This request is forbidden for security reasons"}]}"#;
        let (result, _) = fetch(json(403, "403 Forbidden", body)).await;
        match result {
            Err(Error::Api { status, code, detail }) => {
                assert_eq!(status, 403);
                assert_eq!(code, "FORBIDDEN_ERROR");
                assert_eq!(detail, "This request is forbidden for security reasons");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let body = r#"{"errors":[{"code":"NOT_FOUND","detail":"Vendor not found"}]}"#;
        let (result, _) = fetch(json(404, "404 Not Found", body)).await;
        assert!(matches!(result, Err(Error::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn fetch_report_fn_reports_status_when_body_is_unrecognised() {
        let (result, _) = fetch(HttpResponse {
            status: 502,
            status_text: "502 Bad Gateway".to_string(),
            content_type: Some("text/html".to_string()),
            body: b"<html></html>".to_vec(),
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "API request failed with status: 502 Bad Gateway");
    }

    #[tokio::test]
    async fn fetch_report_fn_rejects_json_success_body() {
        let (result, _) = fetch(json(200, "200 OK", r#"{"data":[]}"#)).await;
        assert!(matches!(result, Err(Error::UnexpectedFormat(_))));

        let body = r#"{"errors":[{"code":"PARAMETER_ERROR.INVALID","detail":"bad date"}]}"#;
        let (result, _) = fetch(json(200, "200 OK", body)).await;
        assert!(matches!(result, Err(Error::Api { status: 200, .. })));
    }

    #[test]
    fn gunzip_fn_reads_every_member() {
        let mut body = gzip(b"Title\tUnits\n");
        body.extend(gzip(b"Weather Pro\t3\n"));
        assert_eq!(gunzip(&body).unwrap(), b"Title\tUnits\nWeather Pro\t3\n");
    }

    #[tokio::test]
    async fn fetch_report_fn_fails_on_corrupt_gzip() {
        let (result, _) = fetch(HttpResponse {
            status: 200,
            content_type: Some(GZIP_MEDIA_TYPE.to_string()),
            body: vec![0x1f, 0x8b, 0, 1, 2],
            ..HttpResponse::default()
        })
        .await;
        assert!(matches!(result, Err(Error::Decompress(_))));
    }

    #[tokio::test]
    async fn get_json_fn_decodes_resource_and_surfaces_errors() {
        #[derive(Debug, Deserialize)]
        struct Page {
            data: Vec<String>,
        }

        let http = Arc::new(FakeHttp {
            response: json(200, "200 OK", r#"{"data":["a","b"]}"#),
            ..FakeHttp::default()
        });
        let transport = Transport::new(http.clone(), tokens(), "https://example.test/v1/");
        let page: Page = transport.get_json("/apps?limit=1").await.unwrap();
        assert_eq!(page.data, vec!["a", "b"]);
        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].url, "https://example.test/v1/apps?limit=1");
        assert_eq!(requests[0].accept, JSON_MEDIA_TYPE);
        drop(requests);

        let body = r#"{"errors":[{"code":"NOT_AUTHORIZED","detail":"Provide a properly configured and signed bearer token"}]}"#;
        let http = Arc::new(FakeHttp {
            response: json(401, "401 Unauthorized", body),
            ..FakeHttp::default()
        });
        let transport = Transport::new(http, tokens(), DEFAULT_BASE_URL);
        let err = transport.get_json::<Page>("/apps").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 401, ref code, .. } if code == "NOT_AUTHORIZED"));

        let http = Arc::new(FakeHttp {
            response: json(200, "200 OK", r#"{"data": 5}"#),
            ..FakeHttp::default()
        });
        let transport = Transport::new(http, tokens(), DEFAULT_BASE_URL);
        let err = transport.get_json::<Page>("/apps").await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedFormat(_)));
    }

    #[tokio::test]
    async fn fetch_report_fn_fails_before_request_without_valid_key() {
        let http = Arc::new(FakeHttp::default());
        let tokens = Arc::new(TokenManager::new(Credentials {
            key_id: "KEY".to_string(),
            issuer_id: "ISSUER".to_string(),
            private_key: "garbage".to_string(),
        }));
        let transport = Transport::new(http.clone(), tokens, DEFAULT_BASE_URL);
        let err = transport.fetch_report(&request()).await.unwrap_err();
        assert!(err.is_auth());
        assert!(http.requests.lock().unwrap().is_empty());
    }
}
