//! Google Drive operations used by the photo library.
//!
//! A [`DriveClient`] is a cheap handle: a shared `reqwest::Client` plus one
//! access token. The refresh wrapper builds a fresh handle for every attempt,
//! so these methods carry no refresh or retry logic of their own.

use std::collections::HashSet;

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

use super::config::GoogleConfig;

/// Page size for the browsing grid.
pub const UI_PAGE_SIZE: u32 = 30;

/// Page size when listing a whole folder for import.
pub const IMPORT_PAGE_SIZE: u32 = 1000;

/// A file entry as returned by Drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl DriveFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: None,
        }
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Authenticated Drive handle.
#[derive(Clone)]
pub struct DriveClient {
    http_client: reqwest::Client,
    api_base: String,
    upload_base: String,
    access_token: String,
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    /// Creates a handle with no access token yet.
    pub fn new(config: &GoogleConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            api_base: config.endpoints.drive_api_base.trim_end_matches('/').to_string(),
            upload_base: config
                .endpoints
                .drive_upload_base
                .trim_end_matches('/')
                .to_string(),
            access_token: String::new(),
        }
    }

    /// Returns a copy of this handle that authenticates with `access_token`.
    pub fn authorized(&self, access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            ..self.clone()
        }
    }

    /// The access token this handle sends.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Lists image files directly inside `folder_id`, excluding trashed ones.
    pub async fn list_images(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> ProviderResult<ImagePage> {
        let url = format!("{}/drive/v3/files", self.api_base);
        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", image_query(folder_id)),
                ("fields", "nextPageToken,files(id,name)".to_string()),
                ("pageSize", page_size.to_string()),
                ("supportsAllDrives", "true".to_string()),
                ("includeItemsFromAllDrives", "true".to_string()),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = send(request).await?;
        let page: ImagePage = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("failed to parse file list: {}", e)))?;

        debug!(
            count = page.files.len(),
            more = page.next_page_token.is_some(),
            "listed drive images"
        );
        Ok(page)
    }

    /// Lists every image in `folder_id`, following continuation tokens.
    ///
    /// Stops early if Drive hands back a token it already gave.
    pub async fn list_all_images(&self, folder_id: &str) -> ProviderResult<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_images(folder_id, page_token.as_deref(), IMPORT_PAGE_SIZE)
                .await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    warn!(page_token = %token, "drive repeated a page token, stopping");
                    break;
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    /// Creates an image file in `folder_id`.
    ///
    /// Sharing is a separate call ([`grant_public_read`](Self::grant_public_read))
    /// so a retried grant targets the file created here.
    pub async fn upload_image(
        &self,
        folder_id: &str,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> ProviderResult<DriveFile> {
        let metadata = serde_json::json!({
            "name": file_name,
            "parents": [folder_id],
            "mimeType": mime_type,
        });
        let boundary = multipart_boundary();
        let body = multipart_related_body(&boundary, &metadata, mime_type, bytes);

        let url = format!("{}/upload/drive/v3/files", self.upload_base);
        let request = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id,name,mimeType"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);

        let response = send(request).await?;
        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("failed to parse upload: {}", e)))?;

        info!(file_id = %file.id, size = bytes.len(), "uploaded image to drive");
        Ok(file)
    }

    /// Grants anyone-with-the-link read access to `file_id`.
    pub async fn grant_public_read(&self, file_id: &str) -> ProviderResult<()> {
        let url = format!(
            "{}/drive/v3/files/{}/permissions",
            self.api_base,
            url_path_segment(file_id)
        );
        let request = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("supportsAllDrives", "true")])
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }));

        send(request).await?;
        debug!(file_id, "granted public read");
        Ok(())
    }
}

/// Sends a request and maps transport failures and error statuses.
async fn send(request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_transport(e).with_provider("drive"))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let err = match status {
        reqwest::StatusCode::UNAUTHORIZED => {
            ProviderError::authentication("access token expired or invalid")
        }
        reqwest::StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::authorization(format!("access denied: {}", body))
        }
        reqwest::StatusCode::NOT_FOUND => ProviderError::not_found("file or folder not found"),
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            ProviderError::rate_limited(format!(
                "rate limit exceeded{}",
                retry_after
                    .map(|s| format!(", retry after {} seconds", s))
                    .unwrap_or_default()
            ))
        }
        reqwest::StatusCode::BAD_REQUEST => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::bad_request(format!("bad request: {}", body))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::server(format!("API error ({}): {}", status, body))
        }
    };
    Err(err.with_provider("drive"))
}

/// Drive search query for non-trashed images directly inside a folder.
fn image_query(folder_id: &str) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents and mimeType contains 'image/' and trashed = false")
}

fn url_path_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

fn multipart_boundary() -> String {
    let mut rng = rand::rng();
    format!("lifehub-{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}

/// Builds a `multipart/related` body: JSON metadata, then the media bytes.
fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::google::config::{GoogleEndpoints, OAuthCredentials};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn drive_for(server: &MockServer) -> DriveClient {
        let config = GoogleConfig::new(OAuthCredentials::new(
            "test-client.apps.googleusercontent.com",
            "test-secret",
        ))
        .with_endpoints(GoogleEndpoints::with_base(&server.base_url()))
        .with_timeout(Duration::from_secs(2));
        let http = config.http_client().unwrap();
        DriveClient::new(&config, http).authorized("A1")
    }

    #[test]
    fn query_escapes_folder_id() {
        assert_eq!(
            image_query("F1"),
            "'F1' in parents and mimeType contains 'image/' and trashed = false"
        );
        assert!(image_query("it's").starts_with("'it\\'s' in parents"));
    }

    #[test]
    fn multipart_body_layout() {
        let metadata = serde_json::json!({ "name": "a.jpg" });
        let body = multipart_related_body("B", &metadata, "image/jpeg", b"JPEG");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--B\r\nContent-Type: application/json"));
        assert!(text.contains("{\"name\":\"a.jpg\"}"));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\nJPEG\r\n--B--\r\n"));
    }

    #[test]
    fn debug_hides_access_token() {
        let config = GoogleConfig::new(OAuthCredentials::new("id", "secret"));
        let drive = DriveClient::new(&config, reqwest::Client::new()).authorized("ya29.secret");
        assert!(!format!("{:?}", drive).contains("ya29.secret"));
    }

    #[tokio::test]
    async fn list_images_sends_folder_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .header("authorization", "Bearer A1")
                    .query_param(
                        "q",
                        "'F' in parents and mimeType contains 'image/' and trashed = false",
                    )
                    .query_param("pageSize", "30")
                    .query_param("pageToken", "P1")
                    .query_param("supportsAllDrives", "true");
                then.status(200).json_body(serde_json::json!({
                    "files": [{ "id": "1", "name": "x.jpg" }],
                    "nextPageToken": "P2"
                }));
            })
            .await;

        let page = drive_for(&server)
            .list_images("F", Some("P1"), UI_PAGE_SIZE)
            .await
            .unwrap();

        assert_eq!(page.files, vec![DriveFile::new("1", "x.jpg")]);
        assert_eq!(page.next_page_token.as_deref(), Some("P2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn list_all_images_follows_pages() {
        let server = MockServer::start_async().await;
        // Earlier mocks win, so the continuation page is registered first.
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .query_param("pageToken", "P2");
                then.status(200).json_body(serde_json::json!({
                    "files": [{ "id": "2", "name": "b.jpg" }]
                }));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .query_param("pageSize", "1000");
                then.status(200).json_body(serde_json::json!({
                    "files": [{ "id": "1", "name": "a.jpg" }],
                    "nextPageToken": "P2"
                }));
            })
            .await;

        let files = drive_for(&server).list_all_images("F").await.unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/drive/v3/files");
                then.status(401);
            })
            .await;

        let err = drive_for(&server)
            .list_images("F", None, UI_PAGE_SIZE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthenticationFailed);
        assert_eq!(err.provider(), Some("drive"));
    }

    #[tokio::test]
    async fn not_found_and_rate_limit_codes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .query_param("pageToken", "gone");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .query_param("pageToken", "busy");
                then.status(429).header("Retry-After", "7");
            })
            .await;

        let drive = drive_for(&server);
        let err = drive.list_images("F", Some("gone"), 30).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NotFound);

        let err = drive.list_images("F", Some("busy"), 30).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RateLimited);
        assert!(err.message().contains("7 seconds"));
    }

    #[tokio::test]
    async fn list_all_images_stops_on_repeated_token() {
        let server = MockServer::start_async().await;
        let looping = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/drive/v3/files")
                    .query_param("pageToken", "P2");
                then.status(200).json_body(serde_json::json!({
                    "files": [{ "id": "2", "name": "b.jpg" }],
                    "nextPageToken": "P2"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/drive/v3/files");
                then.status(200).json_body(serde_json::json!({
                    "files": [{ "id": "1", "name": "a.jpg" }],
                    "nextPageToken": "P2"
                }));
            })
            .await;

        let files = drive_for(&server).list_all_images("F").await.unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        looping.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn upload_creates_file_only() {
        let server = MockServer::start_async().await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/upload/drive/v3/files")
                    .query_param("uploadType", "multipart")
                    .header_exists("content-type")
                    .body_contains("\"parents\":[\"F\"]")
                    .body_contains("PIXELS");
                then.status(200).json_body(serde_json::json!({
                    "id": "new-id",
                    "name": "a.jpg",
                    "mimeType": "image/jpeg"
                }));
            })
            .await;
        let permission = server
            .mock_async(|when, then| {
                when.method(POST).path("/drive/v3/files/new-id/permissions");
                then.status(200);
            })
            .await;

        let file = drive_for(&server)
            .upload_image("F", "a.jpg", "image/jpeg", b"PIXELS")
            .await
            .unwrap();

        assert_eq!(file.id, "new-id");
        assert_eq!(file.mime_type.as_deref(), Some("image/jpeg"));
        upload.assert_async().await;
        permission.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn grant_public_read_adds_anyone_reader() {
        let server = MockServer::start_async().await;
        let permission = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/drive/v3/files/new-id/permissions")
                    .header("authorization", "Bearer A1")
                    .json_body(serde_json::json!({ "role": "reader", "type": "anyone" }));
                then.status(200).json_body(serde_json::json!({ "id": "anyoneWithLink" }));
            })
            .await;

        drive_for(&server).grant_public_read("new-id").await.unwrap();
        permission.assert_async().await;
    }

    #[tokio::test]
    async fn failed_grant_reports_server_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/drive/v3/files/new-id/permissions");
                then.status(500).body("backend error");
            })
            .await;

        let err = drive_for(&server)
            .grant_public_read("new-id")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ServerError);
    }
}
