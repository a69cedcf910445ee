//! Catalog client (C2): authenticated HTTP access to the remote catalog
//! server's ROM/save/state/collection/device/firmware API (§4.1, §6).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::emulator::filename::parse_server_timestamp;
use crate::error::{AppError, AppResult};
use crate::models::{RomEntry, SaveRecord, TokenPair};

const JSON_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_TIMEOUT: Duration = Duration::from_secs(30);
const MULTIPART_TIMEOUT: Duration = Duration::from_secs(60);
const CHUNK_SIZE: u64 = 500;
const PAGES_PER_BATCH: usize = 2;
const MAX_CONCURRENT_REQUESTS: usize = 4;
const APPEND_BUFFER_SIZE: usize = 200;
const COUNT_CACHE_TTL: Duration = Duration::from_secs(30);

const ROM_FIELDS: &str = "id,name,fs_name,platform_name,platform_slug,files,multi";

/// What the client currently authenticates with.
#[derive(Debug, Clone)]
enum AuthState {
    None,
    /// An existing cookie/session the server already accepted (SSO case).
    /// `reqwest`'s cookie store tracks the actual cookie; this variant is a
    /// marker that the probe succeeded without credentials.
    Cookie,
    Basic { username: String, password: String },
    OAuth(TokenPair),
}

/// Outcome of the per-request authentication preamble.
enum AuthHeader {
    None,
    Basic(String, String),
    Bearer(String),
}

/// Authenticated client for one catalog server base URL.
pub struct CatalogClient {
    base_url: String,
    http: Client,
    auth: RwLock<AuthState>,
    count_cache: Mutex<Option<(u64, Instant)>>,
}

/// Progress reported during a paginated ROM fetch (§4.1).
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub pages_done: u64,
    pub total_pages: u64,
    pub items_so_far: u64,
    /// Present only on a per-batch callback invocation: the accumulated
    /// list so far, for progressive UI rendering.
    pub batch_snapshot: Option<Vec<RomEntry>>,
}

/// Outcome of a download call distinguishing the three ways it can end.
pub enum DownloadOutcome {
    Downloaded { bytes_written: u64 },
    Cancelled,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct RomsPage {
    items: Vec<RawRom>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct RawRom {
    id: i64,
    name: String,
    #[serde(default)]
    fs_name: Option<String>,
    #[serde(default)]
    platform_name: Option<String>,
    #[serde(default)]
    platform_slug: Option<String>,
    #[serde(default)]
    multi: bool,
    #[serde(default)]
    fs_size_bytes: Option<u64>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Deserialize)]
struct RomDetail {
    id: i64,
    name: String,
    #[serde(default)]
    fs_name: Option<String>,
    #[serde(default)]
    platform_name: Option<String>,
    #[serde(default)]
    platform_slug: Option<String>,
    #[serde(default)]
    multi: bool,
    #[serde(default)]
    fs_size_bytes: Option<u64>,
    #[serde(default)]
    user_saves: Vec<SaveRecord>,
    #[serde(default)]
    user_states: Vec<SaveRecord>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .user_agent(concat!("romm-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            auth: RwLock::new(AuthState::None),
            count_cache: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ---- Authentication (§4.1) ----

    /// Try, in order: an already-accepted session cookie, HTTP Basic, then
    /// the OAuth2 password grant. The first strategy whose probe request
    /// against `/api/roms?limit=1` succeeds wins.
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<()> {
        if self.probe_cookie_session().await {
            *self.auth.write().await = AuthState::Cookie;
            log::info!("catalog: authenticated via existing session cookie");
            return Ok(());
        }

        *self.auth.write().await = AuthState::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };
        if self.probe_authenticated().await {
            log::info!("catalog: authenticated via HTTP Basic");
            return Ok(());
        }

        *self.auth.write().await = AuthState::None;
        self.authenticate_oauth(username, password).await
    }

    async fn probe_cookie_session(&self) -> bool {
        let resp = self
            .http
            .get(self.url("/api/roms?limit=1"))
            .timeout(JSON_TIMEOUT)
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }

    async fn probe_authenticated(&self) -> bool {
        let header = self.auth_header().await;
        let mut req = self
            .http
            .get(self.url("/api/roms?limit=1"))
            .timeout(JSON_TIMEOUT);
        req = apply_auth(req, &header);
        matches!(req.send().await, Ok(r) if r.status().is_success())
    }

    async fn authenticate_oauth(&self, username: &str, password: &str) -> AppResult<()> {
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", "roms:read roms:write platforms:read saves:read saves:write states:read states:write"),
        ];
        let resp = self
            .http
            .post(self.url("/api/token"))
            .timeout(JSON_TIMEOUT)
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Auth(format!(
                "token request failed: {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp.json().await.map_err(AppError::Transport)?;
        let pair = TokenPair {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        };
        *self.auth.write().await = AuthState::OAuth(pair);
        log::info!("catalog: authenticated via OAuth2 password grant");
        Ok(())
    }

    /// Refresh the OAuth2 token if fewer than 300s remain before expiry.
    /// Called by every authenticated request's preamble; failure poisons
    /// the session (surfaces as "not authenticated" with no retry).
    async fn ensure_authenticated(&self) -> AppResult<()> {
        let needs_refresh = matches!(
            &*self.auth.read().await,
            AuthState::OAuth(pair) if pair.needs_refresh()
        );
        if !needs_refresh {
            return Ok(());
        }

        let refresh_token = match &*self.auth.read().await {
            AuthState::OAuth(pair) => pair.refresh_token.clone(),
            _ => return Ok(()),
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let resp = self
            .http
            .post(self.url("/api/token"))
            .timeout(JSON_TIMEOUT)
            .form(&form)
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            _ => {
                *self.auth.write().await = AuthState::None;
                return Err(AppError::Auth("token refresh failed".to_string()));
            }
        };

        match resp.json::<TokenResponse>().await {
            Ok(token) => {
                *self.auth.write().await = AuthState::OAuth(TokenPair {
                    access_token: token.access_token,
                    refresh_token: token.refresh_token,
                    token_type: token.token_type,
                    expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
                });
                Ok(())
            }
            Err(e) => {
                *self.auth.write().await = AuthState::None;
                Err(AppError::Transport(e))
            }
        }
    }

    async fn auth_header(&self) -> AuthHeader {
        match &*self.auth.read().await {
            AuthState::None | AuthState::Cookie => AuthHeader::None,
            AuthState::Basic { username, password } => {
                AuthHeader::Basic(username.clone(), password.clone())
            }
            AuthState::OAuth(pair) => AuthHeader::Bearer(pair.access_token.clone()),
        }
    }

    async fn authed_request(
        &self,
        builder: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
        path: &str,
    ) -> AppResult<reqwest::RequestBuilder> {
        self.ensure_authenticated()
            .await
            .map_err(|_| AppError::Auth("not authenticated".to_string()))?;
        let header = self.auth_header().await;
        Ok(apply_auth(builder(&self.http, &self.url(path)), &header))
    }

    // ---- Paginated ROM fetch (§4.1) ----

    /// A cheap, 30s-cached total-row-count probe.
    async fn rom_count(&self) -> AppResult<u64> {
        {
            let cache = self.count_cache.lock().await;
            if let Some((count, at)) = *cache {
                if at.elapsed() < COUNT_CACHE_TTL {
                    return Ok(count);
                }
            }
        }

        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                "/api/roms?limit=1&fields=id",
            )
            .await?;
        let resp = req.send().await?;
        let page: RomsPage = resp.json().await.map_err(AppError::Transport)?;
        let count = page.total.unwrap_or(page.items.len() as u64);

        *self.count_cache.lock().await = Some((count, Instant::now()));
        Ok(count)
    }

    /// A single filtered page, used when the caller supplies `updated_after`.
    pub async fn fetch_roms_updated_after(&self, since: DateTime<Utc>) -> AppResult<Vec<RomEntry>> {
        let path = format!(
            "/api/roms?fields={ROM_FIELDS}&updated_after={}",
            urlencoding::encode(&since.to_rfc3339())
        );
        let entries = self.fetch_one_page(&path).await.unwrap_or_default();
        Ok(entries)
    }

    async fn fetch_one_page(&self, path: &str) -> AppResult<Vec<RomEntry>> {
        let req = self
            .authed_request(|c, u| c.get(u).timeout(JSON_TIMEOUT), path)
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let page: RomsPage = resp.json().await.map_err(AppError::Transport)?;
        Ok(page.items.into_iter().map(raw_to_entry).collect())
    }

    /// Full paginated sync: chunks of 500, fetched 2 pages per batch with up
    /// to 4 concurrent requests; a 200-item append buffer streams results
    /// into the accumulated list; `on_progress` fires per page and per
    /// batch.
    pub async fn fetch_all_roms(
        &self,
        on_progress: impl Fn(FetchProgress) + Send + Sync + 'static,
    ) -> AppResult<Vec<RomEntry>> {
        let total = self.rom_count().await?;
        let total_pages = total.div_ceil(CHUNK_SIZE).max(1);

        let accumulated: Arc<Mutex<Vec<RomEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer: Arc<Mutex<Vec<RomEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let pages_done = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS));
        let on_progress = Arc::new(on_progress);

        let mut page_idx = 0u64;
        while page_idx < total_pages {
            let batch_end = (page_idx + PAGES_PER_BATCH as u64).min(total_pages);
            let mut handles = Vec::new();
            for p in page_idx..batch_end {
                let offset = p * CHUNK_SIZE;
                let sem = semaphore.clone();
                let pages_done = pages_done.clone();
                let buffer = buffer.clone();
                let accumulated = accumulated.clone();
                let on_progress = on_progress.clone();
                let path = format!(
                    "/api/roms?limit={CHUNK_SIZE}&offset={offset}&fields={ROM_FIELDS}"
                );
                handles.push(async move {
                    let _permit = sem.acquire().await;
                    let items = self.fetch_one_page(&path).await.unwrap_or_default();

                    let mut buf = buffer.lock().await;
                    buf.extend(items);
                    let to_flush = if buf.len() >= APPEND_BUFFER_SIZE {
                        std::mem::take(&mut *buf)
                    } else {
                        Vec::new()
                    };
                    drop(buf);

                    if !to_flush.is_empty() {
                        accumulated.lock().await.extend(to_flush);
                    }

                    let done = pages_done.fetch_add(1, Ordering::SeqCst) + 1;
                    let items_so_far = accumulated.lock().await.len() as u64
                        + buffer.lock().await.len() as u64;
                    on_progress(FetchProgress {
                        pages_done: done,
                        total_pages,
                        items_so_far,
                        batch_snapshot: None,
                    });
                });
            }
            futures_util::future::join_all(handles).await;

            // Flush any buffered remainder and fire the per-batch callback.
            let remainder = std::mem::take(&mut *buffer.lock().await);
            if !remainder.is_empty() {
                accumulated.lock().await.extend(remainder);
            }
            let snapshot = accumulated.lock().await.clone();
            on_progress(FetchProgress {
                pages_done: pages_done.load(Ordering::SeqCst),
                total_pages,
                items_so_far: snapshot.len() as u64,
                batch_snapshot: Some(snapshot),
            });

            page_idx = batch_end;
        }

        Ok(Arc::try_unwrap(accumulated)
            .map(Mutex::into_inner)
            .unwrap_or_default())
    }

    pub async fn get_rom(&self, rom_id: i64) -> AppResult<RomDetailOwned> {
        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                &format!("/api/roms/{rom_id}"),
            )
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "GET /api/roms/{rom_id} returned {}",
                resp.status()
            )));
        }
        let detail: RomDetail = resp.json().await.map_err(AppError::Transport)?;
        Ok(RomDetailOwned {
            entry: RomEntry {
                id: detail.id,
                name: detail.name,
                file_name: detail.fs_name.unwrap_or_default(),
                platform_name: detail.platform_name.unwrap_or_default(),
                platform_slug: detail.platform_slug.unwrap_or_default(),
                multi: detail.multi,
                file_size_bytes: detail.fs_size_bytes,
                is_downloaded: false,
                local_path: None,
                local_size: None,
                romm_data: detail.rest,
            },
            user_saves: detail.user_saves,
            user_states: detail.user_states,
        })
    }

    // ---- Devices (§4.1) ----

    pub async fn register_device(
        &self,
        name: &str,
        platform: &str,
        client: &str,
        client_version: &str,
        hostname: &str,
    ) -> AppResult<String> {
        let body = json!({
            "name": name,
            "platform": platform,
            "client": client,
            "client_version": client_version,
            "hostname": hostname,
            "allow_existing": true,
            "allow_duplicate": false,
        });
        let req = self
            .authed_request(
                |c, u| c.post(u).timeout(JSON_TIMEOUT).json(&body),
                "/api/devices",
            )
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "device registration failed: {}",
                resp.status()
            )));
        }
        #[derive(Deserialize)]
        struct DeviceResp {
            id: String,
        }
        let d: DeviceResp = resp.json().await.map_err(AppError::Transport)?;
        Ok(d.id)
    }

    pub async fn get_device(&self, device_id: &str) -> AppResult<crate::models::Device> {
        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                &format!("/api/devices/{device_id}"),
            )
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "GET /api/devices/{device_id} returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(AppError::Transport)
    }

    pub async fn update_device(&self, device_id: &str, updates: &serde_json::Value) -> AppResult<()> {
        let req = self
            .authed_request(
                |c, u| c.put(u).timeout(JSON_TIMEOUT).json(updates),
                &format!("/api/devices/{device_id}"),
            )
            .await?;
        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Protocol(format!(
                "device update failed: {}",
                resp.status()
            )))
        }
    }

    pub async fn delete_device(&self, device_id: &str) -> AppResult<()> {
        let req = self
            .authed_request(
                |c, u| c.delete(u).timeout(JSON_TIMEOUT),
                &format!("/api/devices/{device_id}"),
            )
            .await?;
        let resp = req.send().await?;
        // A 404 on delete is treated as success (already gone).
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(AppError::Protocol(format!(
                "device delete failed: {}",
                resp.status()
            )))
        }
    }

    // ---- Save/state download (§4.1) ----

    /// Steps 1-8 of §4.1's download algorithm for one save or state kind.
    /// `local_ext` is the local extension the record's `file_name` must end
    /// in to be considered (e.g. `.srm`/`.sav` for saves).
    pub async fn download_latest(
        &self,
        records: &[SaveRecord],
        save_kind: &str,
        local_exts: &[&str],
        device_id: Option<&str>,
        target: &Path,
    ) -> AppResult<DownloadOutcome> {
        let candidate = records
            .iter()
            .filter(|r| {
                local_exts
                    .iter()
                    .any(|ext| r.file_name.to_lowercase().ends_with(ext))
            })
            .max_by_key(|r| {
                r.updated_at
                    .as_deref()
                    .and_then(parse_server_timestamp)
                    .or_else(|| r.created_at.as_deref().and_then(parse_server_timestamp))
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(0)
            });

        let Some(record) = candidate else {
            return Ok(DownloadOutcome::Downloaded { bytes_written: 0 });
        };

        self.download_record(record, save_kind, device_id, target)
            .await
    }

    async fn download_record(
        &self,
        record: &SaveRecord,
        save_kind: &str,
        device_id: Option<&str>,
        target: &Path,
    ) -> AppResult<DownloadOutcome> {
        let mut used_fallback = false;
        let primary = match device_id {
            Some(id) => format!(
                "/api/{save_kind}/{}/content?device_id={id}&optimistic=true",
                record.id
            ),
            None => format!("/api/{save_kind}/{}/content", record.id),
        };

        let mut resp = self.stream_get(&primary).await?;

        if let Some(r) = &resp {
            if r.status() == StatusCode::NOT_FOUND && device_id.is_some() {
                // Retry without device scoping.
                let retry = format!("/api/{save_kind}/{}/content", record.id);
                resp = self.stream_get(&retry).await?;
            }
        }

        let resp = match resp {
            Some(r) if r.status().is_success() => r,
            _ => {
                // Persistent failure: fall back to the record's download_path.
                let Some(path) = &record.download_path else {
                    return Err(AppError::Protocol("no download_path fallback".to_string()));
                };
                used_fallback = true;
                self.http
                    .get(self.url(path))
                    .timeout(STREAM_TIMEOUT)
                    .send()
                    .await?
            }
        };

        if let Some(ct) = resp.headers().get(reqwest::header::CONTENT_TYPE) {
            if ct.to_str().unwrap_or_default().starts_with("text/html") {
                return Err(AppError::Protocol(
                    "server returned an HTML error page".to_string(),
                ));
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AppError::Transport)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(AppError::Protocol("downloaded file was empty".to_string()));
        }
        if let Some(expected) = record.file_size_bytes {
            let diff = written.abs_diff(expected);
            if diff > 1024 {
                log::warn!(
                    "download size mismatch for save/state {}: wrote {written}, server advertised {expected}",
                    record.id
                );
            }
        }
        tokio::fs::rename(&tmp, target).await?;

        if !used_fallback {
            let body = json!({ "device_id": device_id });
            let _ = self.mark_downloaded(save_kind, record.id, &body).await;
        }

        Ok(DownloadOutcome::Downloaded {
            bytes_written: written,
        })
    }

    async fn stream_get(&self, path: &str) -> AppResult<Option<reqwest::Response>> {
        let req = self
            .authed_request(|c, u| c.get(u).timeout(STREAM_TIMEOUT), path)
            .await?;
        Ok(req.send().await.ok())
    }

    async fn mark_downloaded(
        &self,
        save_kind: &str,
        id: i64,
        body: &serde_json::Value,
    ) -> AppResult<()> {
        let req = self
            .authed_request(
                |c, u| c.post(u).timeout(JSON_TIMEOUT).json(body),
                &format!("/api/{save_kind}/{id}/downloaded"),
            )
            .await?;
        req.send().await?;
        Ok(())
    }

    // ---- Save/state upload (§4.1) ----

    /// Upload a save or state file. `upload_file_name` is the
    /// timestamp-stamped variant computed by the caller
    /// (`emulator::filename::local_to_upload_filename`); for saves, callers
    /// should pass the previous server filename when one is known so the
    /// server's grouping is preserved.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_save_state(
        &self,
        save_kind: &str,
        field_name: &str,
        bytes: Vec<u8>,
        upload_file_name: &str,
        rom_id: i64,
        emulator: Option<&str>,
        device_id: Option<&str>,
        slot: Option<&str>,
        autocleanup: bool,
        autocleanup_limit: Option<u32>,
    ) -> AppResult<UploadOutcome> {
        let mut query = vec![format!("rom_id={rom_id}")];
        if let Some(e) = emulator {
            query.push(format!("emulator={}", urlencoding::encode(e)));
        }
        if let Some(d) = device_id {
            query.push(format!("device_id={d}"));
        }
        if let Some(s) = slot {
            query.push(format!("slot={s}"));
        }
        if autocleanup {
            query.push("autocleanup=true".to_string());
            if let Some(limit) = autocleanup_limit {
                query.push(format!("autocleanup_limit={limit}"));
            }
        }
        let path = format!("/api/{save_kind}?{}", query.join("&"));

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(upload_file_name.to_string());
        let form = reqwest::multipart::Form::new().part(field_name.to_string(), part);

        self.ensure_authenticated()
            .await
            .map_err(|_| AppError::Auth("not authenticated".to_string()))?;
        let header = self.auth_header().await;
        let req = apply_auth(
            self.http
                .post(self.url(&path))
                .timeout(MULTIPART_TIMEOUT)
                .multipart(form),
            &header,
        );
        let resp = req.send().await?;
        let status = resp.status();

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                #[derive(Deserialize)]
                struct UploadResp {
                    id: i64,
                }
                let parsed: UploadResp = resp.json().await.map_err(AppError::Transport)?;
                Ok(UploadOutcome::Success { id: parsed.id })
            }
            StatusCode::CONFLICT => {
                let body = resp.text().await.unwrap_or_default();
                Ok(UploadOutcome::Conflict(body))
            }
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                let body = resp.text().await.unwrap_or_default();
                Ok(UploadOutcome::Validation(body))
            }
            other => Err(AppError::Protocol(format!("upload returned {other}"))),
        }
    }

    /// The server filename of the most recent save record for a ROM, used
    /// to preserve the server's grouping on re-upload.
    pub fn previous_save_filename(records: &[SaveRecord]) -> Option<String> {
        records
            .iter()
            .max_by_key(|r| {
                r.updated_at
                    .as_deref()
                    .and_then(parse_server_timestamp)
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(0)
            })
            .map(|r| r.file_name.clone())
    }

    // ---- Screenshot linking (states only, §4.1) ----

    pub async fn upload_screenshot(
        &self,
        rom_id: i64,
        state_id: i64,
        bytes: Vec<u8>,
        upload_file_name: &str,
    ) -> AppResult<i64> {
        let path = format!("/api/screenshots?rom_id={rom_id}&state_id={state_id}");
        let part =
            reqwest::multipart::Part::bytes(bytes).file_name(upload_file_name.to_string());
        let form = reqwest::multipart::Form::new().part("screenshotFile", part);

        self.ensure_authenticated()
            .await
            .map_err(|_| AppError::Auth("not authenticated".to_string()))?;
        let header = self.auth_header().await;
        let req = apply_auth(
            self.http
                .post(self.url(&path))
                .timeout(MULTIPART_TIMEOUT)
                .multipart(form),
            &header,
        );
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "screenshot upload returned {}",
                resp.status()
            )));
        }
        #[derive(Deserialize)]
        struct ScreenshotResp {
            id: i64,
        }
        let parsed: ScreenshotResp = resp.json().await.map_err(AppError::Transport)?;
        Ok(parsed.id)
    }

    /// Re-fetch `/api/states/{id}` and compare `screenshot.id` to verify the
    /// link actually took.
    pub async fn verify_screenshot_link(&self, state_id: i64, screenshot_id: i64) -> AppResult<bool> {
        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                &format!("/api/states/{state_id}"),
            )
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let record: SaveRecord = resp.json().await.map_err(AppError::Transport)?;
        Ok(record
            .screenshot
            .map(|s| s.id == screenshot_id)
            .unwrap_or(false))
    }

    /// Explicit link fallback when verification fails: tries the three
    /// endpoints documented in §4.1 in order, stopping at the first success.
    pub async fn link_screenshot_explicit(
        &self,
        state_id: i64,
        screenshot_id: i64,
    ) -> AppResult<()> {
        let body = json!({ "screenshot_id": screenshot_id });
        let attempts: [(reqwest::Method, String); 3] = [
            (reqwest::Method::PATCH, format!("/api/states/{state_id}")),
            (
                reqwest::Method::PATCH,
                format!("/api/screenshots/{screenshot_id}"),
            ),
            (
                reqwest::Method::POST,
                format!("/api/states/{state_id}/screenshot"),
            ),
        ];
        for (method, path) in attempts {
            self.ensure_authenticated()
                .await
                .map_err(|_| AppError::Auth("not authenticated".to_string()))?;
            let header = self.auth_header().await;
            let req = apply_auth(
                self.http
                    .request(method, self.url(&path))
                    .timeout(JSON_TIMEOUT)
                    .json(&body),
                &header,
            );
            if let Ok(resp) = req.send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
        }
        Err(AppError::Protocol(
            "all explicit screenshot-link endpoints failed".to_string(),
        ))
    }

    /// `POST /api/{saves|states}/{id}/track|untrack` (§6): mark a record as
    /// one this device is deliberately following, independent of the
    /// `downloaded` bookkeeping `mark_downloaded` performs.
    pub async fn set_tracked(
        &self,
        save_kind: &str,
        id: i64,
        device_id: &str,
        tracked: bool,
    ) -> AppResult<()> {
        let verb = if tracked { "track" } else { "untrack" };
        let body = json!({ "device_id": device_id });
        let req = self
            .authed_request(
                |c, u| c.post(u).timeout(JSON_TIMEOUT).json(&body),
                &format!("/api/{save_kind}/{id}/{verb}"),
            )
            .await?;
        req.send().await?;
        Ok(())
    }

    /// `GET /api/{saves|states}/summary?rom_id` (§6): per-ROM save/state
    /// counts, used by the front-end summary view rather than the sync
    /// engine itself.
    pub async fn get_saves_summary(&self, save_kind: &str, rom_id: i64) -> AppResult<serde_json::Value> {
        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                &format!("/api/{save_kind}/summary?rom_id={rom_id}"),
            )
            .await?;
        let resp = req.send().await?;
        resp.json().await.map_err(AppError::Transport)
    }

    // ---- Collections (§4.1, §4.5) ----

    pub async fn get_collections(&self) -> AppResult<Vec<crate::models::CollectionSummary>> {
        let req = self
            .authed_request(|c, u| c.get(u).timeout(JSON_TIMEOUT), "/api/collections")
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "GET /api/collections returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(AppError::Transport)
    }

    /// ROMs currently in a collection, field-restricted the same way the
    /// full catalog fetch is (§4.1, §4.5); collections are expected to be
    /// small relative to the full catalog so one page is sufficient.
    pub async fn get_collection_roms(&self, collection_id: i64) -> AppResult<Vec<RomEntry>> {
        let path =
            format!("/api/roms?collection_id={collection_id}&fields={ROM_FIELDS}&limit=10000");
        self.fetch_one_page(&path).await
    }

    /// ROM IDs currently in a collection.
    pub async fn get_collection_rom_ids(&self, collection_id: i64) -> AppResult<Vec<i64>> {
        Ok(self
            .get_collection_roms(collection_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    // ---- Firmware (§4.1) ----

    pub async fn get_platform_id(&self, slug: &str) -> AppResult<Option<i64>> {
        #[derive(Deserialize)]
        struct PlatformRow {
            id: i64,
            slug: String,
        }
        let req = self
            .authed_request(|c, u| c.get(u).timeout(JSON_TIMEOUT), "/api/platforms")
            .await?;
        let resp = req.send().await?;
        let rows: Vec<PlatformRow> = resp.json().await.map_err(AppError::Transport)?;
        Ok(rows.into_iter().find(|r| r.slug == slug).map(|r| r.id))
    }

    pub async fn get_firmware_list(&self, platform_id: i64) -> AppResult<Vec<FirmwareEntry>> {
        let req = self
            .authed_request(
                |c, u| c.get(u).timeout(JSON_TIMEOUT),
                &format!("/api/firmware?platform_id={platform_id}"),
            )
            .await?;
        let resp = req.send().await?;
        resp.json().await.map_err(AppError::Transport)
    }

    pub async fn download_firmware(
        &self,
        firmware_id: i64,
        file_name: &str,
        target: &Path,
    ) -> AppResult<()> {
        let path = format!("/api/firmware/{firmware_id}/content/{file_name}");
        let req = self
            .authed_request(|c, u| c.get(u).timeout(STREAM_TIMEOUT), &path)
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "firmware download returned {}",
                resp.status()
            )));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = resp.bytes().await.map_err(AppError::Transport)?;
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }

    /// Stream a ROM's content (possibly a multi-file archive) to `target`,
    /// invoking `on_chunk(bytes_written, total)` per chunk for live
    /// per-collection progress and polling `cancel` between chunks. A
    /// cancellation leaves the partial file on disk and returns
    /// `DownloadOutcome::Cancelled` (§5).
    pub async fn download_rom_content(
        &self,
        rom_id: i64,
        file_name: &str,
        target: &Path,
        mut on_chunk: impl FnMut(u64, Option<u64>) + Send,
        mut cancel: impl FnMut() -> bool + Send,
    ) -> AppResult<DownloadOutcome> {
        let path = format!("/api/roms/{rom_id}/content/{}", urlencoding::encode(file_name));
        let req = self
            .authed_request(|c, u| c.get(u).timeout(STREAM_TIMEOUT), &path)
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "ROM content download returned {}",
                resp.status()
            )));
        }
        let total = resp.content_length();

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            if cancel() {
                return Ok(DownloadOutcome::Cancelled);
            }
            let chunk = chunk.map_err(AppError::Transport)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(written, total);
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, target).await?;
        Ok(DownloadOutcome::Downloaded {
            bytes_written: written,
        })
    }

    /// Download an arbitrary server-relative path (a record's `download_path`
    /// fallback, or a screenshot's `download_path`) straight to `target`.
    /// Used where the caller already knows the exact URL rather than
    /// composing one from an ID (§4.1 step 5 fallback; screenshot pairing).
    pub async fn download_by_path(&self, path: &str, target: &Path) -> AppResult<()> {
        let req = self
            .authed_request(|c, u| c.get(u).timeout(STREAM_TIMEOUT), path)
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Protocol(format!(
                "GET {path} returned {}",
                resp.status()
            )));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = resp.bytes().await.map_err(AppError::Transport)?;
        if bytes.is_empty() {
            return Err(AppError::Protocol("downloaded file was empty".to_string()));
        }
        let tmp = target.with_extension("part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, target).await?;
        Ok(())
    }

    /// Device-scoped optimistic-sync query: does this record already show
    /// as synced for `device_id`? Used by the reconciler's optimistic skip
    /// (§4.4.5) in addition to the record's own `device_syncs` field.
    pub async fn device_has_synced(
        &self,
        save_kind: &str,
        rom_id: i64,
        device_id: &str,
    ) -> AppResult<bool> {
        let path = format!("/api/{save_kind}?rom_id={rom_id}&device_id={device_id}");
        let req = self
            .authed_request(|c, u| c.get(u).timeout(JSON_TIMEOUT), &path)
            .await?;
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let records: Vec<SaveRecord> = resp.json().await.unwrap_or_default();
        Ok(!records.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareEntry {
    pub id: i64,
    pub file_name: String,
}

/// Outcome of an upload call.
#[derive(Debug)]
pub enum UploadOutcome {
    Success { id: i64 },
    Conflict(String),
    Validation(String),
}

pub struct RomDetailOwned {
    pub entry: RomEntry,
    pub user_saves: Vec<SaveRecord>,
    pub user_states: Vec<SaveRecord>,
}

fn raw_to_entry(raw: RawRom) -> RomEntry {
    RomEntry {
        id: raw.id,
        name: raw.name,
        file_name: raw.fs_name.unwrap_or_default(),
        platform_name: raw.platform_name.unwrap_or_default(),
        platform_slug: raw.platform_slug.unwrap_or_default(),
        multi: raw.multi,
        file_size_bytes: raw.fs_size_bytes,
        is_downloaded: false,
        local_path: None,
        local_size: None,
        romm_data: raw.rest,
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, header: &AuthHeader) -> reqwest::RequestBuilder {
    match header {
        AuthHeader::None => builder,
        AuthHeader::Basic(u, p) => builder.basic_auth(u, Some(p)),
        AuthHeader::Bearer(token) => builder.bearer_auth(token),
    }
}
