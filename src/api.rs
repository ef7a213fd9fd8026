use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{EventKind, LogSet, OwnerRef, RawEventLog};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid API configuration: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },
    #[error("malformed response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend location and request limits, passed to the client explicitly.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| FetchError::Config(format!("{base_url:?}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(FetchError::Config(format!(
                "{base_url} must use http or https"
            )));
        }
        Ok(Self { base_url, timeout })
    }
}

pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// `{base}/{owner plural}/{owner id}/{kind plural}`, e.g. `/vendors/42/visits`.
    pub fn endpoint(&self, owner: &OwnerRef, kind: EventKind) -> Result<Url, FetchError> {
        let mut url = self.config.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                FetchError::Config(format!("{} cannot be a base URL", self.config.base_url))
            })?;
            segments
                .pop_if_empty()
                .extend([owner.kind.plural(), owner.id.as_str(), kind.plural()]);
        }
        Ok(url)
    }

    pub async fn fetch_logs(
        &self,
        owner: &OwnerRef,
        kind: EventKind,
    ) -> Result<Vec<RawEventLog>, FetchError> {
        let url = self.endpoint(owner, kind)?;
        debug!(%url, "fetching event logs");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        let logs: Vec<RawEventLog> =
            serde_json::from_slice(&body).map_err(|source| FetchError::Body {
                url: url.to_string(),
                source,
            })?;
        debug!(%url, count = logs.len(), "fetched event logs");
        Ok(logs)
    }
}

/// Ties in-flight work to the lifetime of one view. Once the scope is
/// cancelled or dropped, pending futures are dropped and their results are
/// never delivered.
#[derive(Debug)]
pub struct ViewScope {
    id: Uuid,
    token: CancellationToken,
}

impl ViewScope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Nested scope, cancelled together with its parent.
    pub fn child(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: self.token.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle that cancels this scope from another task.
    pub fn canceller(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run<F: Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(view = %self.id, "view torn down, discarding pending work");
                None
            }
            output = work => Some(output),
        }
    }
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Fetches every event kind for `owner` concurrently. Returns `Ok(None)` when
/// the scope is torn down first. A kind that fails is marked unavailable; the
/// call only fails when no kind could be fetched.
#[instrument(skip_all, fields(view = %scope.id(), owner = %owner))]
pub async fn fetch_log_set(
    client: &ApiClient,
    scope: &ViewScope,
    owner: &OwnerRef,
) -> Result<Option<LogSet>, FetchError> {
    if scope.is_cancelled() {
        info!("view already torn down, skipping fetch");
        return Ok(None);
    }

    let fetched = scope
        .run(async {
            tokio::join!(
                client.fetch_logs(owner, EventKind::Visit),
                client.fetch_logs(owner, EventKind::Review),
                client.fetch_logs(owner, EventKind::Click),
                client.fetch_logs(owner, EventKind::Mention),
            )
        })
        .await;

    let Some((visits, reviews, clicks, mentions)) = fetched else {
        info!("fetch cancelled");
        return Ok(None);
    };

    let mut logs = LogSet::default();
    let mut first_error = None;
    for (kind, result) in [
        (EventKind::Visit, visits),
        (EventKind::Review, reviews),
        (EventKind::Click, clicks),
        (EventKind::Mention, mentions),
    ] {
        match result {
            Ok(raw) => logs.absorb(kind, raw),
            Err(err) => {
                warn!(kind = %kind, error = %err, "event logs unavailable");
                logs.mark_unavailable(kind, err.to_string());
                first_error.get_or_insert(err);
            }
        }
    }

    if logs.unavailable.len() == EventKind::ALL.len() {
        if let Some(err) = first_error {
            return Err(err);
        }
    }

    info!(
        records = logs.records.len(),
        rejected = logs.rejections.len(),
        "event logs loaded"
    );
    Ok(Some(logs))
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid row at line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: csv::Error,
    },
}

/// Offline source: a CSV export with `kind,timestamp,rating` columns.
pub fn load_csv(path: &Path) -> Result<LogSet, ImportError> {
    let reader = csv::Reader::from_path(path).map_err(|source| ImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let logs = read_csv(reader)?;
    info!(
        path = %path.display(),
        records = logs.records.len(),
        rejected = logs.rejections.len(),
        "event logs imported"
    );
    Ok(logs)
}

pub fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<LogSet, ImportError> {
    #[derive(Deserialize)]
    struct CsvRow {
        kind: EventKind,
        timestamp: Option<String>,
        rating: Option<f64>,
    }

    let mut grouped: BTreeMap<EventKind, Vec<RawEventLog>> = BTreeMap::new();
    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(|source| ImportError::Row {
            line: source.position().map_or(0, |pos| pos.line()),
            source,
        })?;
        grouped.entry(row.kind).or_default().push(RawEventLog {
            timestamp: row.timestamp,
            rating: row.rating,
            ..Default::default()
        });
    }

    let mut logs = LogSet::default();
    for (kind, raw) in grouped {
        logs.absorb(kind, raw);
    }
    Ok(logs)
}
