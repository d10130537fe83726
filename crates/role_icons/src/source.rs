//! Where role documents come from.
//!
//! A fetch never blocks the tick: [`RoleDocumentSource::request`] starts it and a
//! later [`RoleDocumentSource::poll`] picks up the result. While a fetch is in
//! flight the binder keeps using its current table.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, TryRecvError};
use tracing::{debug, warn};

use crate::error::FetchError;

const LOG_SOURCE: &str = "role_icons::source";

pub type FetchResult = Result<String, FetchError>;

pub trait RoleDocumentSource: Send + Sync + 'static {
    /// Starts a fetch. Ignored while one is still in flight.
    fn request(&mut self);

    /// Result of a finished fetch, at most once per request.
    fn poll(&mut self) -> Option<FetchResult>;

    /// Human readable origin for logs.
    fn describe(&self) -> String;
}

/// One fetch running on a worker thread.
#[derive(Debug, Default)]
struct BackgroundFetch {
    pending: Option<Receiver<FetchResult>>,
    /// A fetch that failed before a worker could run, reported on the next poll.
    failed: Option<FetchError>,
}

impl BackgroundFetch {
    fn in_flight(&self) -> bool {
        self.pending.is_some() || self.failed.is_some()
    }

    fn start<J>(&mut self, job: J)
    where
        J: FnOnce() -> FetchResult + Send + 'static,
    {
        if self.in_flight() {
            debug!(target: LOG_SOURCE, "Fetch already in flight, not starting another");
            return;
        }
        let (tx, rx) = channel::bounded(1);
        let spawned = thread::Builder::new()
            .name("role-document-fetch".into())
            .spawn(move || {
                // The receiver may be gone if the source was dropped meanwhile.
                let _ = tx.send(job());
            })
            .map(|_| rx);
        self.launched(spawned);
    }

    fn launched(&mut self, spawned: io::Result<Receiver<FetchResult>>) {
        match spawned {
            Ok(rx) => self.pending = Some(rx),
            Err(err) => {
                warn!(target: LOG_SOURCE, "Could not spawn fetch worker: {}", err);
                self.failed = Some(FetchError::Other(format!(
                    "could not spawn fetch worker: {err}"
                )));
            }
        }
    }

    fn poll(&mut self) -> Option<FetchResult> {
        if let Some(err) = self.failed.take() {
            return Some(Err(err));
        }
        let rx = self.pending.as_ref()?;
        match rx.try_recv() {
            Ok(result) => {
                self.pending = None;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                Some(Err(FetchError::WorkerGone))
            }
        }
    }
}

/// Reads the document from a local file.
#[derive(Debug)]
pub struct FileRoleSource {
    path: PathBuf,
    fetch: BackgroundFetch,
}

impl FileRoleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fetch: BackgroundFetch::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RoleDocumentSource for FileRoleSource {
    fn request(&mut self) {
        let path = self.path.clone();
        self.fetch.start(move || {
            std::fs::read_to_string(&path).map_err(|source| FetchError::Io { path, source })
        });
    }

    fn poll(&mut self) -> Option<FetchResult> {
        self.fetch.poll()
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Downloads the document over HTTP(S).
#[derive(Debug)]
pub struct HttpRoleSource {
    url: String,
    client: reqwest::blocking::Client,
    fetch: BackgroundFetch,
}

impl HttpRoleSource {
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            fetch: BackgroundFetch::default(),
        })
    }
}

impl RoleDocumentSource for HttpRoleSource {
    fn request(&mut self) {
        let client = self.client.clone();
        let url = self.url.clone();
        self.fetch.start(move || {
            let response = client.get(&url).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok(response.text()?)
        });
    }

    fn poll(&mut self) -> Option<FetchResult> {
        self.fetch.poll()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    scripted: VecDeque<Result<String, String>>,
    ready: VecDeque<FetchResult>,
    requests: usize,
}

/// In-memory source answering requests from a scripted queue.
///
/// Clones share the queue, so a handle can keep feeding documents after the
/// source was handed to the binder. A request with nothing scripted stays
/// unanswered.
#[derive(Debug, Clone, Default)]
pub struct QueuedRoleSource {
    shared: Arc<Mutex<QueueState>>,
}

impl QueuedRoleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next request with `document`.
    pub fn push_document(&self, document: impl Into<String>) {
        if let Ok(mut state) = self.shared.lock() {
            state.scripted.push_back(Ok(document.into()));
        }
    }

    /// Answers the next request with a transport failure.
    pub fn push_failure(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.shared.lock() {
            state.scripted.push_back(Err(reason.into()));
        }
    }

    /// Number of requests issued so far.
    pub fn requests(&self) -> usize {
        self.shared.lock().map(|state| state.requests).unwrap_or(0)
    }
}

impl RoleDocumentSource for QueuedRoleSource {
    fn request(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.requests += 1;
            if let Some(next) = state.scripted.pop_front() {
                state.ready.push_back(next.map_err(FetchError::Other));
            }
        }
    }

    fn poll(&mut self) -> Option<FetchResult> {
        self.shared.lock().ok()?.ready.pop_front()
    }

    fn describe(&self) -> String {
        "in-memory queue".into()
    }
}
