use super::session::Stage;
use crate::archive::ExtractProgress;
use crate::content::ReconcileReport;
use crate::download::DownloadProgress;
use crate::fileops::{CopyProgress, DeleteProgress};
use crate::probe::HashProgress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything a front-end needs to render an update session.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    StageChanged(Stage),
    /// A line for the status bar.
    Status(String),
    Progress {
        current: u64,
        total: u64,
        bytes_per_sec: Option<u64>,
        detail: String,
    },
    ContentCarried(ReconcileReport),
}

/// Conversion of a primitive's progress report into an engine event.
pub(crate) trait IntoUpdateEvent: Send + 'static {
    fn into_event(self) -> Option<UpdateEvent>;
}

impl IntoUpdateEvent for DownloadProgress {
    fn into_event(self) -> Option<UpdateEvent> {
        match self {
            DownloadProgress::Started { total_bytes } => Some(UpdateEvent::Progress {
                current: 0,
                total: total_bytes,
                bytes_per_sec: Some(0),
                detail: String::new(),
            }),
            DownloadProgress::Progress {
                downloaded,
                total,
                bytes_per_sec,
            } => Some(UpdateEvent::Progress {
                current: downloaded,
                total,
                bytes_per_sec: Some(bytes_per_sec),
                detail: String::new(),
            }),
            DownloadProgress::Redirected { url } => Some(UpdateEvent::Status(format!("Redirected to {}", url))),
            DownloadProgress::Completed | DownloadProgress::Cancelled => None,
        }
    }
}

impl IntoUpdateEvent for ExtractProgress {
    fn into_event(self) -> Option<UpdateEvent> {
        match self {
            ExtractProgress::Started { total_entries } => Some(UpdateEvent::Progress {
                current: 0,
                total: total_entries,
                bytes_per_sec: None,
                detail: String::new(),
            }),
            ExtractProgress::Progress {
                extracted,
                total,
                current_file,
            } => Some(UpdateEvent::Progress {
                current: extracted,
                total,
                bytes_per_sec: None,
                detail: current_file,
            }),
            ExtractProgress::Completed | ExtractProgress::Cancelled => None,
        }
    }
}

impl IntoUpdateEvent for CopyProgress {
    fn into_event(self) -> Option<UpdateEvent> {
        match self {
            CopyProgress::Started { total_bytes, .. } => Some(UpdateEvent::Progress {
                current: 0,
                total: total_bytes,
                bytes_per_sec: Some(0),
                detail: String::new(),
            }),
            CopyProgress::Progress {
                copied_bytes,
                total_bytes,
                bytes_per_sec,
                current_file,
                ..
            } => Some(UpdateEvent::Progress {
                current: copied_bytes,
                total: total_bytes,
                bytes_per_sec: Some(bytes_per_sec),
                detail: current_file,
            }),
            CopyProgress::Counting | CopyProgress::Completed | CopyProgress::Aborted => None,
        }
    }
}

impl IntoUpdateEvent for DeleteProgress {
    fn into_event(self) -> Option<UpdateEvent> {
        match self {
            DeleteProgress::Started { total_files, .. } => Some(UpdateEvent::Progress {
                current: 0,
                total: total_files,
                bytes_per_sec: None,
                detail: String::new(),
            }),
            DeleteProgress::Progress {
                deleted_files,
                total_files,
                current,
            } => Some(UpdateEvent::Progress {
                current: deleted_files,
                total: total_files,
                bytes_per_sec: None,
                detail: current,
            }),
            DeleteProgress::Analysing | DeleteProgress::Completed | DeleteProgress::Aborted => None,
        }
    }
}

impl IntoUpdateEvent for HashProgress {
    fn into_event(self) -> Option<UpdateEvent> {
        match self {
            HashProgress::Started { total_bytes } => Some(UpdateEvent::Progress {
                current: 0,
                total: total_bytes,
                bytes_per_sec: None,
                detail: String::new(),
            }),
            HashProgress::Progress { hashed, total } => Some(UpdateEvent::Progress {
                current: hashed,
                total,
                bytes_per_sec: None,
                detail: String::new(),
            }),
            HashProgress::Completed | HashProgress::Cancelled => None,
        }
    }
}

/// Spawn a task relaying one primitive's progress into the event stream.
/// The task ends when the returned sender (and its clones) are dropped.
pub(crate) fn forward<P: IntoUpdateEvent>(
    events: &mpsc::UnboundedSender<UpdateEvent>,
) -> (mpsc::UnboundedSender<P>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<P>();
    let events = events.clone();
    let handle = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if let Some(event) = progress.into_event() {
                let _ = events.send(event);
            }
        }
    });
    (tx, handle)
}
