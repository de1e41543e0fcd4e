// crates/server/src/scan.rs
//! Library scan: walks media folders as a background job and announces
//! completion to SSE clients.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use reel_jobs::{JobContext, Task, TaskQueue};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &[
    "m4v", "mp4", "mov", "wmv", "avi", "mpg", "mpeg", "rmvb", "rm", "flv", "asf", "mkv", "webm",
];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif"];
const GALLERY_EXTENSIONS: &[&str] = &["zip", "cbz"];

/// Folders walked concurrently by one scan.
const SCAN_WORKERS: usize = 4;

/// Broadcasts "a scan just finished" to whoever is listening.
#[derive(Clone)]
pub struct ScanNotifier {
    tx: broadcast::Sender<()>,
}

impl ScanNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn notify_complete(&self) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for ScanNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Video,
    Image,
    Gallery,
}

impl MediaKind {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if GALLERY_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Gallery)
        } else {
            None
        }
    }
}

/// Media files found by a scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaCounts {
    pub videos: u64,
    pub images: u64,
    pub galleries: u64,
}

impl MediaCounts {
    fn add(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Video => self.videos += 1,
            MediaKind::Image => self.images += 1,
            MediaKind::Gallery => self.galleries += 1,
        }
    }

    fn merge(&mut self, other: MediaCounts) {
        self.videos += other.videos;
        self.images += other.images;
        self.galleries += other.galleries;
    }
}

/// Count media under `root`. Unreadable entries below the root are skipped;
/// an unreadable root is an error.
fn count_media(root: &Path, cancel: &CancellationToken) -> Result<MediaCounts, walkdir::Error> {
    let mut counts = MediaCounts::default();
    for entry in WalkDir::new(root).follow_links(true) {
        if cancel.is_cancelled() {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(kind) = MediaKind::from_path(entry.path()) {
            counts.add(kind);
        }
    }
    Ok(counts)
}

#[derive(Default)]
struct ScanTally {
    counts: MediaCounts,
    failed: Vec<PathBuf>,
}

/// Walks each library path as a sub-task and fires the scan notifier when
/// done.
pub struct ScanTask {
    paths: Vec<PathBuf>,
    notifier: ScanNotifier,
}

impl ScanTask {
    pub fn new(paths: Vec<PathBuf>, notifier: ScanNotifier) -> Self {
        Self { paths, notifier }
    }
}

#[async_trait]
impl Task for ScanTask {
    fn description(&self) -> String {
        "Scanning...".to_string()
    }

    async fn execute(self: Box<Self>, ctx: JobContext) -> anyhow::Result<()> {
        let ScanTask { paths, notifier } = *self;
        let path_count = paths.len();
        ctx.progress().set_total(path_count as u64);

        let tally = Arc::new(Mutex::new(ScanTally::default()));
        let queue = TaskQueue::new(&ctx, path_count, SCAN_WORKERS);
        for path in paths {
            let tally = Arc::clone(&tally);
            queue.add(format!("Scanning {}", path.display()), move |ctx| async move {
                let cancel = ctx.cancellation_token().clone();
                let root = path.clone();
                let result = tokio::task::spawn_blocking(move || count_media(&root, &cancel)).await;

                let mut tally = tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match result {
                    Ok(Ok(counts)) => tally.counts.merge(counts),
                    Ok(Err(e)) => {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot scan library path");
                        tally.failed.push(path);
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "Scan worker failed");
                        tally.failed.push(path);
                    }
                }
                drop(tally);
                ctx.progress().increment();
            });
        }
        queue.close().await;

        if ctx.is_cancelled() {
            return Ok(());
        }

        let tally = std::mem::take(&mut *tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        if path_count > 0 && tally.failed.len() == path_count {
            bail!("none of the {path_count} library paths could be read");
        }

        tracing::info!(
            job_id = ctx.job_id(),
            videos = tally.counts.videos,
            images = tally.counts.images,
            galleries = tally.counts.galleries,
            failed_paths = tally.failed.len(),
            "Scan complete"
        );
        notifier.notify_complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_jobs::{JobManager, JobStatus};
    use std::fs;
    use std::time::Duration;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_counts_media_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("nested/b.MKV"));
        touch(&dir.path().join("nested/deeper/c.jpg"));
        touch(&dir.path().join("d.cbz"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("no_extension"));

        let counts = count_media(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(
            counts,
            MediaCounts {
                videos: 2,
                images: 1,
                galleries: 1,
            }
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(count_media(&missing, &CancellationToken::new()).is_err());
    }

    #[tokio::test]
    async fn test_scan_job_finishes_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one/a.mp4"));
        touch(&dir.path().join("two/b.png"));

        let notifier = ScanNotifier::new();
        let mut completions = notifier.subscribe();
        let manager = JobManager::default();
        let task = ScanTask::new(
            vec![dir.path().join("one"), dir.path().join("two")],
            notifier.clone(),
        );
        let id = manager.run_single_task(task);

        let job = tokio::time::timeout(Duration::from_secs(5), manager.wait(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.description, "Scanning...");
        assert_eq!(job.progress(), Some(1.0));
        assert!(completions.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_scan_fails_when_no_path_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = ScanNotifier::new();
        let mut completions = notifier.subscribe();
        let manager = JobManager::default();
        let id = manager.run_single_task(ScanTask::new(
            vec![dir.path().join("missing")],
            notifier,
        ));

        let job = tokio::time::timeout(Duration::from_secs(5), manager.wait(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("could be read"));
        assert!(completions.try_recv().is_err());
    }
}
