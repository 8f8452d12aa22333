//! Screenshot pipeline orchestrator
//!
//! One task per detected file: settle delay, read, describe, sanitize, rename,
//! then optionally upload and copy the URL. Failures are contained per file:
//! they are logged with the file name and the loop keeps going. Nothing is
//! retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::ai::{Describer, ImagePayload};
use crate::error::{PipelineError, PipelineResult};
use crate::naming;
use crate::services::clipboard::Clipboard;
use crate::services::watcher::FileEvent;
use crate::upload::Uploader;

/// Fallback when the extension says nothing about the image type
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Injected pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wait between detection and the first read
    pub settle_delay: Duration,
    /// Upper bound on files processed at the same time
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            max_in_flight: 4,
        }
    }
}

/// What happened to a file that went through without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Name already carries the processed suffix; nothing was touched
    AlreadyProcessed,
    /// Renamed locally, upload disabled
    Renamed { path: PathBuf },
    /// Renamed and published
    Uploaded { path: PathBuf, url: String },
}

pub struct Pipeline {
    config: PipelineConfig,
    describer: Arc<dyn Describer>,
    uploader: Option<Arc<dyn Uploader>>,
    clipboard: Arc<dyn Clipboard>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        describer: Arc<dyn Describer>,
        uploader: Option<Arc<dyn Uploader>>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Self {
        Self {
            config,
            describer,
            uploader,
            clipboard,
        }
    }

    /// Consume events until the channel closes or `shutdown` resolves, then
    /// wait for the files already in flight.
    pub async fn run<F>(self: Arc<Self>, mut events: mpsc::Receiver<FileEvent>, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            // Take a slot before pulling the next event so a saturated loop
            // still notices shutdown and leaves queued events alone
            let permit = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("[Pipeline] Shutdown requested");
                    break;
                }
                acquired = Arc::clone(&permits).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("[Pipeline] Shutdown requested");
                    break;
                }
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        tracing::debug!("[Pipeline] Event channel closed");
                        break;
                    };

                    let pipeline = Arc::clone(&self);
                    let span = tracing::info_span!("file", id = %event.id, name = %event.file_name());
                    tasks.spawn(
                        async move {
                            let _permit = permit;
                            pipeline.handle(event).await
                        }
                        .instrument(span),
                    );
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                }
            }
        }

        if !tasks.is_empty() {
            tracing::info!("[Pipeline] Waiting for {} file(s) in flight", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }

    /// Error boundary for one event: never fails, logs instead
    pub async fn handle(&self, event: FileEvent) -> Option<Outcome> {
        let file_name = event.file_name();

        match self.on_file_created(&event).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("[Pipeline] Error processing {}: {}", file_name, e);
                None
            }
        }
    }

    /// Run every step for one newly created file
    pub async fn on_file_created(&self, event: &FileEvent) -> PipelineResult<Outcome> {
        let path = event.path.as_path();

        // Our own renames must not loop back through the pipeline
        if naming::is_processed(path) {
            tracing::debug!("[Pipeline] Skipping already processed {}", event.file_name());
            return Ok(Outcome::AlreadyProcessed);
        }

        tracing::info!("[Pipeline] New screenshot detected: {}", event.file_name());

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let payload = read_image(path).await?;
        let description = self.describer.describe(&payload).await?;
        drop(payload);

        let mut slug = naming::sanitize(&description);
        if slug.is_empty() {
            slug = naming::fallback_slug(event.detected_at);
            tracing::warn!(
                "[Pipeline] Description {:?} left no usable characters, using {}",
                description,
                slug
            );
        }

        tracing::info!("[Pipeline] Description: {:?}", description);

        let renamed = rename_in_place(path, &slug).await?;

        let Some(uploader) = &self.uploader else {
            return Ok(Outcome::Renamed { path: renamed });
        };

        tracing::info!("[Pipeline] Uploading {}", renamed.display());
        let url = uploader.upload(&renamed).await?;

        tracing::info!("[Pipeline] Uploaded: {}", url);
        println!("{}", url);

        // Clipboard helpers are child processes; keep them off the runtime threads
        let clipboard = Arc::clone(&self.clipboard);
        let text = url.clone();
        match tokio::task::spawn_blocking(move || clipboard.copy(&text)).await {
            Ok(Ok(())) => tracing::info!("[Pipeline] Copied URL to clipboard"),
            Ok(Err(e)) => tracing::warn!("[Pipeline] Could not copy URL: {}", e),
            Err(e) => tracing::warn!("[Pipeline] Could not copy URL: clipboard task failed: {}", e),
        }

        Ok(Outcome::Uploaded { path: renamed, url })
    }
}

fn log_join(joined: Result<Option<Outcome>, tokio::task::JoinError>) {
    match joined {
        Ok(Some(outcome)) => tracing::debug!("[Pipeline] Finished: {:?}", outcome),
        Ok(None) => {}
        Err(e) => tracing::error!("[Pipeline] Task failed: {}", e),
    }
}

/// Read the whole file after the settle window
async fn read_image(path: &Path) -> PipelineResult<ImagePayload> {
    let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    if bytes.is_empty() {
        return Err(PipelineError::EmptyFile(path.to_path_buf()));
    }

    let mime_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();

    Ok(ImagePayload { bytes, mime_type })
}

/// Move `path` to `<slug>-ss<ext>` in the same directory
async fn rename_in_place(path: &Path, slug: &str) -> PipelineResult<PathBuf> {
    let target = naming::renamed_path(path, slug);

    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return Err(PipelineError::RenameConflict { target });
    }

    tokio::fs::rename(path, &target)
        .await
        .map_err(|e| PipelineError::Rename {
            from: path.to_path_buf(),
            to: target.clone(),
            source: e,
        })?;

    tracing::info!(
        "[Pipeline] Renamed {} -> {}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        target.file_name().unwrap_or_default().to_string_lossy()
    );

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Returns a fixed description, or fails when `text` is None
    struct FakeDescriber {
        text: Option<String>,
        calls: AtomicUsize,
        seen_mime: Mutex<Vec<String>>,
    }

    impl FakeDescriber {
        fn new(text: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                text: text.map(str::to_string),
                calls: AtomicUsize::new(0),
                seen_mime: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Describer for FakeDescriber {
        async fn describe(&self, image: &ImagePayload) -> PipelineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_mime.lock().unwrap().push(image.mime_type.clone());
            self.text
                .clone()
                .ok_or_else(|| PipelineError::Inference("model unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeUploader {
        uploaded: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, path: &Path) -> PipelineResult<String> {
            if self.fail {
                return Err(PipelineError::Upload("connection refused".to_string()));
            }
            self.uploaded.lock().unwrap().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy();
            Ok(format!("https://example.dev/uploads/{}", name))
        }
    }

    #[derive(Default)]
    struct FakeClipboard {
        copied: Mutex<Vec<String>>,
        thread: Mutex<Option<ThreadId>>,
        fail: bool,
    }

    impl Clipboard for FakeClipboard {
        fn copy(&self, text: &str) -> PipelineResult<()> {
            *self.thread.lock().unwrap() = Some(std::thread::current().id());
            if self.fail {
                return Err(PipelineError::Clipboard("no display".to_string()));
            }
            self.copied.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Takes `delay` per call and tracks how many calls overlap
    struct SlowDescriber {
        delay: Duration,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowDescriber {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Describer for SlowDescriber {
        async fn describe(&self, _image: &ImagePayload) -> PipelineResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("file {}", n))
        }
    }

    /// Panics on images whose bytes are `boom`
    struct PanickyDescriber;

    #[async_trait]
    impl Describer for PanickyDescriber {
        async fn describe(&self, image: &ImagePayload) -> PipelineResult<String> {
            if image.bytes == b"boom" {
                panic!("describer bug");
            }
            Ok("Normal screen".to_string())
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            settle_delay: Duration::ZERO,
            max_in_flight: 2,
        }
    }

    fn screenshot(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\x89PNG fake image").unwrap();
        path
    }

    #[tokio::test]
    async fn test_renames_without_upload() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        let describer = FakeDescriber::new(Some("Error dialog box"));
        let pipeline = Pipeline::new(config(), describer.clone(), None, Arc::new(FakeClipboard::default()));

        let outcome = pipeline.on_file_created(&FileEvent::new(original.clone())).await.unwrap();

        let expected = dir.path().join("error-dialog-box-ss.png");
        assert_eq!(outcome, Outcome::Renamed { path: expected.clone() });
        assert!(expected.exists());
        assert!(!original.exists());
        assert_eq!(describer.seen_mime.lock().unwrap().as_slice(), ["image/png"]);
    }

    #[tokio::test]
    async fn test_uploads_and_copies_url() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "Screenshot 2024-05-01 at 10.00.00.png");
        let uploader = Arc::new(FakeUploader::default());
        let clipboard = Arc::new(FakeClipboard::default());
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("A login screen with email field")),
            Some(uploader.clone()),
            clipboard.clone(),
        );

        let outcome = pipeline.on_file_created(&FileEvent::new(original)).await.unwrap();

        let renamed = dir.path().join("a-login-screen-with-email-field-ss.png");
        let url = "https://example.dev/uploads/a-login-screen-with-email-field-ss.png".to_string();
        assert_eq!(outcome, Outcome::Uploaded { path: renamed.clone(), url: url.clone() });
        assert_eq!(uploader.uploaded.lock().unwrap().as_slice(), [renamed]);
        assert_eq!(clipboard.copied.lock().unwrap().as_slice(), [url]);
    }

    #[tokio::test]
    async fn test_processed_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = screenshot(&dir, "error-dialog-box-ss.png");
        let describer = FakeDescriber::new(Some("should not be used"));
        let uploader = Arc::new(FakeUploader::default());
        let pipeline = Pipeline::new(
            PipelineConfig {
                settle_delay: Duration::from_secs(60),
                max_in_flight: 1,
            },
            describer.clone(),
            Some(uploader.clone()),
            Arc::new(FakeClipboard::default()),
        );

        // Would hang on the settle delay if the guard did not return first
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.on_file_created(&FileEvent::new(path.clone())),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, Outcome::AlreadyProcessed);
        assert_eq!(describer.calls.load(Ordering::SeqCst), 0);
        assert!(uploader.uploaded.lock().unwrap().is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_inference_failure_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        let uploader = Arc::new(FakeUploader::default());
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(None),
            Some(uploader.clone()),
            Arc::new(FakeClipboard::default()),
        );

        let err = pipeline.on_file_created(&FileEvent::new(original.clone())).await.unwrap_err();

        assert!(matches!(err, PipelineError::Inference(_)));
        assert!(original.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_swallows_errors() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("anything")),
            None,
            Arc::new(FakeClipboard::default()),
        );

        let outcome = pipeline.handle(FileEvent::new(dir.path().join("vanished.png"))).await;

        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();
        let describer = FakeDescriber::new(Some("anything"));
        let pipeline = Pipeline::new(config(), describer.clone(), None, Arc::new(FakeClipboard::default()));

        let err = pipeline.on_file_created(&FileEvent::new(path)).await.unwrap_err();

        assert!(matches!(err, PipelineError::EmptyFile(_)));
        assert_eq!(describer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rename_conflict_skips_upload() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        screenshot(&dir, "error-dialog-box-ss.png");
        let uploader = Arc::new(FakeUploader::default());
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("Error dialog box")),
            Some(uploader.clone()),
            Arc::new(FakeClipboard::default()),
        );

        let err = pipeline.on_file_created(&FileEvent::new(original.clone())).await.unwrap_err();

        assert!(matches!(err, PipelineError::RenameConflict { .. }));
        assert!(original.exists());
        assert!(uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_local_rename() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.jpg");
        let clipboard = Arc::new(FakeClipboard::default());
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("Terminal output")),
            Some(Arc::new(FakeUploader { fail: true, ..Default::default() })),
            clipboard.clone(),
        );

        let err = pipeline.on_file_created(&FileEvent::new(original)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Upload(_)));
        assert!(dir.path().join("terminal-output-ss.jpg").exists());
        assert!(clipboard.copied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clipboard_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("Chart")),
            Some(Arc::new(FakeUploader::default())),
            Arc::new(FakeClipboard { fail: true, ..Default::default() }),
        );

        let outcome = pipeline.on_file_created(&FileEvent::new(original)).await.unwrap();

        assert!(matches!(outcome, Outcome::Uploaded { .. }));
    }

    #[tokio::test]
    async fn test_empty_slug_uses_timestamp() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        let event = FileEvent::new(original);
        let expected = dir
            .path()
            .join(format!("{}-ss.png", naming::fallback_slug(event.detected_at)));
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("?!...")),
            None,
            Arc::new(FakeClipboard::default()),
        );

        let outcome = pipeline.on_file_created(&event).await.unwrap();

        assert_eq!(outcome, Outcome::Renamed { path: expected });
    }

    #[tokio::test]
    async fn test_unknown_extension_falls_back_to_png() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "capture.shotdata");
        let describer = FakeDescriber::new(Some("Settings page"));
        let pipeline = Pipeline::new(config(), describer.clone(), None, Arc::new(FakeClipboard::default()));

        pipeline.on_file_created(&FileEvent::new(original)).await.unwrap();

        assert_eq!(describer.seen_mime.lock().unwrap().as_slice(), [DEFAULT_MIME_TYPE]);
        assert!(dir.path().join("settings-page-ss.shotdata").exists());
    }

    #[tokio::test]
    async fn test_run_processes_queue_until_closed() {
        let dir = TempDir::new().unwrap();
        let first = screenshot(&dir, "one.png");
        let second = screenshot(&dir, "two.gif");
        let already = screenshot(&dir, "done-ss.png");
        let describer = FakeDescriber::new(Some("Same words"));
        let pipeline = Arc::new(Pipeline::new(
            config(),
            describer.clone(),
            None,
            Arc::new(FakeClipboard::default()),
        ));

        let (tx, rx) = mpsc::channel(8);
        for path in [first, second, already] {
            tx.send(FileEvent::new(path)).await.unwrap();
        }
        drop(tx);

        pipeline.run(rx, std::future::pending()).await;

        assert_eq!(describer.calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("same-words-ss.png").exists());
        assert!(dir.path().join("same-words-ss.gif").exists());
        assert!(dir.path().join("done-ss.png").exists());
    }

    #[tokio::test]
    async fn test_clipboard_runs_off_the_async_thread() {
        let dir = TempDir::new().unwrap();
        let original = screenshot(&dir, "shot.png");
        let clipboard = Arc::new(FakeClipboard::default());
        let pipeline = Pipeline::new(
            config(),
            FakeDescriber::new(Some("Chart")),
            Some(Arc::new(FakeUploader::default())),
            clipboard.clone(),
        );

        pipeline.on_file_created(&FileEvent::new(original)).await.unwrap();

        // Current-thread runtime: async code runs on the test thread
        let copied_on = clipboard.thread.lock().unwrap().expect("clipboard not called");
        assert_ne!(copied_on, std::thread::current().id());
        assert_eq!(clipboard.copied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_caps_files_in_flight() {
        let dir = TempDir::new().unwrap();
        let describer = SlowDescriber::new(Duration::from_millis(50));
        let pipeline = Arc::new(Pipeline::new(
            config(),
            describer.clone(),
            None,
            Arc::new(FakeClipboard::default()),
        ));

        let (tx, rx) = mpsc::channel(8);
        for i in 0..6 {
            tx.send(FileEvent::new(screenshot(&dir, &format!("shot-{}.png", i)))).await.unwrap();
        }
        drop(tx);

        pipeline.run(rx, std::future::pending()).await;

        assert_eq!(describer.calls.load(Ordering::SeqCst), 6);
        assert!(describer.peak.load(Ordering::SeqCst) <= config().max_in_flight);
        for n in 1..=6 {
            assert!(dir.path().join(format!("file-{}-ss.png", n)).exists());
        }
    }

    #[tokio::test]
    async fn test_shutdown_while_saturated_drains_running_files() {
        let dir = TempDir::new().unwrap();
        let describer = SlowDescriber::new(Duration::from_millis(300));
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig {
                settle_delay: Duration::ZERO,
                max_in_flight: 1,
            },
            describer.clone(),
            None,
            Arc::new(FakeClipboard::default()),
        ));

        let (tx, rx) = mpsc::channel(8);
        for i in 0..4 {
            tx.send(FileEvent::new(screenshot(&dir, &format!("queued-{}.png", i)))).await.unwrap();
        }

        let started = Instant::now();
        pipeline.run(rx, tokio::time::sleep(Duration::from_millis(50))).await;

        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);
        // The running file finished; queued ones were never touched
        assert!(dir.path().join("file-1-ss.png").exists());
        assert!(!dir.path().join("queued-0.png").exists());
        for i in 1..4 {
            assert!(dir.path().join(format!("queued-{}.png", i)).exists());
        }
        drop(tx);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"boom").unwrap();
        let fine = screenshot(&dir, "fine.png");
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig {
                settle_delay: Duration::ZERO,
                max_in_flight: 1,
            },
            Arc::new(PanickyDescriber),
            None,
            Arc::new(FakeClipboard::default()),
        ));

        let (tx, rx) = mpsc::channel(8);
        tx.send(FileEvent::new(broken.clone())).await.unwrap();
        tx.send(FileEvent::new(fine)).await.unwrap();
        drop(tx);

        pipeline.run(rx, std::future::pending()).await;

        assert!(broken.exists());
        assert!(dir.path().join("normal-screen-ss.png").exists());
    }
}
