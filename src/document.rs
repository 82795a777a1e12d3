use crate::codec::{self, EncodeOptions, Format};
use crate::error::{CodecError, DocumentError, Result};
use crate::statics;
use crate::value::{Value, format_path};
use crate::view::{ViewId, ViewTable};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, info, warn};

/// What happens when a dictionary insert or rename targets a key that exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeyPolicy {
    /// Replace the existing entry (dictionary-set semantics).
    #[default]
    Overwrite,
    /// Fail with `EditError::DuplicateKey`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentOptions {
    pub duplicate_keys: DuplicateKeyPolicy,
    /// Queue a save after every committed edit.
    pub autosave: bool,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            duplicate_keys: DuplicateKeyPolicy::default(),
            autosave: true,
        }
    }
}

/// Result of one queued save, reported for the snapshot it captured.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub generation: u64,
    pub result: Result<()>,
}

/// An open Plist or JSON file: the root value, its views, and persistence state.
///
/// Every edit bumps `generation`; the document is dirty until a save of the
/// latest generation succeeds. Saves run on a background writer in the order
/// they were queued, each encoding the snapshot taken when it was queued.
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    format: Format,
    encoding: EncodeOptions,
    options: DocumentOptions,
    root: Arc<Value>,
    known_bytes: Vec<u8>,
    generation: u64,
    saved_generation: u64,
    /// Committed paths not yet covered by a successful save, oldest first.
    unsaved: Vec<(u64, Vec<String>)>,
    last_error: Option<DocumentError>,
    /// Undelivered outcomes, at most `MAX_UNREPORTED_SAVES`.
    outcomes: VecDeque<SaveOutcome>,
    pub(crate) views: ViewTable,
    writer: Writer,
    closed: bool,
}

impl Document {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, DocumentOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: DocumentOptions) -> Result<Self> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let bytes = fs::read(path).map_err(|e| DocumentError::io(path, e))?;
        let root = codec::decode(&bytes, format)?;
        let encoding = EncodeOptions::detect(&bytes, format);
        info!(path = %path.display(), %format, "opened document");
        Self::from_parts(path, format, encoding, root, bytes, 0, options)
    }

    /// A document for a file that does not exist yet. It starts dirty.
    pub fn create(path: impl AsRef<Path>, root: Value, options: DocumentOptions) -> Result<Self> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        if !root.is_container() {
            return Err(CodecError::UnsupportedRoot(root.kind()).into());
        }
        Self::from_parts(path, format, EncodeOptions::default(), root, Vec::new(), 1, options)
    }

    fn from_parts(
        path: &Path,
        format: Format,
        encoding: EncodeOptions,
        root: Value,
        known_bytes: Vec<u8>,
        generation: u64,
        options: DocumentOptions,
    ) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            format,
            encoding,
            options,
            root: Arc::new(root),
            known_bytes,
            generation,
            saved_generation: 0,
            // A created document has never been written at all.
            unsaved: if generation > 0 { vec![(generation, Vec::new())] } else { Vec::new() },
            last_error: None,
            outcomes: VecDeque::new(),
            views: ViewTable::default(),
            writer: Writer::spawn(path)?,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn encoding(&self) -> EncodeOptions {
        self.encoding
    }

    pub fn options(&self) -> DocumentOptions {
        self.options
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// The current tree, shared rather than copied.
    pub fn snapshot(&self) -> Arc<Value> {
        Arc::clone(&self.root)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.generation > self.saved_generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The most recent save failure, cleared by the next successful save.
    pub fn last_error(&self) -> Option<&DocumentError> {
        self.last_error.as_ref()
    }

    /// Queues a save of the current tree and returns the generation it captured.
    pub fn save(&mut self) -> Result<u64> {
        if self.closed {
            return Err(DocumentError::Closed);
        }
        self.collect_reports(false);
        let job = SaveJob {
            generation: self.generation,
            snapshot: Arc::clone(&self.root),
            path: self.path.clone(),
            format: self.format,
            encoding: self.encoding,
        };
        self.writer.submit(job)?;
        debug!(generation = self.generation, "queued save");
        Ok(self.generation)
    }

    /// Outcomes of saves that have finished since the last call, without blocking.
    ///
    /// Only the latest `MAX_UNREPORTED_SAVES` are kept between calls.
    pub fn poll_saves(&mut self) -> Vec<SaveOutcome> {
        self.collect_reports(false);
        self.outcomes.drain(..).collect()
    }

    /// Waits for every queued save and returns the unreported outcomes.
    pub fn flush(&mut self) -> Vec<SaveOutcome> {
        self.collect_reports(true);
        self.outcomes.drain(..).collect()
    }

    /// Finishes queued saves and stops accepting edits and saves.
    pub fn close(&mut self) -> Vec<SaveOutcome> {
        if self.closed {
            return Vec::new();
        }
        let outcomes = self.flush();
        self.writer.shutdown();
        self.views.clear();
        self.closed = true;
        info!(path = %self.path.display(), "closed document");
        outcomes
    }

    /// Reads the backing file and applies it when it differs from what this
    /// document last loaded or wrote. Returns the views that became stale.
    pub fn poll_external_change(&mut self) -> Result<Option<Vec<ViewId>>> {
        if self.closed {
            return Err(DocumentError::Closed);
        }
        // In-flight saves would otherwise look like external edits.
        self.collect_reports(true);
        let bytes = fs::read(&self.path).map_err(|e| DocumentError::io(&self.path, e))?;
        if bytes == self.known_bytes {
            return Ok(None);
        }
        self.external_change_detected(&bytes).map(Some)
    }

    /// Replaces the tree with freshly read file contents.
    ///
    /// Saves still queued are written first. Clean views whose node differs
    /// between the old and new tree become stale. Local state the file does
    /// not have yet wins over the file: committed edits that were never saved
    /// are carried onto the new tree, and views holding an uncommitted edit
    /// commit it on top. In either case, or when a queued save overwrote the
    /// change, the document stays dirty. On decode failure nothing changes.
    pub fn external_change_detected(&mut self, bytes: &[u8]) -> Result<Vec<ViewId>> {
        if self.closed {
            return Err(DocumentError::Closed);
        }
        let mut new_root = codec::decode(bytes, self.format)?;
        // Snapshots queued before the change must not land after it unnoticed.
        let written = self.collect_reports(true);
        let overwritten = written > 0 && !fs::read(&self.path).is_ok_and(|disk| disk == bytes);
        let carried = self.carry_unsaved_edits(&mut new_root);

        let stale = self.mark_stale_views(&new_root);
        self.root = Arc::new(new_root);
        self.encoding = EncodeOptions::detect(bytes, self.format);
        self.generation += 1;
        // After an overwrite, `known_bytes` already holds what the writer put on disk.
        if !overwritten {
            self.known_bytes = bytes.to_vec();
        }
        if overwritten || carried > 0 {
            warn!(carried, overwritten, "external change merged with unsaved local state");
            if self.options.autosave {
                if let Err(err) = self.save() {
                    self.last_error = Some(err);
                }
            }
        } else {
            self.saved_generation = self.generation;
            self.unsaved.clear();
        }
        info!(stale = stale.len(), "applied external change");
        self.replay_dirty_views();
        Ok(stale)
    }

    /// Writes the current value of every unsaved path into `new_root`. When
    /// the file removed part of a path, the deepest node both trees still
    /// share takes the local subtree.
    fn carry_unsaved_edits(&self, new_root: &mut Value) -> usize {
        let mut carried = 0;
        for (_, path) in &self.unsaved {
            if self.root.get_path(path).is_none() {
                continue;
            }
            let Some(shared) = (0..=path.len())
                .rev()
                .map(|depth| &path[..depth])
                .find(|prefix| new_root.get_path(prefix).is_some())
            else {
                continue;
            };
            let Some(local) = self.root.get_path(shared) else {
                continue;
            };
            if new_root.get_path(shared) == Some(local) {
                continue;
            }
            match new_root.replace_at(shared, local.clone()) {
                Ok(()) => {
                    debug!(path = %format_path(shared), "unsaved edit carried over");
                    carried += 1;
                }
                Err(err) => warn!(path = %format_path(shared), error = %err, "unsaved edit could not be carried over"),
            }
        }
        carried
    }

    pub(crate) fn root_mut(&mut self) -> &mut Value {
        Arc::make_mut(&mut self.root)
    }

    /// Called after a view commit replaced the subtree at `path`.
    pub(crate) fn note_commit(&mut self, path: &[String]) {
        self.generation += 1;
        // An ancestor's value covers every edit below it.
        self.unsaved.retain(|(_, p)| !p.starts_with(path));
        self.unsaved.push((self.generation, path.to_vec()));
        if self.options.autosave {
            if let Err(err) = self.save() {
                warn!(error = %err, "autosave failed to queue");
                self.last_error = Some(err);
            }
        }
    }

    /// Records finished saves and returns how many of them wrote the file.
    fn collect_reports(&mut self, block: bool) -> usize {
        let reports = if block {
            self.writer.wait_all()
        } else {
            self.writer.try_collect()
        };
        let mut written = 0;
        for report in reports {
            let result = match report.result {
                Ok(bytes) => {
                    written += 1;
                    self.known_bytes = bytes;
                    self.saved_generation = self.saved_generation.max(report.generation);
                    self.unsaved.retain(|(generation, _)| *generation > report.generation);
                    self.last_error = None;
                    info!(generation = report.generation, path = %self.path.display(), "saved");
                    Ok(())
                }
                Err(err) => {
                    warn!(generation = report.generation, error = %err, "save failed");
                    self.last_error = Some(err.clone());
                    Err(err)
                }
            };
            if self.outcomes.len() == statics::MAX_UNREPORTED_SAVES {
                self.outcomes.pop_front();
            }
            self.outcomes.push_back(SaveOutcome {
                generation: report.generation,
                result,
            });
        }
        written
    }
}

#[derive(Debug)]
struct SaveJob {
    generation: u64,
    snapshot: Arc<Value>,
    path: PathBuf,
    format: Format,
    encoding: EncodeOptions,
}

impl SaveJob {
    fn run(self) -> WriteReport {
        let result = codec::encode_with(&self.snapshot, self.format, self.encoding)
            .map_err(DocumentError::from)
            .and_then(|bytes| {
                fs::write(&self.path, &bytes)
                    .map(|()| bytes)
                    .map_err(|e| DocumentError::io(&self.path, e))
            });
        WriteReport {
            generation: self.generation,
            result,
        }
    }
}

#[derive(Debug)]
struct WriteReport {
    generation: u64,
    result: Result<Vec<u8>>,
}

/// Single background thread writing snapshots in submission order.
#[derive(Debug)]
struct Writer {
    jobs: Option<Sender<SaveJob>>,
    reports: Receiver<WriteReport>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl Writer {
    fn spawn(path: &Path) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<SaveJob>();
        let (report_tx, report_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("plistor-save".to_string())
            .spawn(move || {
                for job in job_rx {
                    if report_tx.send(job.run()).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| DocumentError::io(path, e))?;
        Ok(Self {
            jobs: Some(job_tx),
            reports: report_rx,
            handle: Some(handle),
            in_flight: 0,
        })
    }

    fn submit(&mut self, job: SaveJob) -> Result<()> {
        let Some(jobs) = &self.jobs else {
            return Err(DocumentError::Closed);
        };
        jobs.send(job).map_err(|_| DocumentError::Closed)?;
        self.in_flight += 1;
        Ok(())
    }

    fn try_collect(&mut self) -> Vec<WriteReport> {
        let mut out = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            out.push(report);
        }
        out
    }

    fn wait_all(&mut self) -> Vec<WriteReport> {
        let mut out = Vec::new();
        while self.in_flight > 0 {
            match self.reports.recv() {
                Ok(report) => {
                    self.in_flight -= 1;
                    out.push(report);
                }
                Err(_) => {
                    self.in_flight = 0;
                }
            }
        }
        out
    }

    fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
