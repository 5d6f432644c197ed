//! The session core: owns the open documents and drives persistence,
//! auto-save and crash recovery around them.

use hlcore::{Carry, Language, RuleRegistry, Span};
use std::collections::HashSet;
use std::future::Future;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::autosave::{AutoSaveCoordinator, AutoSaveReport};
use crate::config::Config;
use crate::document::{DocumentState, UNTITLED_LABEL};
use crate::error::{EditorError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::file_manager::FileManager;
use crate::memory::{MemoryMonitor, MeminfoMonitor};
use crate::recovery::{CrashRecoveryManager, RecoveryOffer, RecoveryOutcome};
use crate::recovery_area::RecoveryArea;
use crate::scheduler::{Job, Scheduler};
use crate::session_store::{SessionSnapshot, SessionStore, TabRecord};
use crate::settings::SettingsStore;

/// What happened during [`SessionController::startup`].
#[derive(Debug)]
pub struct StartupReport {
    pub recovery: RecoveryOutcome,
    /// Tabs installed from the recovery snapshot or the saved session.
    pub restored_tabs: usize,
}

/// Outcome of a bulk close.
#[derive(Debug)]
pub struct BulkClose {
    pub closed: usize,
    /// The refusal that stopped the run, if any.
    pub stopped: Option<EditorError>,
}

pub struct SessionController {
    config: Config,
    documents: Vec<DocumentState>,
    active: Option<usize>,
    registry: RuleRegistry,
    files: FileManager,
    sessions: SessionStore,
    autosave: AutoSaveCoordinator,
    recovery: CrashRecoveryManager,
    memory: Box<dyn MemoryMonitor>,
    events: EventBus,
}

impl SessionController {
    pub fn new(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        recovery_area: Arc<dyn RecoveryArea>,
    ) -> Self {
        Self {
            files: FileManager::from_config(&config.editor),
            sessions: SessionStore::new(settings.clone(), config.session.max_recent_files),
            autosave: AutoSaveCoordinator::new(settings, &config.autosave),
            recovery: CrashRecoveryManager::new(recovery_area, config.recovery.max_age()),
            memory: Box::new(MeminfoMonitor::new()),
            registry: RuleRegistry::new(),
            events: EventBus::new(),
            documents: Vec::new(),
            active: None,
            config,
        }
    }

    pub fn with_memory_monitor(mut self, monitor: impl MemoryMonitor + 'static) -> Self {
        self.memory = Box::new(monitor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Rule sets for custom languages are registered here.
    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.emit(event);
    }

    // ----- queries -----

    pub fn documents(&self) -> &[DocumentState] {
        &self.documents
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document(&self, index: usize) -> Result<&DocumentState> {
        self.documents.get(index).ok_or(EditorError::Index {
            index,
            count: self.documents.len(),
        })
    }

    fn document_mut(&mut self, index: usize) -> Result<&mut DocumentState> {
        let count = self.documents.len();
        self.documents
            .get_mut(index)
            .ok_or(EditorError::Index { index, count })
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_document(&self) -> Option<&DocumentState> {
        self.active.and_then(|index| self.documents.get(index))
    }

    pub fn find_document(&self, path: &Path) -> Option<usize> {
        self.documents
            .iter()
            .position(|doc| doc.path() == Some(path))
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.documents.iter().any(DocumentState::is_modified)
    }

    pub fn unsaved_documents(&self) -> Vec<usize> {
        self.documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.is_modified())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn highlight_spans(&self, index: usize, line: usize) -> Result<&[Span]> {
        Ok(self.document(index)?.spans(line))
    }

    pub fn line_carry(&self, index: usize, line: usize) -> Result<Carry> {
        Ok(self.document(index)?.carry(line))
    }

    pub async fn recent_files(&self) -> Result<Vec<PathBuf>> {
        self.sessions.recent_files().await
    }

    // ----- tab list -----

    fn next_untitled_name(&self) -> String {
        let taken: HashSet<&str> = self
            .documents
            .iter()
            .filter_map(DocumentState::untitled_name)
            .collect();
        if !taken.contains(UNTITLED_LABEL) {
            return UNTITLED_LABEL.to_string();
        }
        (2..)
            .map(|n| format!("{} {}", UNTITLED_LABEL, n))
            .find(|name| !taken.contains(name.as_str()))
            .unwrap_or_else(|| UNTITLED_LABEL.to_string())
    }

    fn activate(&mut self, index: usize) {
        if self.active != Some(index) {
            self.active = Some(index);
            self.emit(SessionEvent::ActiveDocumentChanged { index });
        }
    }

    /// Appends a new untitled, unmodified document and makes it active.
    pub fn create_document(&mut self) -> usize {
        let document = DocumentState::untitled(&self.registry, self.next_untitled_name());
        log::info!("New document: {}", document.display_title());
        self.documents.push(document);
        let index = self.documents.len() - 1;
        self.emit(SessionEvent::DocumentListChanged);
        self.activate(index);
        index
    }

    /// Creates an untitled document when none is open.
    pub fn ensure_document(&mut self) -> usize {
        match self.active {
            Some(index) if index < self.documents.len() => index,
            _ if !self.documents.is_empty() => {
                self.activate(0);
                0
            }
            _ => self.create_document(),
        }
    }

    /// Adds `content` as a saved, unmodified document for `path` and
    /// makes it active. A path that is already open is just activated,
    /// and a lone blank untitled tab is replaced rather than kept.
    pub fn open_document(&mut self, path: impl Into<PathBuf>, content: &str) -> Result<usize> {
        let path = path.into();
        if !FileManager::exists(&path) {
            return Err(EditorError::NotFound { path });
        }

        if let Some(index) = self.find_document(&path) {
            self.activate(index);
            return Ok(index);
        }

        let document = DocumentState::from_file(&self.registry, &path, content);
        let index = if self.documents.len() == 1 && self.documents[0].is_blank() {
            self.documents[0] = document;
            self.active = None;
            0
        } else {
            self.documents.push(document);
            self.documents.len() - 1
        };

        log::info!("Opened document {}: {}", index, path.display());
        self.emit(SessionEvent::DocumentListChanged);
        self.activate(index);
        Ok(index)
    }

    /// Reads `path` from disk and opens it.
    pub async fn open_file(&mut self, path: impl Into<PathBuf>) -> Result<usize> {
        let path = path.into();
        if let Some(index) = self.find_document(&path) {
            self.activate(index);
            return Ok(index);
        }

        let content = self.files.read_document(&path).await?;
        let index = self.open_document(path.clone(), &content)?;
        if let Err(e) = self.sessions.add_recent_file(&path).await {
            log::warn!("Failed to update recent files: {}", e);
        }
        Ok(index)
    }

    pub fn switch_active(&mut self, index: usize) -> Result<()> {
        self.document(index)?;
        self.activate(index);
        Ok(())
    }

    /// Closes a tab. A modified tab is only closed when `force` is set.
    /// Closing the last tab leaves a fresh untitled one behind.
    pub fn close_document(&mut self, index: usize, force: bool) -> Result<bool> {
        if self.document(index)?.is_modified() && !force {
            return Err(EditorError::UnsavedChanges { index });
        }

        let removed = self.documents.remove(index);
        log::info!("Closed document {}: {}", index, removed.display_title());
        self.emit(SessionEvent::DocumentListChanged);

        if self.documents.is_empty() {
            self.active = None;
            self.create_document();
            return Ok(true);
        }

        let previous = self.active;
        let next = match previous {
            Some(active) if active == index => index.saturating_sub(1),
            Some(active) if active > index => active - 1,
            Some(active) => active,
            None => 0,
        };
        self.active = Some(next);
        if previous != Some(next) || previous == Some(index) {
            self.emit(SessionEvent::ActiveDocumentChanged { index: next });
        }
        Ok(true)
    }

    /// Closes every tab, front to back, leaving one fresh untitled tab.
    pub fn close_all(&mut self, force: bool) -> Result<BulkClose> {
        let targets = vec![0; self.documents.len()];
        self.close_each(targets, force)
    }

    /// Closes every tab except `index`: first those to its right, then
    /// those to its left.
    pub fn close_others(&mut self, index: usize, force: bool) -> Result<BulkClose> {
        self.document(index)?;
        let mut targets: Vec<usize> = (index + 1..self.documents.len()).rev().collect();
        targets.extend(std::iter::repeat(0).take(index));
        self.close_each(targets, force)
    }

    pub fn close_to_the_right(&mut self, index: usize, force: bool) -> Result<BulkClose> {
        self.document(index)?;
        let targets = (index + 1..self.documents.len()).rev().collect();
        self.close_each(targets, force)
    }

    /// Stops at the first tab that refuses to close.
    fn close_each(&mut self, targets: Vec<usize>, force: bool) -> Result<BulkClose> {
        let mut closed = 0;
        for index in targets {
            match self.close_document(index, force) {
                Ok(_) => closed += 1,
                Err(e @ EditorError::UnsavedChanges { .. }) => {
                    log::info!("Stopped closing tabs after {}: {}", closed, e);
                    return Ok(BulkClose {
                        closed,
                        stopped: Some(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(BulkClose {
            closed,
            stopped: None,
        })
    }

    // ----- document state -----

    /// Sets the modified flag. Notifies only when it actually changes.
    pub fn mark_modified(&mut self, index: usize, modified: bool) -> Result<()> {
        if self.document_mut(index)?.set_modified(modified) {
            self.emit(SessionEvent::DocumentModifiedChanged { index, modified });
        }
        Ok(())
    }

    /// Records a successful save, optionally under a new path.
    pub fn mark_saved(&mut self, index: usize, new_path: Option<PathBuf>) -> Result<()> {
        let path_changed = new_path.is_some();
        let registry = &self.registry;
        let count = self.documents.len();
        let document = self
            .documents
            .get_mut(index)
            .ok_or(EditorError::Index { index, count })?;
        let was_modified = document.is_modified();
        let language_changed = document.mark_saved(registry, new_path);
        let language = document.language().clone();

        if was_modified {
            self.emit(SessionEvent::DocumentModifiedChanged {
                index,
                modified: false,
            });
        }
        if path_changed {
            self.emit(SessionEvent::DocumentListChanged);
        }
        if language_changed {
            self.emit(SessionEvent::LanguageChanged { index, language });
        }
        Ok(())
    }

    /// Writes a document to its path. Returns `Ok(false)` for an untitled
    /// document, which needs [`SessionController::save_document_as`].
    pub async fn save_document(&mut self, index: usize) -> Result<bool> {
        let document = self.document(index)?;
        let Some(path) = document.path().map(Path::to_path_buf) else {
            return Ok(false);
        };
        let content = document.content();

        self.files.write_document(&path, &content).await?;
        self.mark_saved(index, None)?;
        Ok(true)
    }

    pub async fn save_document_as(&mut self, index: usize, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = self.document(index)?.content();

        self.files.write_document(&path, &content).await?;
        self.mark_saved(index, Some(path.clone()))?;
        if let Err(e) = self.sessions.add_recent_file(&path).await {
            log::warn!("Failed to update recent files: {}", e);
        }
        Ok(())
    }

    /// Returns `true` when the language changed.
    pub fn set_language(&mut self, index: usize, language: Language) -> Result<bool> {
        let registry = &self.registry;
        let count = self.documents.len();
        let document = self
            .documents
            .get_mut(index)
            .ok_or(EditorError::Index { index, count })?;
        if !document.set_language(registry, language.clone()) {
            return Ok(false);
        }
        self.emit(SessionEvent::LanguageChanged { index, language });
        Ok(true)
    }

    /// Picks a language from the document's text. Meant for untitled tabs.
    pub fn detect_language(&mut self, index: usize) -> Result<bool> {
        let language = Language::detect_from_content(&self.document(index)?.content());
        self.set_language(index, language)
    }

    // ----- editing -----

    fn edit<T>(&mut self, index: usize, apply: impl FnOnce(&mut DocumentState) -> T) -> Result<T> {
        let document = self.document_mut(index)?;
        let was_modified = document.is_modified();
        let result = apply(document);
        let modified = document.is_modified();

        if was_modified != modified {
            self.emit(SessionEvent::DocumentModifiedChanged { index, modified });
        }
        Ok(result)
    }

    /// Returns the lines whose highlighting was recomputed.
    pub fn insert_text(&mut self, index: usize, at: usize, text: &str) -> Result<Range<usize>> {
        self.edit(index, |doc| doc.insert(at, text))
    }

    pub fn remove_text(&mut self, index: usize, range: Range<usize>) -> Result<Range<usize>> {
        self.edit(index, |doc| doc.remove(range))
    }

    pub fn set_text(&mut self, index: usize, text: &str) -> Result<()> {
        self.edit(index, |doc| doc.set_text(text))
    }

    pub fn replace_all(
        &mut self,
        index: usize,
        needle: &str,
        replacement: &str,
        case_sensitive: bool,
    ) -> Result<usize> {
        self.edit(index, |doc| doc.replace_all(needle, replacement, case_sensitive))
    }

    pub fn set_cursor(&mut self, index: usize, cursor: usize) -> Result<()> {
        self.document_mut(index)?.set_cursor(cursor);
        Ok(())
    }

    // ----- session -----

    fn tab_record(document: &DocumentState, with_content: bool) -> TabRecord {
        TabRecord {
            file_path: document.path().map(Path::to_path_buf),
            content: with_content.then(|| document.content()),
            is_modified: document.is_modified(),
            cursor_position: document.cursor(),
            is_untitled: document.is_untitled(),
            untitled_name: document.untitled_name().map(str::to_string),
        }
    }

    /// The open tabs as they would be saved on close.
    pub fn session_snapshot(&self) -> SessionSnapshot {
        let keep_clean = self.config.session.persist_clean_content;
        SessionSnapshot {
            tabs: self
                .documents
                .iter()
                .map(|doc| {
                    let with_content = keep_clean || doc.is_modified() || doc.is_untitled();
                    Self::tab_record(doc, with_content)
                })
                .collect(),
            current_tab_index: self.active.unwrap_or(0),
            restore_session: self.config.session.restore_session,
        }
    }

    /// The open tabs with full text, for the recovery snapshot.
    fn recovery_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tabs: self
                .documents
                .iter()
                .map(|doc| Self::tab_record(doc, true))
                .collect(),
            current_tab_index: self.active.unwrap_or(0),
            restore_session: self.config.session.restore_session,
        }
    }

    pub async fn save_session(&self) -> Result<()> {
        self.sessions.save(&self.session_snapshot()).await
    }

    /// Replaces the open tabs with the saved session. Returns how many
    /// tabs were restored.
    pub async fn restore_session(&mut self) -> Result<usize> {
        let snapshot = self.sessions.load().await?;
        if !snapshot.restore_session || !self.config.session.restore_session {
            log::info!("Session restore is disabled");
            return Ok(0);
        }

        let current = snapshot.current_tab_index;
        let mut restored = Vec::new();
        let mut kept_before_current = 0;

        for (position, record) in snapshot.tabs.into_iter().enumerate() {
            let Some(document) = self.restore_tab(record).await else {
                continue;
            };
            if position < current {
                kept_before_current += 1;
            }
            restored.push(document);
        }

        let count = restored.len();
        self.install(restored, kept_before_current);
        log::info!("Restored {} tabs from the last session", count);
        Ok(count)
    }

    async fn restore_tab(&self, record: TabRecord) -> Option<DocumentState> {
        let cursor = record.cursor_position;

        let Some(path) = record.file_path else {
            return Some(DocumentState::restored(
                &self.registry,
                None,
                record.content.as_deref().unwrap_or_default(),
                record.is_modified,
                cursor,
                record.untitled_name,
            ));
        };

        if !FileManager::exists(&path) {
            return match record.content.filter(|content| !content.is_empty()) {
                Some(content) => {
                    log::warn!(
                        "{} no longer exists; restoring its text as unsaved",
                        path.display()
                    );
                    Some(DocumentState::restored(
                        &self.registry,
                        Some(path),
                        &content,
                        true,
                        cursor,
                        None,
                    ))
                }
                None => {
                    log::info!("Dropping session tab for missing file {}", path.display());
                    None
                }
            };
        }

        let content = match (record.is_modified, record.content) {
            (true, Some(content)) => content,
            (_, persisted) => match self.files.read_document(&path).await {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("Failed to reload {}: {}", path.display(), e);
                    persisted?
                }
            },
        };
        Some(DocumentState::restored(
            &self.registry,
            Some(path),
            &content,
            record.is_modified,
            cursor,
            None,
        ))
    }

    fn install(&mut self, documents: Vec<DocumentState>, current: usize) {
        if documents.is_empty() {
            return;
        }
        let index = current.min(documents.len() - 1);
        self.documents = documents;
        self.active = Some(index);
        self.emit(SessionEvent::DocumentListChanged);
        self.emit(SessionEvent::ActiveDocumentChanged { index });
    }

    /// Startup sequence: offer crash recovery first; when nothing is
    /// recovered, restore the saved session. Always leaves at least one
    /// document open.
    pub async fn startup<F, Fut>(&mut self, prompt: F) -> Result<StartupReport>
    where
        F: FnOnce(RecoveryOffer) -> Fut,
        Fut: Future<Output = bool>,
    {
        let events = &mut self.events;
        let recovery = self
            .recovery
            .check_at_startup(|offer| {
                events.emit(SessionEvent::RecoveryOffered {
                    timestamp: offer.timestamp,
                    tab_count: offer.tab_count,
                });
                prompt(offer)
            })
            .await?;

        let mut restored_tabs = 0;
        if let RecoveryOutcome::Recovered {
            tabs,
            current_tab_index,
            skipped,
        } = &recovery
        {
            for error in skipped {
                log::warn!("Skipped during recovery: {}", error);
            }
            let documents: Vec<DocumentState> = tabs
                .iter()
                .map(|tab| {
                    DocumentState::restored(
                        &self.registry,
                        tab.file_path.clone(),
                        tab.content.as_deref().unwrap_or_default(),
                        tab.is_modified,
                        tab.cursor_position,
                        tab.untitled_name.clone(),
                    )
                })
                .collect();
            restored_tabs = documents.len();
            self.install(documents, *current_tab_index);
        }

        if restored_tabs == 0 {
            restored_tabs = match self.restore_session().await {
                Ok(count) => count,
                Err(e) => {
                    log::warn!("Failed to restore the last session: {}", e);
                    0
                }
            };
        }

        self.ensure_document();
        Ok(StartupReport {
            recovery,
            restored_tabs,
        })
    }

    /// Saves the session and drops the recovery snapshot. Call only on a
    /// normal exit.
    pub async fn shutdown_clean(&self) -> Result<()> {
        self.save_session().await?;
        self.recovery.clear_on_clean_shutdown().await?;
        log::info!("Clean shutdown");
        Ok(())
    }

    // ----- timers -----

    /// Registers the auto-save and memory-check jobs.
    pub fn start(&self, scheduler: &mut dyn Scheduler) {
        if self.autosave.is_enabled() {
            scheduler.schedule_repeating(self.autosave.interval(), Job::AutoSave);
        }
        scheduler.schedule_repeating(self.config.memory.check_interval(), Job::MemoryCheck);
        log::debug!(
            "Timers started (auto-save every {:?})",
            self.autosave.interval()
        );
    }

    pub async fn run_job(&mut self, job: Job) -> Result<()> {
        match job {
            Job::AutoSave => self.autosave_tick().await.map(|_| ()),
            Job::MemoryCheck => self.check_memory().await.map(|_| ()),
        }
    }

    /// Copies modified documents to the settings store and rewrites the
    /// recovery snapshot.
    pub async fn autosave_tick(&mut self) -> Result<AutoSaveReport> {
        let report = self.autosave.tick(&self.documents).await?;
        let snapshot = self.recovery_snapshot();
        self.recovery.write_snapshot(&snapshot).await?;
        self.emit(SessionEvent::AutoSaved {
            documents: report.written,
        });
        Ok(report)
    }

    /// Returns `true` when memory was low, in which case an auto-save has
    /// already run.
    pub async fn check_memory(&mut self) -> Result<bool> {
        let Some(available_bytes) = self.memory.available_bytes() else {
            return Ok(false);
        };
        if available_bytes >= self.config.memory.threshold_bytes() {
            return Ok(false);
        }

        log::warn!("Low memory: {} bytes available", available_bytes);
        self.emit(SessionEvent::LowMemoryDetected { available_bytes });
        self.autosave_tick().await?;
        Ok(true)
    }
}
