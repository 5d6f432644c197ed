use hlcore::{Carry, DocumentHighlighter, Language, LineSource, RuleRegistry, Span};
use regex::{NoExpand, RegexBuilder};
use ropey::Rope;
use std::borrow::Cow;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::file_manager::FileManager;

pub const UNTITLED_LABEL: &str = "Untitled";

/// Where a document stands relative to the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    UntitledClean,
    UntitledDirty,
    SavedClean,
    SavedDirty,
    /// Has a path, but the file is gone from disk.
    SavedMissing,
}

/// Line view over a rope for the highlighter.
struct RopeLines<'a>(&'a Rope);

impl LineSource for RopeLines<'_> {
    fn line_count(&self) -> usize {
        self.0.len_lines()
    }

    fn line_text(&self, index: usize) -> Cow<'_, str> {
        let line = self.0.line(index);
        match line.as_str() {
            Some(text) => Cow::Borrowed(text),
            None => Cow::Owned(line.to_string()),
        }
    }
}

/// One open tab: its text, its place on disk, and its highlight state.
#[derive(Debug, Clone)]
pub struct DocumentState {
    path: Option<PathBuf>,
    rope: Rope,
    modified: bool,
    cursor: usize,
    untitled_name: Option<String>,
    highlighter: DocumentHighlighter,
}

impl DocumentState {
    pub fn untitled(registry: &RuleRegistry, name: impl Into<String>) -> Self {
        Self::build(registry, None, "", false, 0, Some(name.into()))
    }

    pub fn from_file(registry: &RuleRegistry, path: impl Into<PathBuf>, content: &str) -> Self {
        Self::build(registry, Some(path.into()), content, false, 0, None)
    }

    /// Rebuilds a tab from persisted state. The cursor is clamped to the
    /// content.
    pub fn restored(
        registry: &RuleRegistry,
        path: Option<PathBuf>,
        content: &str,
        modified: bool,
        cursor: usize,
        untitled_name: Option<String>,
    ) -> Self {
        let untitled_name = match path {
            Some(_) => None,
            None => Some(untitled_name.unwrap_or_else(|| UNTITLED_LABEL.to_string())),
        };
        Self::build(registry, path, content, modified, cursor, untitled_name)
    }

    fn build(
        registry: &RuleRegistry,
        path: Option<PathBuf>,
        content: &str,
        modified: bool,
        cursor: usize,
        untitled_name: Option<String>,
    ) -> Self {
        let language = path
            .as_deref()
            .map(Language::from_path)
            .unwrap_or_default();
        let rope = Rope::from_str(content);
        let mut highlighter = DocumentHighlighter::new(registry, language);
        highlighter.rehighlight(&RopeLines(&rope));

        Self {
            cursor: cursor.min(rope.len_chars()),
            path,
            rope,
            modified,
            untitled_name,
            highlighter,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_untitled(&self) -> bool {
        self.path.is_none()
    }

    pub fn untitled_name(&self) -> Option<&str> {
        self.untitled_name.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_modified(&mut self, modified: bool) -> bool {
        let changed = self.modified != modified;
        self.modified = modified;
        changed
    }

    pub fn content(&self) -> String {
        self.rope.to_string()
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.rope.len_chars());
    }

    pub fn language(&self) -> &Language {
        self.highlighter.language()
    }

    /// File name when saved, otherwise the untitled label.
    pub fn display_title(&self) -> String {
        match &self.path {
            Some(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            None => self
                .untitled_name
                .clone()
                .unwrap_or_else(|| UNTITLED_LABEL.to_string()),
        }
    }

    pub fn tab_label(&self) -> String {
        if self.modified {
            format!("{} *", self.display_title())
        } else {
            self.display_title()
        }
    }

    pub fn status(&self) -> DocumentStatus {
        match (&self.path, self.modified) {
            (None, false) => DocumentStatus::UntitledClean,
            (None, true) => DocumentStatus::UntitledDirty,
            (Some(path), _) if !FileManager::exists(path) => DocumentStatus::SavedMissing,
            (Some(_), false) => DocumentStatus::SavedClean,
            (Some(_), true) => DocumentStatus::SavedDirty,
        }
    }

    /// An untouched untitled tab with nothing in it.
    pub fn is_blank(&self) -> bool {
        self.path.is_none() && !self.modified && self.rope.len_chars() == 0
    }

    /// Records a successful save. A new path re-derives the language;
    /// returns `true` when that changed it.
    pub fn mark_saved(&mut self, registry: &RuleRegistry, new_path: Option<PathBuf>) -> bool {
        self.modified = false;
        let Some(path) = new_path else {
            return false;
        };
        let language = Language::from_path(&path);
        self.path = Some(path);
        self.untitled_name = None;
        self.highlighter
            .set_language(registry, language, &RopeLines(&self.rope))
    }

    /// Returns `true` when the language changed.
    pub fn set_language(&mut self, registry: &RuleRegistry, language: Language) -> bool {
        self.highlighter
            .set_language(registry, language, &RopeLines(&self.rope))
    }

    pub fn spans(&self, line: usize) -> &[Span] {
        self.highlighter.spans(line)
    }

    pub fn carry(&self, line: usize) -> Carry {
        self.highlighter.carry(line)
    }

    /// Inserts `text` at character offset `at` and leaves the cursor after
    /// it. Returns the lines whose highlighting was recomputed.
    pub fn insert(&mut self, at: usize, text: &str) -> Range<usize> {
        if text.is_empty() {
            return 0..0;
        }
        let at = at.min(self.rope.len_chars());
        let first = self.rope.char_to_line(at);
        let before = self.rope.len_lines();

        self.rope.insert(at, text);
        self.cursor = at + text.chars().count();
        self.modified = true;

        let inserted = (self.rope.len_lines() + 1).saturating_sub(before);
        self.highlighter
            .lines_replaced(&RopeLines(&self.rope), first, 1, inserted)
    }

    /// Removes the characters in `range` (clamped to the document).
    pub fn remove(&mut self, range: Range<usize>) -> Range<usize> {
        let len = self.rope.len_chars();
        let start = range.start.min(len);
        let end = range.end.min(len);
        if start >= end {
            return 0..0;
        }
        let first = self.rope.char_to_line(start);
        let last = self.rope.char_to_line(end);
        let before = self.rope.len_lines();

        self.rope.remove(start..end);
        self.modified = true;
        self.cursor = if self.cursor >= end {
            self.cursor - (end - start)
        } else {
            self.cursor.min(start)
        };

        let removed = last - first + 1;
        let inserted = (self.rope.len_lines() + removed).saturating_sub(before);
        self.highlighter
            .lines_replaced(&RopeLines(&self.rope), first, removed, inserted)
    }

    /// Replaces the whole text.
    pub fn set_text(&mut self, text: &str) {
        self.rope = Rope::from_str(text);
        self.cursor = self.cursor.min(self.rope.len_chars());
        self.modified = true;
        self.highlighter.rehighlight(&RopeLines(&self.rope));
    }

    /// Replaces every occurrence of `needle` and returns how many were
    /// replaced. Matching resumes after each replacement, so a
    /// replacement that contains the needle is not matched again.
    pub fn replace_all(&mut self, needle: &str, replacement: &str, case_sensitive: bool) -> usize {
        if needle.is_empty() {
            return 0;
        }
        let pattern = match RegexBuilder::new(&regex::escape(needle))
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(pattern) => pattern,
            Err(e) => {
                log::warn!("Cannot search for {:?}: {}", needle, e);
                return 0;
            }
        };

        let content = self.rope.to_string();
        let count = pattern.find_iter(&content).count();
        if count == 0 {
            return 0;
        }

        let replaced = pattern.replace_all(&content, NoExpand(replacement));
        self.set_text(&replaced);
        log::debug!("Replaced {} occurrence(s) of {:?}", count, needle);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlcore::Style;

    fn registry() -> RuleRegistry {
        RuleRegistry::new()
    }

    #[test]
    fn test_untitled_labels() {
        let registry = registry();
        let mut doc = DocumentState::untitled(&registry, "Untitled 2");
        assert_eq!(doc.display_title(), "Untitled 2");
        assert_eq!(doc.status(), DocumentStatus::UntitledClean);
        assert!(doc.is_blank());

        doc.insert(0, "x");
        assert_eq!(doc.tab_label(), "Untitled 2 *");
        assert_eq!(doc.status(), DocumentStatus::UntitledDirty);
        assert!(!doc.is_blank());
    }

    #[test]
    fn test_language_follows_path() {
        let registry = registry();
        let doc = DocumentState::from_file(&registry, "/tmp/main.py", "def f():\n    pass\n");
        assert_eq!(doc.language(), &Language::Python);
        assert_eq!(doc.display_title(), "main.py");

        let mut doc = DocumentState::untitled(&registry, UNTITLED_LABEL);
        doc.insert(0, "int x;");
        assert!(doc.mark_saved(&registry, Some(PathBuf::from("/tmp/x.cpp"))));
        assert_eq!(doc.language(), &Language::Cpp);
        assert!(!doc.is_modified());
        assert!(doc.untitled_name().is_none());
        assert_eq!(doc.spans(0)[0].style, Style::Keyword);
    }

    #[test]
    fn test_unterminated_comment_carries_into_next_line() {
        let registry = registry();
        let mut doc = DocumentState::untitled(&registry, UNTITLED_LABEL);
        doc.set_language(&registry, Language::Cpp);

        doc.insert(0, "/* unterminated");
        doc.insert(doc.len_chars(), "\nmore text");

        assert_eq!(doc.carry(0), Carry::InsideBlockComment);
        assert_eq!(
            doc.spans(0),
            &[Span {
                start: 0,
                len: 15,
                style: Style::BlockComment
            }]
        );
        assert_eq!(
            doc.spans(1),
            &[Span {
                start: 0,
                len: 9,
                style: Style::BlockComment
            }]
        );
    }

    #[test]
    fn test_removing_comment_start_reverts_following_lines() {
        let registry = registry();
        let mut doc =
            DocumentState::from_file(&registry, "/tmp/a.cpp", "int a;\nint b;\nint c;\nint d;\n");

        let recomputed = doc.insert(0, "/*");
        assert_eq!(recomputed, 0..5);
        for line in 1..4 {
            assert_eq!(doc.spans(line)[0].style, Style::BlockComment);
            assert_eq!(doc.carry(line), Carry::InsideBlockComment);
        }

        doc.remove(0..2);
        for line in 0..4 {
            assert_eq!(doc.spans(line)[0].style, Style::Keyword);
            assert_eq!(doc.carry(line), Carry::Outside);
        }
    }

    #[test]
    fn test_multiline_insert_and_remove_keep_highlight_in_sync() {
        let registry = registry();
        let mut doc = DocumentState::from_file(&registry, "/tmp/a.py", "x = 1\ny = 2\n");

        doc.insert(6, "# one\n# two\n");
        assert_eq!(doc.line_count(), 5);
        assert_eq!(doc.spans(1)[0].style, Style::Comment);
        assert_eq!(doc.spans(2)[0].style, Style::Comment);

        doc.remove(6..18);
        assert_eq!(doc.content(), "x = 1\ny = 2\n");
        let mut fresh = DocumentHighlighter::new(&registry, Language::Python);
        fresh.rehighlight(&RopeLines(doc.rope()));
        for line in 0..doc.line_count() {
            assert_eq!(doc.spans(line), fresh.spans(line));
        }
    }

    #[test]
    fn test_cursor_is_clamped() {
        let registry = registry();
        let doc = DocumentState::restored(&registry, None, "abc", true, 99, None);
        assert_eq!(doc.cursor(), 3);
        assert_eq!(doc.display_title(), UNTITLED_LABEL);

        let mut doc = DocumentState::from_file(&registry, "/tmp/a.txt", "hello world");
        doc.set_cursor(8);
        doc.remove(0..6);
        assert_eq!(doc.cursor(), 2);
        doc.remove(0..4);
        assert_eq!(doc.cursor(), 0);
    }

    #[test]
    fn test_replace_all_terminates_when_replacement_contains_needle() {
        let registry = registry();
        let mut doc = DocumentState::from_file(&registry, "/tmp/a.txt", "a-a-a");

        assert_eq!(doc.replace_all("a", "aa", true), 3);
        assert_eq!(doc.content(), "aa-aa-aa");
        assert!(doc.is_modified());
    }

    #[test]
    fn test_replace_all_case_handling() {
        let registry = registry();
        let mut doc = DocumentState::from_file(&registry, "/tmp/a.txt", "Foo foo FOO");

        assert_eq!(doc.replace_all("foo", "bar", true), 1);
        assert_eq!(doc.content(), "Foo bar FOO");
        assert_eq!(doc.replace_all("foo", "$0", false), 2);
        assert_eq!(doc.content(), "$0 bar $0");
        assert_eq!(doc.replace_all("", "x", false), 0);
    }

    #[test]
    fn test_replace_all_without_match_leaves_document_clean() {
        let registry = registry();
        let mut doc = DocumentState::from_file(&registry, "/tmp/a.txt", "abc");
        assert_eq!(doc.replace_all("zzz", "y", true), 0);
        assert!(!doc.is_modified());
    }
}
