//! Per-line highlighting with block-comment carry state, and the
//! incremental re-highlighter that keeps a whole document up to date.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use crate::language::Language;
use crate::rules::{BlockComment, RuleRegistry, RuleSet, Style};

/// Whether a line ends inside an unterminated block comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Carry {
    #[default]
    Outside,
    InsideBlockComment,
}

/// A styled run, in character offsets within its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
    pub style: Style,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineHighlight {
    pub spans: Vec<Span>,
    pub carry: Carry,
}

/// Highlights one line given the carry state left by the line above.
pub fn highlight_line(rules: &RuleSet, line: &str, carry_in: Carry) -> LineHighlight {
    let line = trim_line_ending(line);
    let mut paint: Vec<Option<Style>> = vec![None; line.len()];

    for rule in rules.rules() {
        let mut pos = 0;
        while pos <= line.len() {
            let Some((painted, start, end)) = rule.match_at(line, pos) else {
                break;
            };
            fill(&mut paint, painted, rule.style());
            pos = if end > start { end } else { step_past(line, end) };
        }
    }

    let carry = match rules.block_comment() {
        Some(block) => paint_block_comments(block, line, carry_in, &mut paint),
        None => Carry::Outside,
    };

    LineHighlight {
        spans: collect_spans(line, &paint),
        carry,
    }
}

fn paint_block_comments(
    block: &BlockComment,
    line: &str,
    carry_in: Carry,
    paint: &mut [Option<Style>],
) -> Carry {
    // (comment start, where to look for the end marker)
    let mut open = match carry_in {
        Carry::InsideBlockComment => Some((0, 0)),
        Carry::Outside => block.start.find(line).map(|m| (m.start(), m.end())),
    };

    while let Some((from, search_end_at)) = open {
        let Some(close) = block.end.find_at(line, search_end_at) else {
            fill(paint, from..line.len(), block.style);
            return Carry::InsideBlockComment;
        };
        fill(paint, from..close.end(), block.style);

        let resume = if close.end() > from {
            close.end()
        } else {
            step_past(line, from)
        };
        if resume > line.len() {
            break;
        }
        open = block
            .start
            .find_at(line, resume)
            .map(|m| (m.start(), m.end()));
    }

    Carry::Outside
}

fn fill(paint: &mut [Option<Style>], range: Range<usize>, style: Style) {
    let end = range.end.min(paint.len());
    for slot in &mut paint[range.start.min(end)..end] {
        *slot = Some(style);
    }
}

/// Byte offset just past the character at `at`; past the end when `at`
/// is the end of the line.
fn step_past(line: &str, at: usize) -> usize {
    line[at..]
        .chars()
        .next()
        .map_or(line.len() + 1, |c| at + c.len_utf8())
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn collect_spans(line: &str, paint: &[Option<Style>]) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    for (char_idx, (byte_idx, _)) in line.char_indices().enumerate() {
        let Some(style) = paint[byte_idx] else {
            continue;
        };
        match spans.last_mut() {
            Some(last) if last.style == style && last.start + last.len == char_idx => last.len += 1,
            _ => spans.push(Span {
                start: char_idx,
                len: 1,
                style,
            }),
        }
    }
    spans
}

/// Read access to the lines of a document.
pub trait LineSource {
    fn line_count(&self) -> usize;
    fn line_text(&self, index: usize) -> Cow<'_, str>;
}

impl LineSource for [String] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_text(&self, index: usize) -> Cow<'_, str> {
        Cow::Borrowed(self[index].as_str())
    }
}

impl LineSource for [&str] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_text(&self, index: usize) -> Cow<'_, str> {
        Cow::Borrowed(self[index])
    }
}

/// Highlight state of a whole document: spans and exit carry per line.
#[derive(Debug, Clone)]
pub struct DocumentHighlighter {
    language: Language,
    rules: Arc<RuleSet>,
    lines: Vec<LineHighlight>,
}

impl DocumentHighlighter {
    pub fn new(registry: &RuleRegistry, language: Language) -> Self {
        Self {
            rules: registry.rules_for(&language),
            language,
            lines: Vec::new(),
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> Option<&LineHighlight> {
        self.lines.get(index)
    }

    pub fn spans(&self, index: usize) -> &[Span] {
        self.lines
            .get(index)
            .map(|line| line.spans.as_slice())
            .unwrap_or(&[])
    }

    pub fn carry(&self, index: usize) -> Carry {
        self.lines
            .get(index)
            .map(|line| line.carry)
            .unwrap_or_default()
    }

    /// Drops all state and highlights every line once.
    pub fn rehighlight<S: LineSource + ?Sized>(&mut self, source: &S) {
        let mut carry = Carry::Outside;
        self.lines = (0..source.line_count())
            .map(|index| {
                let line = highlight_line(&self.rules, &source.line_text(index), carry);
                carry = line.carry;
                line
            })
            .collect();
    }

    /// Switches rule sets. Returns `false` (and does nothing) when the
    /// language is unchanged.
    pub fn set_language<S: LineSource + ?Sized>(
        &mut self,
        registry: &RuleRegistry,
        language: Language,
        source: &S,
    ) -> bool {
        if self.language == language {
            return false;
        }
        log::debug!("Highlight language {} -> {}", self.language, language);
        self.rules = registry.rules_for(&language);
        self.language = language;
        self.lines.clear();
        self.rehighlight(source);
        true
    }

    /// Updates state after lines `first..first + removed` were replaced by
    /// `inserted` new lines in `source`. Recomputes the new lines, then
    /// keeps going while a line's exit carry differs from what it was.
    /// Returns the range of lines that were recomputed.
    pub fn lines_replaced<S: LineSource + ?Sized>(
        &mut self,
        source: &S,
        first: usize,
        removed: usize,
        inserted: usize,
    ) -> Range<usize> {
        let first = first.min(self.lines.len());
        let removed = removed.min(self.lines.len() - first);
        let total = source.line_count();

        if self.lines.len() - removed + inserted != total {
            log::warn!(
                "Highlight state out of sync ({} lines, source has {}); rehighlighting",
                self.lines.len() - removed + inserted,
                total
            );
            self.rehighlight(source);
            return 0..total;
        }

        let entry_carry = |lines: &[LineHighlight], index: usize| {
            if index == 0 {
                Carry::Outside
            } else {
                lines[index - 1].carry
            }
        };

        let old_exit = if removed > 0 {
            self.lines[first + removed - 1].carry
        } else {
            entry_carry(&self.lines, first)
        };

        self.lines.splice(
            first..first + removed,
            std::iter::repeat_with(LineHighlight::default).take(inserted),
        );

        let mut index = first;
        while index < first + inserted {
            let carry_in = entry_carry(&self.lines, index);
            self.lines[index] = highlight_line(&self.rules, &source.line_text(index), carry_in);
            index += 1;
        }

        if entry_carry(&self.lines, index) != old_exit {
            while index < total {
                let previous = self.lines[index].carry;
                let carry_in = entry_carry(&self.lines, index);
                self.lines[index] = highlight_line(&self.rules, &source.line_text(index), carry_in);
                index += 1;
                if self.lines[index - 1].carry == previous {
                    break;
                }
            }
        }

        if index > first + inserted {
            log::debug!(
                "Highlight cascade recomputed lines {}..{}",
                first,
                index
            );
        }
        first..index
    }
}
