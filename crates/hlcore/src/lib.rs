pub mod engine;
pub mod language;
pub mod rules;

pub use engine::{highlight_line, Carry, DocumentHighlighter, LineHighlight, LineSource, Span};
pub use language::Language;
pub use rules::{BlockComment, Rule, RuleError, RuleRegistry, RuleSet, Style};

#[cfg(test)]
mod tests;
