use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::language::Language;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid highlight pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("pattern `{pattern}` has no capture group {group}")]
    MissingGroup { pattern: String, group: usize },
}

/// Style tag attached to a highlighted span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    Keyword,
    Class,
    Comment,
    BlockComment,
    String,
    Function,
    Number,
    Preprocessor,
    Tag,
    Attribute,
}

impl Style {
    /// Default foreground colour (dark theme).
    pub fn color(self) -> (u8, u8, u8) {
        match self {
            Style::Keyword | Style::Tag => (86, 156, 214),
            Style::Class => (78, 201, 176),
            Style::Comment | Style::BlockComment => (106, 153, 85),
            Style::String => (206, 145, 120),
            Style::Function | Style::Attribute => (220, 220, 170),
            Style::Number => (181, 206, 168),
            Style::Preprocessor => (155, 155, 155),
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, Style::Keyword | Style::Class)
    }
}

/// One `(pattern, style)` pair. When `group` is set only that capture
/// group is painted, which stands in for look-ahead (`name(`).
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    group: Option<usize>,
    style: Style,
}

impl Rule {
    pub fn new(pattern: &str, style: Style) -> Result<Self, RuleError> {
        Ok(Self {
            pattern: compile(pattern)?,
            group: None,
            style,
        })
    }

    pub fn with_group(pattern: &str, group: usize, style: Style) -> Result<Self, RuleError> {
        let regex = compile(pattern)?;
        if group >= regex.captures_len() {
            return Err(RuleError::MissingGroup {
                pattern: pattern.to_string(),
                group,
            });
        }
        Ok(Self {
            pattern: regex,
            group: Some(group),
            style,
        })
    }

    pub fn style(&self) -> Style {
        self.style
    }

    /// Finds the first match at or after `pos`. Returns the byte range to
    /// paint and the end of the whole match.
    pub(crate) fn match_at(&self, text: &str, pos: usize) -> Option<(std::ops::Range<usize>, usize, usize)> {
        match self.group {
            None => self
                .pattern
                .find_at(text, pos)
                .map(|m| (m.range(), m.start(), m.end())),
            Some(group) => {
                let caps = self.pattern.captures_at(text, pos)?;
                let whole = caps.get(0)?;
                let painted = caps
                    .get(group)
                    .map(|m| m.range())
                    .unwrap_or(whole.start()..whole.start());
                Some((painted, whole.start(), whole.end()))
            }
        }
    }
}

/// Start and end markers of a construct that may span lines.
#[derive(Debug, Clone)]
pub struct BlockComment {
    pub start: Regex,
    pub end: Regex,
    pub style: Style,
}

/// Ordered rules for one language. Shared behind `Arc` once built.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    name: String,
    rules: Vec<Rule>,
    block_comment: Option<BlockComment>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            block_comment: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn block_comment(&self) -> Option<&BlockComment> {
        self.block_comment.as_ref()
    }

    pub fn push(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn rule(mut self, pattern: &str, style: Style) -> Result<Self, RuleError> {
        self.rules.push(Rule::new(pattern, style)?);
        Ok(self)
    }

    pub fn group_rule(mut self, pattern: &str, group: usize, style: Style) -> Result<Self, RuleError> {
        self.rules.push(Rule::with_group(pattern, group, style)?);
        Ok(self)
    }

    /// Adds a single rule matching any of `words` as a whole word.
    pub fn keywords(self, words: &[&str], style: Style) -> Result<Self, RuleError> {
        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        self.rule(&format!(r"\b(?:{})\b", alternation), style)
    }

    pub fn with_block_comment(mut self, start: &str, end: &str) -> Result<Self, RuleError> {
        self.block_comment = Some(BlockComment {
            start: compile(start)?,
            end: compile(end)?,
            style: Style::BlockComment,
        });
        Ok(self)
    }
}

fn compile(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|source| RuleError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr", "continue",
    "default", "delete", "do", "double", "else", "enum", "explicit", "extern", "float", "for",
    "friend", "if", "inline", "int", "long", "namespace", "new", "operator", "private",
    "protected", "public", "return", "short", "signed", "sizeof", "static", "struct", "switch",
    "template", "this", "throw", "try", "typedef", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "while",
];

const PYTHON_KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "exec", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "not", "or",
    "pass", "print", "raise", "return", "try", "while", "with", "yield",
];

const JAVASCRIPT_KEYWORDS: &[&str] = &[
    "break", "case", "catch", "continue", "default", "delete", "do", "else", "finally", "for",
    "function", "if", "in", "instanceof", "new", "return", "switch", "this", "throw", "try",
    "typeof", "var", "void", "while", "with", "const", "let",
];

const CLASS_NAME: &str = r"\b[A-Z][a-zA-Z0-9_]*\b";
const FUNCTION_CALL: &str = r"\b([A-Za-z0-9_]+)\(";
const NUMBER: &str = r"\b\d+(\.\d+)?\b";

fn cpp_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new("cpp")
        .keywords(CPP_KEYWORDS, Style::Keyword)?
        .rule(CLASS_NAME, Style::Class)?
        .rule(r"//.*", Style::Comment)?
        .rule(r#"".*""#, Style::String)?
        .group_rule(FUNCTION_CALL, 1, Style::Function)?
        .rule(NUMBER, Style::Number)?
        .rule(r"#[a-zA-Z_][a-zA-Z0-9_]*", Style::Preprocessor)?
        .with_block_comment(r"/\*", r"\*/")
}

fn python_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new("python")
        .keywords(PYTHON_KEYWORDS, Style::Keyword)?
        .rule(CLASS_NAME, Style::Class)?
        .rule(r"#.*", Style::Comment)?
        .rule(r#"".*"|'.*'"#, Style::String)?
        .group_rule(FUNCTION_CALL, 1, Style::Function)?
        .rule(NUMBER, Style::Number)
}

fn javascript_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new("javascript")
        .keywords(JAVASCRIPT_KEYWORDS, Style::Keyword)?
        .rule(r"//.*", Style::Comment)?
        .rule(r#"".*"|'.*'|`.*`"#, Style::String)?
        .group_rule(FUNCTION_CALL, 1, Style::Function)?
        .rule(NUMBER, Style::Number)?
        .with_block_comment(r"/\*", r"\*/")
}

fn json_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new("json")
        .rule(r#""[^"]*""#, Style::String)?
        .rule(NUMBER, Style::Number)?
        .rule(r"\b(true|false|null)\b", Style::Keyword)
}

fn xml_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new("xml")
        .group_rule(r"(</?\b[A-Za-z0-9_-]+)(?:\s|>)", 1, Style::Tag)?
        .group_rule(r"\b([A-Za-z0-9_-]+)\s*=", 1, Style::Attribute)?
        .rule(r#""[^"]*"|'[^']*'"#, Style::String)?
        .rule(r"<!--[^>]*-->", Style::Comment)
}

lazy_static! {
    static ref CPP: Arc<RuleSet> = Arc::new(cpp_rules().expect("Invalid cpp highlight rules"));
    static ref PYTHON: Arc<RuleSet> =
        Arc::new(python_rules().expect("Invalid python highlight rules"));
    static ref JAVASCRIPT: Arc<RuleSet> =
        Arc::new(javascript_rules().expect("Invalid javascript highlight rules"));
    static ref JSON: Arc<RuleSet> = Arc::new(json_rules().expect("Invalid json highlight rules"));
    static ref XML: Arc<RuleSet> = Arc::new(xml_rules().expect("Invalid xml highlight rules"));
    static ref PLAIN: Arc<RuleSet> = Arc::new(RuleSet::new("text"));
}

/// Rule sets keyed by language tag. Built-in languages are always
/// present; custom ones are added with [`RuleRegistry::register`].
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    sets: HashMap<String, Arc<RuleSet>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        let mut sets = HashMap::new();
        sets.insert(Language::Cpp.tag().to_string(), CPP.clone());
        sets.insert(Language::Python.tag().to_string(), PYTHON.clone());
        sets.insert(Language::JavaScript.tag().to_string(), JAVASCRIPT.clone());
        sets.insert(Language::Json.tag().to_string(), JSON.clone());
        sets.insert(Language::Xml.tag().to_string(), XML.clone());
        sets.insert(Language::PlainText.tag().to_string(), PLAIN.clone());
        Self { sets }
    }

    /// Registers (or replaces) the rule set for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, rules: RuleSet) {
        let tag = tag.into();
        log::debug!("Registering highlight rules for '{}'", tag);
        self.sets.insert(tag, Arc::new(rules));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.sets.contains_key(tag)
    }

    pub fn rules_for(&self, language: &Language) -> Arc<RuleSet> {
        self.sets
            .get(language.tag())
            .cloned()
            .unwrap_or_else(|| PLAIN.clone())
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rule_sets_compile() {
        let registry = RuleRegistry::new();
        for language in [
            Language::Cpp,
            Language::Python,
            Language::JavaScript,
            Language::Json,
            Language::Xml,
        ] {
            assert!(!registry.rules_for(&language).rules().is_empty());
        }
        assert!(registry.rules_for(&Language::PlainText).rules().is_empty());
    }

    #[test]
    fn test_block_comment_only_for_c_like_languages() {
        let registry = RuleRegistry::new();
        assert!(registry.rules_for(&Language::Cpp).block_comment().is_some());
        assert!(registry.rules_for(&Language::JavaScript).block_comment().is_some());
        assert!(registry.rules_for(&Language::Python).block_comment().is_none());
        assert!(registry.rules_for(&Language::Json).block_comment().is_none());
    }

    #[test]
    fn test_unknown_custom_language_falls_back_to_plain() {
        let registry = RuleRegistry::new();
        let rules = registry.rules_for(&Language::Custom("lua".to_string()));
        assert_eq!(rules.name(), "text");
    }

    #[test]
    fn test_register_custom_rules() {
        let mut registry = RuleRegistry::new();
        let lua = RuleSet::new("lua")
            .keywords(&["local", "function", "end"], Style::Keyword)
            .unwrap()
            .rule(r"--.*", Style::Comment)
            .unwrap();
        registry.register("lua", lua);

        assert!(registry.contains("lua"));
        let rules = registry.rules_for(&Language::Custom("lua".to_string()));
        assert_eq!(rules.name(), "lua");
        assert_eq!(rules.rules().len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let error = Rule::new("(unclosed", Style::Keyword).unwrap_err();
        assert!(error.to_string().contains("(unclosed"));
    }

    #[test]
    fn test_missing_capture_group_is_rejected() {
        let error = Rule::with_group(r"\bfoo\b", 1, Style::Function).unwrap_err();
        assert!(matches!(error, RuleError::MissingGroup { group: 1, .. }));
    }

    #[test]
    fn test_keyword_style_is_bold() {
        assert!(Style::Keyword.is_bold());
        assert!(!Style::Comment.is_bold());
        assert_eq!(Style::Comment.color(), Style::BlockComment.color());
    }
}
