use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::Path;

lazy_static! {
    static ref PYTHON_HINT: Regex =
        Regex::new(r"\b(class|def|import)\s").expect("Invalid PYTHON_HINT regex pattern");
    static ref CPP_HINT: Regex =
        Regex::new(r"(^|\s)#include\b|\bnamespace\s").expect("Invalid CPP_HINT regex pattern");
    static ref JAVASCRIPT_HINT: Regex = Regex::new(r"\b(function|var|let|const)\s")
        .expect("Invalid JAVASCRIPT_HINT regex pattern");
}

/// Language of a document. Known languages are closed variants; anything
/// else is carried as `Custom` and resolved through the rule registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Language {
    Cpp,
    Python,
    JavaScript,
    Json,
    Xml,
    #[default]
    PlainText,
    Custom(String),
}

impl Language {
    pub fn tag(&self) -> &str {
        match self {
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Json => "json",
            Language::Xml => "xml",
            Language::PlainText => "text",
            Language::Custom(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "cpp" | "c" => Language::Cpp,
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "json" => Language::Json,
            "xml" | "html" => Language::Xml,
            "text" | "" => Language::PlainText,
            other => Language::Custom(other.to_string()),
        }
    }

    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "cpp" | "cxx" | "cc" | "c" | "h" | "hpp" | "hxx" => Language::Cpp,
            "py" | "pyw" => Language::Python,
            "js" | "jsx" | "ts" | "tsx" => Language::JavaScript,
            "json" => Language::Json,
            "xml" | "html" | "htm" | "xhtml" => Language::Xml,
            _ => Language::PlainText,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or_default()
    }

    /// Guesses a language for text with no file name to go by.
    pub fn detect_from_content(content: &str) -> Self {
        let trimmed = content.trim();

        if trimmed.starts_with("#!/usr/bin/python") || trimmed.starts_with("#!/usr/bin/env python")
        {
            return Language::Python;
        }
        if trimmed.starts_with("<?xml") || trimmed.starts_with("<!DOCTYPE html") {
            return Language::Xml;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Language::Json;
        }

        if PYTHON_HINT.is_match(content) {
            Language::Python
        } else if CPP_HINT.is_match(content) {
            Language::Cpp
        } else if JAVASCRIPT_HINT.is_match(content) {
            Language::JavaScript
        } else {
            Language::PlainText
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path(Path::new("/tmp/a.cpp")), Language::Cpp);
        assert_eq!(Language::from_path(Path::new("main.H")), Language::Cpp);
        assert_eq!(Language::from_path(Path::new("tool.py")), Language::Python);
        assert_eq!(Language::from_path(Path::new("app.tsx")), Language::JavaScript);
        assert_eq!(Language::from_path(Path::new("data.json")), Language::Json);
        assert_eq!(Language::from_path(Path::new("index.html")), Language::Xml);
        assert_eq!(Language::from_path(Path::new("notes.md")), Language::PlainText);
        assert_eq!(Language::from_path(Path::new("Makefile")), Language::PlainText);
    }

    #[test]
    fn test_tag_round_trip() {
        for language in [
            Language::Cpp,
            Language::Python,
            Language::JavaScript,
            Language::Json,
            Language::Xml,
            Language::PlainText,
        ] {
            assert_eq!(Language::from_tag(language.tag()), language);
        }
        assert_eq!(Language::from_tag("c"), Language::Cpp);
        assert_eq!(Language::from_tag("html"), Language::Xml);
        assert_eq!(
            Language::from_tag("lua"),
            Language::Custom("lua".to_string())
        );
    }

    #[test]
    fn test_detect_from_content() {
        assert_eq!(
            Language::detect_from_content("#!/usr/bin/env python\nprint(1)"),
            Language::Python
        );
        assert_eq!(Language::detect_from_content("<?xml version=\"1.0\"?>"), Language::Xml);
        assert_eq!(Language::detect_from_content("  {\"a\": 1}"), Language::Json);
        assert_eq!(
            Language::detect_from_content("#include <stdio.h>\nint main() {}"),
            Language::Cpp
        );
        assert_eq!(
            Language::detect_from_content("let x = 1;\nfunction f() {}"),
            Language::JavaScript
        );
        assert_eq!(Language::detect_from_content("hello world"), Language::PlainText);
    }
}
