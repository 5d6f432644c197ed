#[cfg(test)]
mod unit_tests {
    use super::super::*;

    fn render(spans: &[Span]) -> String {
        spans
            .iter()
            .map(|s| format!("{}+{}:{:?}", s.start, s.len, s.style))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn highlight(language: Language, line: &str) -> String {
        let rules = RuleRegistry::new().rules_for(&language);
        render(&highlight_line(&rules, line, Carry::Outside).spans)
    }

    #[test]
    fn test_cpp_line_snapshot() {
        insta::assert_snapshot!(highlight(Language::Cpp, "int x = 42; // note"), @"0+3:Keyword 8+2:Number 12+7:Comment");
    }

    #[test]
    fn test_preprocessor_directive() {
        insta::assert_snapshot!(highlight(Language::Cpp, "#include"), @"0+8:Preprocessor");
    }

    #[test]
    fn test_python_comment_and_string() {
        let rules = RuleRegistry::new().rules_for(&Language::Python);
        let result = highlight_line(&rules, "def f(): # 'x'", Carry::Outside);
        // The string rule runs after the comment rule and repaints the quotes.
        let styles: Vec<Style> = result.spans.iter().map(|s| s.style).collect();
        assert_eq!(
            styles,
            vec![
                Style::Keyword,
                Style::Function,
                Style::Comment,
                Style::String
            ]
        );
    }

    #[test]
    fn test_json_literals() {
        insta::assert_snapshot!(highlight(Language::Json, r#"{"a": true, "b": 1.5}"#), @"1+3:String 6+4:Keyword 12+3:String 17+3:Number");
    }

    #[test]
    fn test_xml_tag_and_attribute() {
        let rules = RuleRegistry::new().rules_for(&Language::Xml);
        let line = r#"<item id="7">"#;
        let result = highlight_line(&rules, line, Carry::Outside);
        assert_eq!(result.spans[0], Span { start: 0, len: 5, style: Style::Tag });
        assert_eq!(result.spans[1], Span { start: 6, len: 2, style: Style::Attribute });
        assert_eq!(result.spans[2], Span { start: 9, len: 3, style: Style::String });
    }

    #[test]
    fn test_plain_text_has_no_spans() {
        assert_eq!(highlight(Language::PlainText, "int main() {}"), "");
    }

    #[test]
    fn test_document_with_comment_block() {
        let registry = RuleRegistry::new();
        let lines = ["/* unterminated", "more text"];
        let mut highlighter = DocumentHighlighter::new(&registry, Language::JavaScript);
        highlighter.rehighlight(&lines[..]);

        assert_eq!(highlighter.carry(0), Carry::InsideBlockComment);
        assert_eq!(
            highlighter.spans(1),
            &[Span { start: 0, len: 9, style: Style::BlockComment }]
        );
    }
}
