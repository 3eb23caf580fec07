//! Document parser
//!
//! Single pass over the source text:
//! - `[name]` starts a section, `key=value` lines belong to the last one
//! - blank lines and lines starting with `;` or `#` are ignored
//! - values: `"strings"`, numbers, `True`/`False`/`None`, `[lists]`,
//!   `(tuples)`, `<references>`, `$variables` and bare `dotted.symbols`
//!
//! List and tuple literals may span several lines. Anything else must end
//! at the end of its line.

use crate::config::DuplicateKeyPolicy;
use crate::document::{Document, Entry, Section};
use crate::error::{Error, ErrorKind, Result};
use crate::interpolation::Template;
use crate::value::RawValue;

/// Parse a document, failing on duplicate keys or sections
pub fn parse(input: &str) -> Result<Document> {
    parse_with_policy(input, DuplicateKeyPolicy::default())
}

/// Parse a document with an explicit duplicate policy
pub fn parse_with_policy(input: &str, duplicates: DuplicateKeyPolicy) -> Result<Document> {
    Parser::new(input).parse_document(duplicates)
}

/// Parse a single value (the right-hand side of `key=value`)
pub fn parse_value(input: &str) -> Result<RawValue> {
    let mut parser = Parser::new(input);
    parser.skip_inline_whitespace();
    let value = parser.parse_value()?;
    parser.expect_line_end()?;
    if !parser.is_eof() {
        return Err(parser.error_here("Unexpected content after value"));
    }
    Ok(value)
}

/// Check that `s` is `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => chars.all(is_ident_char),
        _ => false,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    /// Describe the token at the cursor for error messages
    fn token_here(&self) -> String {
        match self.current() {
            None => "end of input".to_string(),
            Some('\n') => "end of line".to_string(),
            Some(_) => {
                let rest = &self.input[self.pos..];
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == ',' || c == ']' || c == ')')
                    .unwrap_or(rest.len())
                    .max(rest.chars().next().map_or(0, char::len_utf8));
                format!("'{}'", &rest[..end])
            }
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.line, self.column, self.token_here(), message)
    }

    /// Spaces, tabs and carriage returns; never newlines
    fn skip_inline_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c == ' ' || c == '\t' || c == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Whitespace including newlines, used inside bracketed literals
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.current() {
            self.advance();
            if c == '\n' {
                break;
            }
        }
    }

    /// Trailing whitespace, then a newline or end of input
    fn expect_line_end(&mut self) -> Result<()> {
        self.skip_inline_whitespace();
        match self.current() {
            None => Ok(()),
            Some('\n') => {
                self.advance();
                Ok(())
            }
            Some(_) => Err(self.error_here("Expected end of line")),
        }
    }

    fn collect_identifier(&mut self) -> String {
        let start = self.pos;
        if self.current().is_some_and(is_ident_start) {
            while self.current().is_some_and(is_ident_char) {
                self.advance();
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_document(&mut self, duplicates: DuplicateKeyPolicy) -> Result<Document> {
        let mut document = Document::new();
        let mut current: Option<String> = None;

        loop {
            self.skip_inline_whitespace();
            match self.current() {
                None => break,
                Some('\n') => self.advance(),
                Some(';') | Some('#') => self.skip_line(),
                Some('[') => {
                    let line = self.line;
                    let name = self.parse_section_header()?;
                    if document.contains_section(&name) {
                        if duplicates == DuplicateKeyPolicy::Error {
                            return Err(Error::duplicate_section(&name).with_line(line));
                        }
                        log::warn!(
                            "Section [{}] defined again at line {}, merging into the first definition",
                            name,
                            line
                        );
                    } else {
                        document.push_section(Section::new(name.clone(), line));
                    }
                    current = Some(name);
                }
                Some(_) => {
                    let Some(section_name) = current.as_deref() else {
                        return Err(self.error_here("Key-value pair outside of any section")
                            .with_help("Add a [section] header before the first key"));
                    };
                    let line = self.line;
                    let (key, value) = self.parse_entry()?;
                    let section = document
                        .section_mut(section_name)
                        .ok_or_else(|| Error::internal("current section missing"))?;
                    if section.contains_key(&key) {
                        if duplicates == DuplicateKeyPolicy::Error {
                            return Err(Error::duplicate_key(section_name, &key).with_line(line));
                        }
                        log::warn!(
                            "Key '{}' in [{}] defined again at line {}, overwriting",
                            key,
                            section_name,
                            line
                        );
                    }
                    section.insert(key, Entry { value, line });
                }
            }
        }

        Ok(document)
    }

    fn parse_section_header(&mut self) -> Result<String> {
        self.advance(); // [
        self.skip_inline_whitespace();
        let name = self.collect_identifier();
        if name.is_empty() {
            return Err(self.error_here("Expected a section name"));
        }
        self.skip_inline_whitespace();
        if self.current() != Some(']') {
            return Err(self.error_here("Expected ']' to close the section header"));
        }
        self.advance();
        self.expect_line_end()?;
        Ok(name)
    }

    fn parse_entry(&mut self) -> Result<(String, RawValue)> {
        let key = self.collect_identifier();
        if key.is_empty() {
            return Err(self.error_here("Expected a key"));
        }
        self.skip_inline_whitespace();
        if self.current() != Some('=') {
            return Err(self.error_here(format!("Expected '=' after key '{}'", key)));
        }
        self.advance();
        self.skip_inline_whitespace();
        let value = self.parse_value()?;
        self.expect_line_end()?;
        Ok((key, value))
    }

    fn parse_value(&mut self) -> Result<RawValue> {
        match self.current() {
            None | Some('\n') => Err(self.error_here("Expected a value")),
            Some('"') => self.parse_string(),
            Some('[') => self.parse_sequence(']').map(RawValue::List),
            Some('(') => self.parse_sequence(')').map(RawValue::Tuple),
            Some('<') => self.parse_reference(),
            Some('$') => self.parse_variable(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.parse_number(),
            Some('.') if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.parse_number(),
            Some(c) if is_ident_start(c) => self.parse_word(),
            Some(_) => Err(self.error_here("Unexpected character at start of value")),
        }
    }

    fn parse_string(&mut self) -> Result<RawValue> {
        let (line, column) = (self.line, self.column);
        self.advance(); // "
        let mut value = String::new();
        // Source position of every character pushed to `value`
        let mut positions = Vec::new();

        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(Error::syntax(
                        line,
                        column,
                        "'\"'",
                        "Unterminated string literal",
                    ));
                }
                Some('"') => {
                    let closing = (self.line, self.column);
                    self.advance();
                    if let Err(err) = Template::parse(&value, line) {
                        return Err(relocate(err, &positions, closing));
                    }
                    return Ok(RawValue::String(value));
                }
                Some('\\') => {
                    positions.push((self.line, self.column));
                    self.advance();
                    match self.current() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        _ => return Err(self.error_here("Unknown escape sequence")),
                    }
                    self.advance();
                }
                Some(c) => {
                    positions.push((self.line, self.column));
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn parse_sequence(&mut self, close: char) -> Result<Vec<RawValue>> {
        let (line, column) = (self.line, self.column);
        let open = self.current().unwrap_or(close);
        self.advance();
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.current() {
                None => {
                    return Err(Error::syntax(
                        line,
                        column,
                        format!("'{}'", open),
                        format!("Unterminated literal, expected '{}'", close),
                    ));
                }
                Some(c) if c == close => {
                    self.advance();
                    return Ok(items);
                }
                Some(_) => {}
            }

            items.push(self.parse_value()?);
            self.skip_whitespace();

            match self.current() {
                Some(',') => self.advance(),
                Some(c) if c == close => {}
                None => {
                    return Err(Error::syntax(
                        line,
                        column,
                        format!("'{}'", open),
                        format!("Unterminated literal, expected '{}'", close),
                    ));
                }
                Some(_) => {
                    return Err(self.error_here(format!("Expected ',' or '{}'", close)));
                }
            }
        }
    }

    fn parse_reference(&mut self) -> Result<RawValue> {
        self.advance(); // <
        let name = self.collect_identifier();
        if name.is_empty() {
            return Err(self.error_here("Expected a section name after '<'"));
        }
        if self.current() != Some('>') {
            return Err(self.error_here("Expected '>' to close the reference"));
        }
        self.advance();
        Ok(RawValue::Reference(name))
    }

    fn parse_variable(&mut self) -> Result<RawValue> {
        self.advance(); // $
        let name = self.collect_identifier();
        if name.is_empty() {
            return Err(self.error_here("Expected a variable name after '$'"));
        }
        Ok(RawValue::Variable(name))
    }

    fn parse_number(&mut self) -> Result<RawValue> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let mut prev: Option<char> = None;

        while let Some(c) = self.current() {
            let sign_ok = (c == '+' || c == '-')
                && (prev.is_none() || matches!(prev, Some('e') | Some('E')));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '_' || sign_ok {
                prev = Some(c);
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.input[start..self.pos];
        let cleaned = text.replace('_', "");
        let is_float = cleaned.contains(['.', 'e', 'E']);
        let parsed = if is_float {
            cleaned.parse::<f64>().ok().map(RawValue::Float)
        } else {
            cleaned.parse::<i64>().ok().map(RawValue::Integer)
        };

        parsed.ok_or_else(|| {
            Error::syntax(line, column, format!("'{}'", text), "Malformed number")
        })
    }

    fn parse_word(&mut self) -> Result<RawValue> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while self
            .current()
            .is_some_and(|c| is_ident_char(c) || c == '.')
        {
            self.advance();
        }
        let word = &self.input[start..self.pos];

        match word {
            "True" => Ok(RawValue::Bool(true)),
            "False" => Ok(RawValue::Bool(false)),
            "None" => Ok(RawValue::None),
            _ if word.contains('.') && word.split('.').all(is_identifier) => {
                Ok(RawValue::Symbol(word.to_string()))
            }
            _ if word.contains('.') => Err(Error::syntax(
                line,
                column,
                format!("'{}'", word),
                "Malformed dotted name",
            )),
            _ => Err(Error::syntax(
                line,
                column,
                format!("'{}'", word),
                "Bare identifier is not a value",
            )
            .with_help(format!(
                "Quote it (\"{}\"), reference a section (<{}>) or a variable (${})",
                word, word, word
            ))),
        }
    }
}

/// Move a template syntax error from its offset inside the string contents
/// to the matching position in the source text.
fn relocate(mut err: Error, positions: &[(usize, usize)], closing: (usize, usize)) -> Error {
    if let ErrorKind::Syntax { line, column, .. } = &mut err.kind {
        let (at_line, at_column) = column
            .checked_sub(1)
            .and_then(|index| positions.get(index).copied())
            .unwrap_or(closing);
        *line = at_line;
        *column = at_column;
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn value(text: &str) -> RawValue {
        parse_value(text).unwrap()
    }

    fn syntax_position(err: &Error) -> (usize, usize) {
        match &err.kind {
            ErrorKind::Syntax { line, column, .. } => (*line, *column),
            other => panic!("Expected Syntax, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_sections_and_entries() {
        let doc = parse(
            r#"
; experiment settings
[main]
name = "translation"
epochs=10

# comment
[vars]
x=2
"#,
        )
        .unwrap();

        let names: Vec<&str> = doc.sections().map(|s| s.name()).collect();
        assert_eq!(names, vec!["main", "vars"]);

        let main = doc.section("main").unwrap();
        assert_eq!(main.line(), 3);
        assert_eq!(
            main.get("name").unwrap().value,
            RawValue::String("translation".into())
        );
        assert_eq!(main.get("epochs").unwrap().line, 5);
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(value("42"), RawValue::Integer(42));
        assert_eq!(value("-3"), RawValue::Integer(-3));
        assert_eq!(value("0.5"), RawValue::Float(0.5));
        assert_eq!(value("1e-4"), RawValue::Float(1e-4));
        assert_eq!(value("2E+3"), RawValue::Float(2000.0));
        assert_eq!(value(".25"), RawValue::Float(0.25));
        assert_eq!(value("1_000"), RawValue::Integer(1000));
        assert_eq!(value("True"), RawValue::Bool(true));
        assert_eq!(value("False"), RawValue::Bool(false));
        assert_eq!(value("None"), RawValue::None);
    }

    #[test]
    fn test_parse_strings_keep_placeholders() {
        assert_eq!(
            value(r#""out/{TIME}-{name:.2f}""#),
            RawValue::String("out/{TIME}-{name:.2f}".into())
        );
        assert_eq!(
            value(r#""tab\tquote\" slash\\""#),
            RawValue::String("tab\tquote\" slash\\".into())
        );
    }

    #[test]
    fn test_parse_references_variables_symbols() {
        assert_eq!(value("<encoder>"), RawValue::Reference("encoder".into()));
        assert_eq!(
            value("$drop_keep_p"),
            RawValue::Variable("drop_keep_p".into())
        );
        assert_eq!(
            value("evaluators.BLEUEvaluator"),
            RawValue::Symbol("evaluators.BLEUEvaluator".into())
        );
        assert_eq!(
            value("neuralmonkey.vocabulary.from_wordlist"),
            RawValue::Symbol("neuralmonkey.vocabulary.from_wordlist".into())
        );
    }

    #[test]
    fn test_parse_nested_literals() {
        assert_eq!(
            value(r#"[("target", evaluators.BLEU), (<a>, $b,)]"#),
            RawValue::List(vec![
                RawValue::Tuple(vec![
                    RawValue::String("target".into()),
                    RawValue::Symbol("evaluators.BLEU".into()),
                ]),
                RawValue::Tuple(vec![
                    RawValue::Reference("a".into()),
                    RawValue::Variable("b".into()),
                ]),
            ])
        );
        assert_eq!(value("[]"), RawValue::List(vec![]));
        assert_eq!(value("( )"), RawValue::Tuple(vec![]));
        assert_eq!(value("(1)"), RawValue::Tuple(vec![RawValue::Integer(1)]));
    }

    #[test]
    fn test_multiline_list() {
        let doc = parse("[main]\nrunners=[<a>,\n         <b>]\nnext=1\n").unwrap();
        let main = doc.section("main").unwrap();

        assert_eq!(
            main.get("runners").unwrap().value,
            RawValue::List(vec![
                RawValue::Reference("a".into()),
                RawValue::Reference("b".into())
            ])
        );
        assert_eq!(main.get("next").unwrap().line, 4);
    }

    #[test]
    fn test_unterminated_string_reports_start() {
        let err = parse("[main]\nname=\"open\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 6));
        assert!(err.to_string().contains("Unterminated string"));
    }

    #[test]
    fn test_placeholder_error_points_into_source() {
        let err = parse("[main]\nname=\"abc{bad\"\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 10));
        assert!(err.to_string().contains("Unterminated placeholder"));

        let err = parse("[main]\nitems=[\"ok\",\n  \"x {bad\"]\n").unwrap_err();
        assert_eq!(syntax_position(&err), (3, 6));

        // Escapes count with their source width
        let err = parse("[main]\nx=\"\\\"q\\\" }\"\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 10));
    }

    #[test]
    fn test_unterminated_list_reports_start() {
        let err = parse("[main]\nitems=[1, 2\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 7));
    }

    #[test]
    fn test_unknown_leading_character() {
        let err = parse("[main]\nx=@oops\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 3));
        assert!(matches!(
            &err.kind,
            ErrorKind::Syntax { token, .. } if token == "'@oops'"
        ));
    }

    #[test]
    fn test_bare_identifier_rejected_with_help() {
        let err = parse("[main]\nx=GRU\n").unwrap_err();
        assert!(err.help.unwrap().contains("\"GRU\""));
    }

    #[test]
    fn test_trailing_content_rejected() {
        let err = parse("[main]\nx=1 2\n").unwrap_err();
        assert_eq!(syntax_position(&err), (2, 5));
    }

    #[test]
    fn test_missing_equals() {
        let err = parse("[main]\nx 1\n").unwrap_err();
        assert!(err.to_string().contains("Expected '='"));
    }

    #[test]
    fn test_entry_outside_section() {
        let err = parse("x=1\n").unwrap_err();
        assert_eq!(syntax_position(&err), (1, 1));
    }

    #[test]
    fn test_malformed_header() {
        assert!(parse("[main\nx=1\n").is_err());
        assert!(parse("[]\n").is_err());
        assert!(parse("[main] extra\n").is_err());
    }

    #[test]
    fn test_malformed_number() {
        let err = parse("[main]\nx=1.2.3\n").unwrap_err();
        assert!(matches!(
            &err.kind,
            ErrorKind::Syntax { token, .. } if token == "'1.2.3'"
        ));
    }

    #[test]
    fn test_duplicate_key_strict() {
        let err = parse("[main]\nx=1\nx=2\n").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::DuplicateKey {
                section: "main".into(),
                key: "x".into()
            }
        );
        assert_eq!(err.source_location.unwrap().line, 3);
    }

    #[test]
    fn test_duplicate_key_overwrite() {
        let doc =
            parse_with_policy("[main]\nx=1\nx=2\n", DuplicateKeyPolicy::Overwrite).unwrap();
        assert_eq!(
            doc.section("main").unwrap().get("x").unwrap().value,
            RawValue::Integer(2)
        );
    }

    #[test]
    fn test_duplicate_section() {
        let source = "[a]\nx=1\n[b]\n[a]\ny=2\n";
        let err = parse(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSection { name: "a".into() });

        let doc = parse_with_policy(source, DuplicateKeyPolicy::Overwrite).unwrap();
        let a = doc.section("a").unwrap();
        assert_eq!(a.entries().len(), 2);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("rnn_size"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a.b"));
    }
}
