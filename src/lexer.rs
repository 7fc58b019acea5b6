//! Hand-rolled tokenizer. Stands in for the external preprocessor boundary:
//! produces a flat token stream with no trivia, ready for the parser.

use std::collections::HashSet;
use std::rc::Rc;

use once_cell::sync::Lazy;

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Punctuator,
    Number,
    StringLiteral,
    CharacterConstant,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub span: Span,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punctuator && self.value == p
    }

    pub fn is_keyword(&self, k: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value == k
    }
}

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "void", "bool", "char", "int64", "double", "struct", "namespace", "import", "if",
        "else", "while", "return", "asm",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.message, self.span)
    }
}

impl std::error::Error for LexError {}

/// Multi-character punctuators must be tried longest-first.
const PUNCTUATORS: &[&str] = &[
    "::", "->", "==", "!=", "<=", ">=", ";", ":", "{", "}", "(", ")", ",", "*", "&", "+",
    "-", "/", "<", ">", "=",
];

pub fn tokenize(file: &str, source: &str) -> Result<Vec<Token>, LexError> {
    let file: Rc<str> = Rc::from(file);
    let source_rc: Rc<str> = Rc::from(source);
    let bytes: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut col = 1usize;

    let make_span = |line: usize, col: usize| Span::new(line, col, file.clone(), source_rc.clone());

    while i < bytes.len() {
        let c = bytes[i];

        if c == '\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        // line comments
        if c == '/' && bytes.get(i + 1) == Some(&'/') {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
            continue;
        }
        // block comments
        if c == '/' && bytes.get(i + 1) == Some(&'*') {
            let start_line = line;
            let start_col = col;
            i += 2;
            col += 2;
            let mut closed = false;
            while i < bytes.len() {
                if bytes[i] == '*' && bytes.get(i + 1) == Some(&'/') {
                    i += 2;
                    col += 2;
                    closed = true;
                    break;
                }
                if bytes[i] == '\n' {
                    line += 1;
                    col = 1;
                } else {
                    col += 1;
                }
                i += 1;
            }
            if !closed {
                return Err(LexError {
                    message: "unterminated block comment".into(),
                    span: make_span(start_line, start_col),
                });
            }
            continue;
        }

        let start_line = line;
        let start_col = col;

        if c.is_ascii_digit() {
            let mut end = i;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if bytes.get(end) == Some(&'.') {
                end += 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
            }
            let text: String = bytes[i..end].iter().collect();
            col += end - i;
            i = end;
            tokens.push(Token {
                kind: TokenKind::Number,
                value: text,
                span: make_span(start_line, start_col),
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut end = i;
            while end < bytes.len() && (bytes[end].is_alphanumeric() || bytes[end] == '_') {
                end += 1;
            }
            let text: String = bytes[i..end].iter().collect();
            col += end - i;
            i = end;
            let kind = if KEYWORDS.contains(&text.as_str()) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            tokens.push(Token {
                kind,
                value: text,
                span: make_span(start_line, start_col),
            });
            continue;
        }

        if c == '"' {
            let mut end = i + 1;
            let mut raw = String::new();
            let mut closed = false;
            while end < bytes.len() {
                if bytes[end] == '\\' && end + 1 < bytes.len() {
                    raw.push(bytes[end]);
                    raw.push(bytes[end + 1]);
                    end += 2;
                    continue;
                }
                if bytes[end] == '"' {
                    closed = true;
                    end += 1;
                    break;
                }
                raw.push(bytes[end]);
                end += 1;
            }
            if !closed {
                return Err(LexError {
                    message: "unterminated string literal".into(),
                    span: make_span(start_line, start_col),
                });
            }
            let decoded = unescape::unescape(&raw).unwrap_or(raw);
            col += end - i;
            i = end;
            tokens.push(Token {
                kind: TokenKind::StringLiteral,
                value: decoded,
                span: make_span(start_line, start_col),
            });
            continue;
        }

        if c == '\'' {
            let mut end = i + 1;
            let mut raw = String::new();
            let mut closed = false;
            while end < bytes.len() {
                if bytes[end] == '\\' && end + 1 < bytes.len() {
                    raw.push(bytes[end]);
                    raw.push(bytes[end + 1]);
                    end += 2;
                    continue;
                }
                if bytes[end] == '\'' {
                    closed = true;
                    end += 1;
                    break;
                }
                raw.push(bytes[end]);
                end += 1;
            }
            if !closed {
                return Err(LexError {
                    message: "unterminated character constant".into(),
                    span: make_span(start_line, start_col),
                });
            }
            let decoded = unescape::unescape(&raw).unwrap_or(raw);
            col += end - i;
            i = end;
            tokens.push(Token {
                kind: TokenKind::CharacterConstant,
                value: decoded,
                span: make_span(start_line, start_col),
            });
            continue;
        }

        let mut matched = None;
        for p in PUNCTUATORS {
            let plen = p.chars().count();
            if bytes[i..].iter().take(plen).collect::<String>() == *p {
                matched = Some(*p);
                break;
            }
        }
        if let Some(p) = matched {
            let plen = p.chars().count();
            i += plen;
            col += plen;
            tokens.push(Token {
                kind: TokenKind::Punctuator,
                value: p.to_string(),
                span: make_span(start_line, start_col),
            });
            continue;
        }

        return Err(LexError {
            message: format!("unexpected character '{}'", c),
            span: make_span(start_line, start_col),
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_function() {
        let tokens = tokenize("t.c3", "int64 main() { return 42; }").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.value.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                "int64", "main", "(", ")", "{", "return", "42", ";", "}"
            ]
        );
    }

    #[test]
    fn test_keyword_vs_identifier() {
        let tokens = tokenize("t.c3", "struct Foo").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_string_literal_escape() {
        let tokens = tokenize("t.c3", r#""hi\n""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].value, "hi\n");
    }

    #[test]
    fn test_unterminated_string_errors() {
        let err = tokenize("t.c3", "\"abc").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_double_colon_punctuator() {
        let tokens = tokenize("t.c3", "a::b").unwrap();
        assert_eq!(tokens[1].value, "::");
    }
}
