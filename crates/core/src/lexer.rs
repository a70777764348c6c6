//! Tokenizer for murk source, including indentation tracking.

use murk_utils::errors::ParseError;
use std::fmt;

/// Words the grammar reserves. These are never valid identifiers.
pub const KEYWORDS: &[&str] = &[
    "def", "return", "if", "elif", "else", "while", "for", "in", "pass", "break", "continue",
    "and", "or", "not", "True", "False", "None",
];

/// Punctuation, longest spellings first so the scanner can take the first prefix match.
const PUNCTUATION: &[&str] = &[
    "//=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "%=", "//", "+", "-", "*", "%", "<", ">",
    "=", "(", ")", "[", "]", ",", ":",
];

/// Returns true if `word` is reserved.
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Str(String),
    Punct(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name '{name}'"),
            Self::Keyword(word) => write!(f, "keyword '{word}'"),
            Self::Int(value) => write!(f, "integer {value}"),
            Self::Str(_) => write!(f, "string literal"),
            Self::Punct(p) => write!(f, "'{p}'"),
            Self::Newline => write!(f, "end of line"),
            Self::Indent => write!(f, "indent"),
            Self::Dedent => write!(f, "dedent"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Splits source text into tokens, emitting `Indent`/`Dedent` around nested blocks.
///
/// Blank and comment-only lines produce nothing. Inside brackets newlines are ignored so
/// long calls and list literals may span lines.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut indents = vec![0usize];
    let mut depth = 0usize;
    let mut last_line = 1u32;

    for (idx, raw_line) in source.lines().enumerate() {
        let line = idx as u32 + 1;
        last_line = line;
        let chars: Vec<char> = raw_line.chars().collect();

        let mut pos = 0;
        let mut width = 0;
        while pos < chars.len() && (chars[pos] == ' ' || chars[pos] == '\t') {
            width = if chars[pos] == '\t' { (width / 8 + 1) * 8 } else { width + 1 };
            pos += 1;
        }
        if pos == chars.len() || chars[pos] == '#' {
            continue;
        }

        if depth == 0 {
            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                tokens.push(Token {
                    kind: TokenKind::Indent,
                    line,
                    column: 1,
                });
            } else if width < current {
                while indents.last().is_some_and(|&level| level > width) {
                    indents.pop();
                    tokens.push(Token {
                        kind: TokenKind::Dedent,
                        line,
                        column: 1,
                    });
                }
                if indents.last() != Some(&width) {
                    return Err(ParseError::InconsistentDedent { line });
                }
            }
        }

        scan_line(&chars, pos, line, &mut depth, &mut tokens)?;

        if depth == 0 {
            tokens.push(Token {
                kind: TokenKind::Newline,
                line,
                column: chars.len() as u32 + 1,
            });
        }
    }

    let end_line = last_line + 1;
    if depth > 0 {
        tokens.push(Token {
            kind: TokenKind::Newline,
            line: end_line,
            column: 1,
        });
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            kind: TokenKind::Dedent,
            line: end_line,
            column: 1,
        });
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        line: end_line,
        column: 1,
    });
    Ok(tokens)
}

fn scan_line(
    chars: &[char],
    mut pos: usize,
    line: u32,
    depth: &mut usize,
    tokens: &mut Vec<Token>,
) -> Result<(), ParseError> {
    while pos < chars.len() {
        let c = chars[pos];
        let column = pos as u32 + 1;

        if c == ' ' || c == '\t' || c == '\r' {
            pos += 1;
            continue;
        }
        if c == '#' {
            break;
        }

        if c.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '_') {
                pos += 1;
            }
            let literal: String = chars[start..pos].iter().filter(|&&d| d != '_').collect();
            let value = literal
                .parse::<i64>()
                .map_err(|_| ParseError::IntegerOverflow {
                    line,
                    column,
                    literal: literal.clone(),
                })?;
            tokens.push(Token {
                kind: TokenKind::Int(value),
                line,
                column,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            let kind = match KEYWORDS.iter().find(|&&k| k == word) {
                Some(keyword) => TokenKind::Keyword(*keyword),
                None => TokenKind::Name(word),
            };
            tokens.push(Token { kind, line, column });
            continue;
        }

        if c == '\'' || c == '"' {
            let (value, next) = scan_string(chars, pos, line)?;
            pos = next;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                line,
                column,
            });
            continue;
        }

        let rest: String = chars[pos..chars.len().min(pos + 3)].iter().collect();
        let Some(punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) else {
            return Err(ParseError::InvalidCharacter { line, column, ch: c });
        };
        match *punct {
            "(" | "[" => *depth += 1,
            ")" | "]" => *depth = depth.saturating_sub(1),
            _ => {}
        }
        pos += punct.len();
        tokens.push(Token {
            kind: TokenKind::Punct(*punct),
            line,
            column,
        });
    }
    Ok(())
}

fn scan_string(chars: &[char], start: usize, line: u32) -> Result<(String, usize), ParseError> {
    let quote = chars[start];
    let mut pos = start + 1;
    let mut value = String::new();
    while pos < chars.len() {
        let c = chars[pos];
        if c == quote {
            return Ok((value, pos + 1));
        }
        if c == '\\' && pos + 1 < chars.len() {
            let escaped = chars[pos + 1];
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '\\' | '\'' | '"' => value.push(escaped),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            pos += 2;
            continue;
        }
        value.push(c);
        pos += 1;
    }
    Err(ParseError::UnterminatedString {
        line,
        column: start as u32 + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn emits_indent_and_dedent() {
        let toks = kinds("def f():\n    return 1\nx = 2\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn longest_punctuation_wins() {
        let toks = kinds("a //= 2\n");
        assert_eq!(toks[1], TokenKind::Punct("//="));
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let toks = kinds("f(1,\n  2)\n");
        let newlines = toks.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let toks = kinds("# header\n\nx = 1  # trailing\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Punct("="),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let toks = kinds("s = 'a\\'b\\n'\n");
        assert_eq!(toks[2], TokenKind::Str("a'b\n".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("s = 'abc\n").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedString { line: 1, column: 5 });
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert_eq!(err, ParseError::InconsistentDedent { line: 3 });
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = tokenize("x = 99999999999999999999\n").unwrap_err();
        assert!(matches!(err, ParseError::IntegerOverflow { line: 1, .. }));
    }
}
