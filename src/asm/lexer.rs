use super::AsmError;

/// Token kinds of the textual assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    /// `.name`
    Directive(String),
    Int(i64),
    Float(f64),
    Str(String),
    Colon,
    Newline,
    Eof,
}

/// Source location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A token with its kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The lexer for `.kasm` source.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, AsmError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_blanks_and_comments();

            let span = Span::new(self.line, self.column);

            let Some((_, ch)) = self.peek() else {
                tokens.push(Token::new(TokenKind::Newline, span));
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            };

            let kind = match ch {
                '\n' => {
                    self.advance();
                    TokenKind::Newline
                }
                ':' => {
                    self.advance();
                    TokenKind::Colon
                }
                '"' => self.scan_string()?,
                '.' => {
                    self.advance();
                    match self.scan_word() {
                        word if word.is_empty() => return Err(self.error("expected directive name")),
                        word => TokenKind::Directive(word.to_string()),
                    }
                }
                '-' | '0'..='9' => self.scan_number()?,
                c if is_word_start(c) => TokenKind::Ident(self.scan_word().to_string()),
                c => return Err(self.error(&format!("unexpected character '{}'", c))),
            };
            tokens.push(Token::new(kind, span));
        }

        Ok(tokens)
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn offset(&mut self) -> usize {
        self.peek().map(|(i, _)| i).unwrap_or(self.source.len())
    }

    fn skip_blanks_and_comments(&mut self) {
        while let Some((_, ch)) = self.peek() {
            match ch {
                ' ' | '\t' | '\r' | ',' => {
                    self.advance();
                }
                ';' => {
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_word(&mut self) -> &'a str {
        let start = self.offset();
        while let Some((_, ch)) = self.peek() {
            if is_word_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.offset();
        &self.source[start..end]
    }

    fn scan_number(&mut self) -> Result<TokenKind, AsmError> {
        let start = self.offset();
        if let Some((_, '-')) = self.peek() {
            self.advance();
        }
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.offset();
        let text = &self.source[start..end];
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let digits = digits.replace('_', "");

        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            let value = u64::from_str_radix(hex, 16)
                .map_err(|_| self.error(&format!("invalid hex number '{}'", text)))?;
            let value = if negative { -(value as i128) } else { value as i128 };
            let value = i64::try_from(value)
                .map_err(|_| self.error(&format!("hex number '{}' out of range", text)))?;
            return Ok(TokenKind::Int(value));
        }

        if digits.contains('.') || digits.contains('e') {
            let value: f64 = text
                .replace('_', "")
                .parse()
                .map_err(|_| self.error(&format!("invalid float '{}'", text)))?;
            return Ok(TokenKind::Float(value));
        }

        let value: i64 = text
            .replace('_', "")
            .parse()
            .map_err(|_| self.error(&format!("invalid number '{}'", text)))?;
        Ok(TokenKind::Int(value))
    }

    fn scan_string(&mut self) -> Result<TokenKind, AsmError> {
        self.advance(); // opening quote

        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some((_, '\n')) => return Err(self.error("unterminated string")),
                Some((_, '"')) => {
                    self.advance();
                    break;
                }
                Some((_, '\\')) => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '0')) => '\0',
                        Some((_, '\\')) => '\\',
                        Some((_, '"')) => '"',
                        Some((_, ch)) => {
                            return Err(self.error(&format!("invalid escape sequence '\\{}'", ch)));
                        }
                        None => return Err(self.error("unterminated string")),
                    };
                    self.advance();
                    value.push(escaped);
                }
                Some((_, ch)) => {
                    self.advance();
                    value.push(ch);
                }
            }
        }

        Ok(TokenKind::Str(value))
    }

    fn error(&self, message: &str) -> AsmError {
        AsmError::new(Span::new(self.line, self.column), message)
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_instruction_line() {
        assert_eq!(
            kinds("main: LoadLitInt -5 ; comment\n"),
            vec![
                TokenKind::Ident("main".to_string()),
                TokenKind::Colon,
                TokenKind::Ident("LoadLitInt".to_string()),
                TokenKind::Int(-5),
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("0x30 1_000 2.5 -0x1"),
            vec![
                TokenKind::Int(0x30),
                TokenKind::Int(1000),
                TokenKind::Float(2.5),
                TokenKind::Int(-1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hex_range() {
        assert_eq!(
            kinds("0x7FFFFFFFFFFFFFFF -0x8000000000000000")[..2],
            [TokenKind::Int(i64::MAX), TokenKind::Int(i64::MIN)]
        );
        let err = Lexer::new("0xFFFFFFFFFFFFFFFF").scan_tokens().unwrap_err();
        assert!(err.message.contains("out of range"), "{}", err.message);
        assert!(Lexer::new("-0x8000000000000001").scan_tokens().is_err());
    }

    #[test]
    fn test_directive_and_string() {
        assert_eq!(
            kinds(".entry main\n\"a\\n\\\"b\\\"\""),
            vec![
                TokenKind::Directive("entry".to_string()),
                TokenKind::Ident("main".to_string()),
                TokenKind::Newline,
                TokenKind::Str("a\n\"b\"".to_string()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans() {
        let tokens = Lexer::new("  Dup\n  Pop").scan_tokens().unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 3));
        assert_eq!(tokens[2].span, Span::new(2, 3));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = Lexer::new("Dup\n  \"open").scan_tokens().unwrap_err();
        assert_eq!(err.span.line, 2);

        let err = Lexer::new("Dup @").scan_tokens().unwrap_err();
        assert_eq!(err.span, Span::new(1, 5));
    }
}
