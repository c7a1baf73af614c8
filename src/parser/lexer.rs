//! Tokenizer for the restricted C subset the parser needs.
//!
//! Only enough structure is kept to find top-level function definitions:
//! identifiers, punctuation, literals (as opaque tokens) and comments. Comments
//! are emitted per physical line so the parser can tell which lines directly
//! precede a signature. Preprocessor lines are emitted as a single token.
//!
//! The lexer never fails: an unterminated comment runs to end of file and an
//! unterminated literal ends at the newline.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    /// Number, string or character literal (content is irrelevant to the parser)
    Literal(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Star,
    Comma,
    Semicolon,
    Equals,
    Ellipsis,
    Punct(char),
    /// Text of one comment line, delimiters stripped
    Comment(String),
    /// A whole `#...` line, continuations included
    Preprocessor,
}

impl Token {
    pub fn is_trivia(&self) -> bool {
        matches!(self, Token::Comment(_) | Token::Preprocessor)
    }

    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Ident(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Literal(s) => write!(f, "{}", s),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Star => write!(f, "*"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Equals => write!(f, "="),
            Token::Ellipsis => write!(f, "..."),
            Token::Punct(c) => write!(f, "{}", c),
            Token::Comment(text) => write!(f, "// {}", text),
            Token::Preprocessor => write!(f, "#"),
        }
    }
}

/// A token and the 1-based line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    /// True until a non-whitespace character is seen on the current line
    at_line_start: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            at_line_start: true,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.at_line_start = true;
        }
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_line_comment(&mut self) -> String {
        // Already consumed "//"
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        text.trim().to_string()
    }

    fn read_block_comment(&mut self, out: &mut Vec<Spanned>) {
        // Already consumed "/*"
        let mut text = String::new();
        let mut line = self.line;
        while let Some(ch) = self.advance() {
            if ch == '*' && self.current() == Some('/') {
                self.advance();
                break;
            }
            if ch == '\n' {
                out.push(Spanned {
                    token: Token::Comment(clean_block_line(&text)),
                    line,
                });
                text.clear();
                line = self.line;
            } else {
                text.push(ch);
            }
        }
        out.push(Spanned {
            token: Token::Comment(clean_block_line(&text)),
            line,
        });
    }

    fn skip_preprocessor(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\\' && self.peek(1) == Some('\n') {
                self.advance();
                self.advance();
                continue;
            }
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_quoted(&mut self, quote: char) -> String {
        let mut text = String::new();
        text.push(quote);
        self.advance();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
            if ch == '\\' {
                if let Some(escaped) = self.advance() {
                    text.push(escaped);
                }
            } else if ch == quote {
                break;
            }
        }
        text
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' && word.starts_with(|c: char| c.is_ascii_digit()) {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    /// Tokenize the whole input
    pub fn tokenize(&mut self) -> Vec<Spanned> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(ch) = self.current() else {
                break;
            };
            let line = self.line;
            let line_start = self.at_line_start;
            self.at_line_start = false;

            let token = match ch {
                '/' if self.peek(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    Token::Comment(self.read_line_comment())
                }
                '/' if self.peek(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    self.read_block_comment(&mut out);
                    continue;
                }
                '#' if line_start => {
                    self.skip_preprocessor();
                    Token::Preprocessor
                }
                '"' | '\'' => Token::Literal(self.read_quoted(ch)),
                '.' if self.peek(1) == Some('.') && self.peek(2) == Some('.') => {
                    self.advance();
                    self.advance();
                    self.advance();
                    Token::Ellipsis
                }
                c if c.is_alphabetic() || c == '_' => Token::Ident(self.read_word()),
                c if c.is_ascii_digit() => Token::Literal(self.read_word()),
                _ => {
                    self.advance();
                    match ch {
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        '{' => Token::LBrace,
                        '}' => Token::RBrace,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        '*' => Token::Star,
                        ',' => Token::Comma,
                        ';' => Token::Semicolon,
                        '=' => Token::Equals,
                        other => Token::Punct(other),
                    }
                }
            };
            out.push(Spanned { token, line });
        }
        out
    }
}

fn clean_block_line(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('*')
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}
