//! Annotation parser.
//!
//! Finds top-level function definitions in a C source file, reads the
//! directive comments directly above each one and maps its signature through
//! the type mapper. Anything that is not a function definition (prototypes,
//! globals, struct definitions, preprocessor lines) is skipped. A function that
//! cannot be handled produces a diagnostic and the walk continues.

pub mod annotations;
pub mod descriptor;
pub mod lexer;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{is_qualifier, map_declared, DeclaredType, FfiType};

pub use descriptor::{Annotations, CostHint, FunctionDescriptor, SourceLocation, SyncPolicy};
use lexer::{Lexer, Spanned, Token};

/// Descriptors for every recognized function plus per-function diagnostics
/// (`Parse` and `UnsupportedType`) for the rest
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub descriptors: Vec<FunctionDescriptor>,
    pub diagnostics: Vec<BridgeError>,
}

impl ParseOutcome {
    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }
}

const STORAGE: &[&str] = &[
    "static",
    "inline",
    "extern",
    "__inline",
    "__inline__",
    "_Noreturn",
];

const TYPE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
    "bool", "struct", "union", "enum", "const", "volatile", "restrict",
];

const ATTRIBUTE_WORDS: &[&str] = &["__attribute__", "__declspec", "__asm__", "asm"];

/// Read and parse a source file
pub fn parse_file(path: &Path) -> BridgeResult<ParseOutcome> {
    let text = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
    Ok(parse_source(path, &text))
}

/// Parse source text; `path` is only used for locations
pub fn parse_source(path: impl AsRef<Path>, text: &str) -> ParseOutcome {
    let path = path.as_ref();
    let tokens = Lexer::new(text).tokenize();

    let mut comment_lines: HashMap<usize, String> = HashMap::new();
    let mut code_lines: HashSet<usize> = HashSet::new();
    for tok in &tokens {
        match &tok.token {
            Token::Comment(text) => {
                let entry = comment_lines.entry(tok.line).or_default();
                if !entry.is_empty() {
                    entry.push(' ');
                }
                entry.push_str(text);
            }
            _ => {
                code_lines.insert(tok.line);
            }
        }
    }

    let mut parser = SourceParser {
        path,
        comment_lines,
        code_lines,
        seen: HashSet::new(),
        outcome: ParseOutcome::default(),
    };

    let mut depth = 0usize;
    let mut parens = 0usize;
    let mut header: Vec<&Spanned> = Vec::new();

    for tok in tokens.iter().filter(|t| !matches!(t.token, Token::Comment(_))) {
        if depth > 0 {
            match tok.token {
                Token::LBrace => depth += 1,
                Token::RBrace => depth -= 1,
                _ => {}
            }
            continue;
        }
        match tok.token {
            Token::Preprocessor | Token::RBrace => header.clear(),
            Token::Semicolon if parens == 0 => header.clear(),
            Token::LBrace if parens == 0 => {
                if is_linkage_block(&header) {
                    header.clear();
                    continue;
                }
                let stripped = strip_attributes(&header);
                if looks_like_definition(&stripped) {
                    parser.function(&stripped);
                }
                header.clear();
                depth = 1;
            }
            Token::LParen => {
                parens += 1;
                header.push(tok);
            }
            Token::RParen => {
                parens = parens.saturating_sub(1);
                header.push(tok);
            }
            _ => header.push(tok),
        }
    }

    parser.outcome
}

struct SourceParser<'a> {
    path: &'a Path,
    comment_lines: HashMap<usize, String>,
    code_lines: HashSet<usize>,
    seen: HashSet<String>,
    outcome: ParseOutcome,
}

impl SourceParser<'_> {
    fn function(&mut self, header: &[&Spanned]) {
        let Some(first) = header.first() else {
            return;
        };
        let location = SourceLocation::new(self.path, first.line);
        match self.build(header, &location) {
            Ok(desc) => {
                debug!(
                    target: "nativebridge::parser",
                    function = desc.name(),
                    location = %location,
                    signature = %desc,
                    "Parsed function"
                );
                self.outcome.descriptors.push(desc);
            }
            Err(err) => self.outcome.diagnostics.push(err),
        }
    }

    fn build(
        &mut self,
        header: &[&Spanned],
        location: &SourceLocation,
    ) -> Result<FunctionDescriptor, BridgeError> {
        let parse_err = |message: String| BridgeError::Parse {
            function: None,
            location: location.clone(),
            message,
        };

        let open = header
            .iter()
            .position(|t| t.token == Token::LParen)
            .ok_or_else(|| parse_err("missing parameter list".to_string()))?;
        let name = open
            .checked_sub(1)
            .and_then(|i| header[i].token.ident())
            .filter(|n| !is_reserved(n))
            .ok_or_else(|| parse_err("unrecognized function declarator".to_string()))?
            .to_string();
        let parse_err = |message: String| BridgeError::Parse {
            function: Some(name.clone()),
            location: location.clone(),
            message,
        };

        let close = matching_paren(header, open)
            .ok_or_else(|| parse_err(format!("unbalanced parameter list in '{}'", name)))?;
        if close + 1 != header.len() {
            return Err(parse_err(format!(
                "unrecognized declarator after parameter list of '{}'",
                name
            )));
        }

        if !self.seen.insert(name.clone()) {
            return Err(parse_err(format!("duplicate definition of '{}'", name)));
        }

        let unsupported = |type_text: String| BridgeError::UnsupportedType {
            function: name.clone(),
            location: location.clone(),
            type_text,
        };

        let ret_words: Vec<String> = header[..open - 1]
            .iter()
            .map(|t| t.token.to_string())
            .filter(|w| !STORAGE.contains(&w.as_str()))
            .collect();
        if ret_words.is_empty() {
            return Err(parse_err(format!("missing return type for '{}'", name)));
        }
        let returns = map_declared(&as_strs(&ret_words)).map_err(unsupported)?;

        let mut params = Vec::new();
        let groups = split_params(&header[open + 1..close]);
        let is_void_list = groups.len() == 1
            && groups[0].len() == 1
            && groups[0][0].token.ident() == Some("void");
        if !is_void_list {
            for group in groups {
                params.push(self.param(&name, group, &parse_err, &unsupported)?);
            }
        }

        let annotations = annotations::extract(self.comment_block(location.line))
            .map_err(|msg| parse_err(format!("in annotations of '{}': {}", name, msg)))?;

        let widths = params.iter().map(|(p, _)| p.width).collect();
        let params = params.into_iter().map(|(p, n)| (p.ty, n)).collect();
        Ok(FunctionDescriptor::new(
            name,
            returns.ty,
            params,
            annotations,
            location.clone(),
        )
        .with_widths(returns.width, widths))
    }

    fn param(
        &self,
        function: &str,
        tokens: &[&Spanned],
        parse_err: &dyn Fn(String) -> BridgeError,
        unsupported: &dyn Fn(String) -> BridgeError,
    ) -> Result<(DeclaredType, Option<String>), BridgeError> {
        if tokens.is_empty() {
            return Err(parse_err(format!("empty parameter in '{}'", function)));
        }
        if tokens.iter().any(|t| t.token == Token::Ellipsis) {
            return Err(parse_err(format!(
                "variadic parameter list in '{}' cannot be bound",
                function
            )));
        }
        if tokens.iter().any(|t| t.token == Token::LParen) {
            let text = as_strs(&words(tokens)).join(" ");
            return Err(unsupported(text));
        }

        // Trailing `[N]` groups decay to pointers
        let mut end = tokens.len();
        let mut arrays = 0;
        while end > 0 && tokens[end - 1].token == Token::RBracket {
            match tokens[..end].iter().rposition(|t| t.token == Token::LBracket) {
                Some(open) => {
                    end = open;
                    arrays += 1;
                }
                None => return Err(parse_err(format!("unbalanced '[' in '{}'", function))),
            }
        }
        let tokens = &tokens[..end];

        let mut type_words = words(tokens);
        let mut param_name = None;
        if let Some(Token::Ident(last)) = tokens.last().map(|t| &t.token) {
            let rest = &type_words[..type_words.len() - 1];
            let has_type = rest.iter().any(|w| {
                !is_qualifier(w) && !matches!(w.as_str(), "struct" | "union" | "enum")
            });
            if !is_reserved(last) && has_type {
                param_name = Some(last.clone());
                type_words.pop();
            }
        }
        type_words.extend(std::iter::repeat("*".to_string()).take(arrays));

        let declared = map_declared(&as_strs(&type_words)).map_err(unsupported)?;
        if declared.ty == FfiType::Void {
            return Err(unsupported("void".to_string()));
        }
        Ok((declared, param_name))
    }

    /// Comment lines directly above `line`, top to bottom, stopping at the
    /// first blank or code line
    fn comment_block(&self, line: usize) -> Vec<&str> {
        let mut block = Vec::new();
        let mut current = line;
        while current > 1 {
            current -= 1;
            if self.code_lines.contains(&current) {
                break;
            }
            match self.comment_lines.get(&current) {
                Some(text) => block.push(text.as_str()),
                None => break,
            }
        }
        block.reverse();
        block
    }
}

fn words(tokens: &[&Spanned]) -> Vec<String> {
    tokens.iter().map(|t| t.token.to_string()).collect()
}

fn as_strs(words: &[String]) -> Vec<&str> {
    words.iter().map(String::as_str).collect()
}

fn is_reserved(word: &str) -> bool {
    TYPE_WORDS.contains(&word) || STORAGE.contains(&word) || is_qualifier(word)
}

/// `extern "C" {` opens a linkage block, not a body
fn is_linkage_block(header: &[&Spanned]) -> bool {
    matches!(
        header,
        [kw, lit] if kw.token.ident() == Some("extern") && matches!(lit.token, Token::Literal(_))
    )
}

fn looks_like_definition(header: &[&Spanned]) -> bool {
    let Some(open) = header.iter().position(|t| t.token == Token::LParen) else {
        return false;
    };
    matches!(header.last().map(|t| &t.token), Some(Token::RParen))
        && !header[..open].iter().any(|t| t.token == Token::Equals)
        && !header.iter().any(|t| t.token.ident() == Some("typedef"))
}

fn strip_attributes<'a>(header: &[&'a Spanned]) -> Vec<&'a Spanned> {
    let mut out = Vec::with_capacity(header.len());
    let mut i = 0;
    while i < header.len() {
        let tok = header[i];
        let is_attr = tok
            .token
            .ident()
            .is_some_and(|w| ATTRIBUTE_WORDS.contains(&w));
        if is_attr && header.get(i + 1).is_some_and(|t| t.token == Token::LParen) {
            match matching_paren(header, i + 1) {
                Some(close) => {
                    i = close + 1;
                    continue;
                }
                None => break,
            }
        }
        out.push(tok);
        i += 1;
    }
    out
}

fn matching_paren(tokens: &[&Spanned], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match tok.token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_params<'a, 'b>(tokens: &'b [&'a Spanned]) -> Vec<&'b [&'a Spanned]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.token {
            Token::LParen | Token::LBracket => depth += 1,
            Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                groups.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&tokens[start..]);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{IntWidth, Pointee};

    const KERNELS: &str = r#"
#include <stdint.h>

struct pair { int a; int b; };
static const int table[] = { 1, 2, 3 };

int prototype_only(int x);

// @sync
// @cost low

// Fill a buffer with a byte value
void fill_u8(char* out, int n, int value) {
    for (int i = 0; i < n; i++) { out[i] = (char)value; }
}

// @cost high
// @sync
long loop_sum(long n) {
    long s = 0;
    for (long i = 0; i < n; i++) s += i;
    return s;
}

static int hidden_helper(int x) { return x * 2; }

int pair_sum(struct pair p) { return p.a + p.b; }

int first_of(int n, ...) { return n; }

/* @async */
double dot_f64(const double* a, const double b[], int n) {
    double acc = 0.0;
    for (int i = 0; i < n; i++) acc += a[i] * b[i];
    return acc;
}

int counter_bump(void) { return 1; }
"#;

    fn outcome() -> ParseOutcome {
        parse_source("kernels.c", KERNELS)
    }

    #[test]
    fn test_finds_definitions_only() {
        let out = outcome();
        let names: Vec<&str> = out.descriptors.iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec!["fill_u8", "loop_sum", "hidden_helper", "dot_f64", "counter_bump"]
        );
    }

    #[test]
    fn test_blank_line_breaks_directive_block() {
        let out = outcome();
        let fill = out.get("fill_u8").unwrap();
        // Directives are separated from the signature by a blank line
        assert_eq!(fill.cost(), CostHint::Unspecified);
        assert_eq!(fill.policy(), SyncPolicy::Sync);
    }

    #[test]
    fn test_directives_and_location() {
        let out = outcome();
        let sum = out.get("loop_sum").unwrap();
        assert_eq!(sum.cost(), CostHint::High);
        assert_eq!(sum.policy(), SyncPolicy::Sync);
        assert_eq!(sum.return_type(), &FfiType::Int64);
        assert_eq!(sum.params(), &[FfiType::Int64]);
        assert_eq!(sum.location().line, 19);
    }

    #[test]
    fn test_block_comment_async_and_array_params() {
        let out = outcome();
        let dot = out.get("dot_f64").unwrap();
        assert_eq!(dot.policy(), SyncPolicy::Async);
        let f64_ptr = FfiType::Pointer(Pointee::Element(Box::new(FfiType::Float64)));
        assert_eq!(dot.params(), &[f64_ptr.clone(), f64_ptr, FfiType::Int32]);
        assert_eq!(
            dot.param_names(),
            &[Some("a".to_string()), Some("b".to_string()), Some("n".to_string())]
        );
    }

    #[test]
    fn test_void_parameter_list() {
        let out = outcome();
        assert_eq!(out.get("counter_bump").unwrap().arity(), 0);
    }

    #[test]
    fn test_per_function_diagnostics() {
        let out = outcome();
        assert_eq!(out.diagnostics.len(), 2);
        assert!(out.diagnostics.iter().all(|d| d.kind() == ErrorKind::Skipped));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            BridgeError::UnsupportedType { function, type_text, .. }
                if function == "pair_sum" && type_text == "struct pair"
        )));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            BridgeError::Parse { message, .. } if message.contains("variadic")
        )));
    }

    #[test]
    fn test_malformed_annotation_skips_only_that_function() {
        let src = "// @cost medium\nint a(void) { return 1; }\nint b(void) { return 2; }\n";
        let out = parse_source("x.c", src);
        assert_eq!(out.descriptors.len(), 1);
        assert_eq!(out.descriptors[0].name(), "b");
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].to_string().contains("x.c:2"));
        assert!(matches!(
            &out.diagnostics[0],
            BridgeError::Parse { function: Some(f), .. } if f == "a"
        ));
    }

    #[test]
    fn test_unnamed_params_and_attributes() {
        let src = "__attribute__((visibility(\"default\"))) unsigned int f(unsigned int, char*) { return 0; }";
        let out = parse_source("x.c", src);
        let f = out.get("f").unwrap();
        assert_eq!(f.params(), &[FfiType::Int32, FfiType::Pointer(Pointee::Byte)]);
        assert_eq!(f.param_names(), &[None, None]);
    }

    #[test]
    fn test_narrow_integer_widths_recorded() {
        let src = "uint32_t crc32_update(uint32_t crc, uint8_t data) { return crc ^ data; }\n\
                   signed char neg_i8(signed char x) { return -x; }\n";
        let out = parse_source("x.c", src);
        let update = out.get("crc32_update").unwrap();
        assert_eq!(update.params(), &[FfiType::Int32, FfiType::Int32]);
        assert_eq!(update.param_widths(), &[None, Some(IntWidth::U8)]);
        assert_eq!(update.return_width(), None);
        let neg = out.get("neg_i8").unwrap();
        assert_eq!(neg.return_width(), Some(IntWidth::I8));
        assert_eq!(neg.param_widths(), &[Some(IntWidth::I8)]);
    }

    #[test]
    fn test_duplicate_definition() {
        let src = "int f(void) { return 1; }\nint f(void) { return 2; }\n";
        let out = parse_source("x.c", src);
        assert_eq!(out.descriptors.len(), 1);
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_trailing_comment_on_code_line_is_not_a_directive() {
        let src = "int x = 1; // @async\nint f(void) { return x; }\n";
        let out = parse_source("x.c", src);
        assert_eq!(out.get("f").unwrap().policy(), SyncPolicy::Sync);
    }
}
