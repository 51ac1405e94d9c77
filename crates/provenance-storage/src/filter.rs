//! Filter expressions compiled to parameterized SQL predicates.
//!
//! The store treats the compiler as an opaque translation step behind the
//! [`FilterCompiler`] trait. [`JsonFilterCompiler`] is the default: it
//! matches fields of the stored JSON document, e.g.
//!
//! ```text
//! kind = "VULNERABILITY" AND (resource.uri = "https://x/y" OR NOT remediation = "")
//! ```
//!
//! Field paths and literals are both bound as parameters; no caller text
//! ever becomes part of the SQL string.

use rusqlite::types::Value;

use provenance_core::error::ProvenanceError;

/// Maximum nesting of parentheses and `NOT`.
const MAX_DEPTH: usize = 32;

/// A compiled predicate over a table's `data` column.
///
/// `sql` contains one anonymous `?` placeholder per entry of `params`, in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Translates a caller's filter expression into a predicate fragment.
pub trait FilterCompiler: Send + Sync {
    /// Fails with `InvalidArgument` on input it cannot parse.
    fn compile(&self, expression: &str) -> Result<Predicate, ProvenanceError>;
}

/// Why a filter expression was rejected.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unsupported escape sequence \\{0}")]
    BadEscape(char),
    #[error("invalid number {0:?}")]
    BadNumber(String),
    #[error("invalid field path {0:?}")]
    BadPath(String),
    #[error("expected {expected}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
    },
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

impl From<FilterError> for ProvenanceError {
    fn from(err: FilterError) -> Self {
        ProvenanceError::InvalidArgument(format!("invalid filter: {}", err))
    }
}

/// Default compiler matching dotted paths into the stored JSON document.
///
/// Grammar, lowest precedence first:
///
/// ```text
/// expr    := and ("OR" and)*
/// and     := unary ("AND" unary)*
/// unary   := "NOT" unary | "(" expr ")" | path op literal
/// op      := "=" | "!=" | "<" | "<=" | ">" | ">="
/// literal := "string" | number | true | false
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFilterCompiler;

impl FilterCompiler for JsonFilterCompiler {
    fn compile(&self, expression: &str) -> Result<Predicate, ProvenanceError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            params: Vec::new(),
        };
        let sql = parser.expr(0)?;
        if let Some(token) = parser.peek() {
            return Err(FilterError::Expected {
                expected: "end of filter",
                found: token.describe(),
            }
            .into());
        }
        Ok(Predicate {
            sql,
            params: parser.params,
        })
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Int(i64),
    Real(f64),
    Op(CmpOp),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("{:?}", w),
            Token::Str(s) => format!("string {:?}", s),
            Token::Int(i) => i.to_string(),
            Token::Real(r) => r.to_string(),
            Token::Op(op) => op.sql().to_string(),
            Token::LParen => "\"(\"".to_string(),
            Token::RParen => "\")\"".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            // Missing fields extract as NULL; IS NOT keeps them matching `!=`.
            CmpOp::Ne => "IS NOT",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let mut out = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                out.push(Token::LParen);
            }
            ')' => {
                chars.next();
                out.push(Token::RParen);
            }
            '=' => {
                chars.next();
                out.push(Token::Op(CmpOp::Eq));
            }
            '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = matches!(chars.peek(), Some(&(_, '=')));
                if followed_by_eq {
                    chars.next();
                }
                let op = match (ch, followed_by_eq) {
                    ('!', true) => CmpOp::Ne,
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    _ => return Err(FilterError::UnexpectedChar(ch, offset)),
                };
                out.push(Token::Op(op));
            }
            '"' => {
                chars.next();
                out.push(Token::Str(read_string(&mut chars)?));
            }
            c if c == '-' || c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c == '-' || c == '.' || c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(parse_number(&text)?);
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c == '_' || c == '.' || c.is_ascii_alphanumeric() {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Token::Word(word));
            }
            other => return Err(FilterError::UnexpectedChar(other, offset)),
        }
    }

    Ok(out)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<String, FilterError> {
    let mut value = String::new();
    let mut escaped = false;
    for (_, ch) in chars.by_ref() {
        if escaped {
            match ch {
                '\\' => value.push('\\'),
                '"' => value.push('"'),
                'n' => value.push('\n'),
                't' => value.push('\t'),
                other => return Err(FilterError::BadEscape(other)),
            }
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return Ok(value),
            c => value.push(c),
        }
    }
    Err(FilterError::UnterminatedString)
}

fn parse_number(text: &str) -> Result<Token, FilterError> {
    if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Token::Real)
            .ok_or_else(|| FilterError::BadNumber(text.to_string()))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| FilterError::BadNumber(text.to_string()))
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: Vec<Value>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expr(&mut self, depth: usize) -> Result<String, FilterError> {
        let mut sql = self.and(depth)?;
        while self.eat_keyword("OR") {
            let rhs = self.and(depth)?;
            sql = format!("{} OR {}", sql, rhs);
        }
        Ok(sql)
    }

    fn and(&mut self, depth: usize) -> Result<String, FilterError> {
        let mut sql = self.unary(depth)?;
        while self.eat_keyword("AND") {
            let rhs = self.unary(depth)?;
            sql = format!("{} AND {}", sql, rhs);
        }
        Ok(sql)
    }

    fn unary(&mut self, depth: usize) -> Result<String, FilterError> {
        if depth >= MAX_DEPTH {
            return Err(FilterError::TooDeep(MAX_DEPTH));
        }
        if self.eat_keyword("NOT") {
            let inner = self.unary(depth + 1)?;
            return Ok(format!("NOT ({})", inner));
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.expr(depth + 1)?;
            return match self.next() {
                Some(Token::RParen) => Ok(format!("({})", inner)),
                other => Err(expected("\")\"", other)),
            };
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<String, FilterError> {
        let path = match self.next() {
            Some(Token::Word(word)) if !is_keyword(&word) => json_path(&word)?,
            other => return Err(expected("field path", other)),
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(expected("comparison operator", other)),
        };
        let literal = match self.next() {
            Some(Token::Str(s)) => Value::Text(s),
            Some(Token::Int(i)) => Value::Integer(i),
            Some(Token::Real(r)) => Value::Real(r),
            // json_extract reports JSON booleans as 1 and 0.
            Some(Token::Word(w)) if w == "true" => Value::Integer(1),
            Some(Token::Word(w)) if w == "false" => Value::Integer(0),
            other => return Err(expected("literal", other)),
        };
        self.params.push(Value::Text(path));
        self.params.push(literal);
        Ok(format!("json_extract(data, ?) {} ?", op.sql()))
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(word, "AND" | "OR" | "NOT")
}

fn expected(what: &'static str, found: Option<Token>) -> FilterError {
    FilterError::Expected {
        expected: what,
        found: found
            .map(|t| t.describe())
            .unwrap_or_else(|| "end of filter".to_string()),
    }
}

/// `resource.uri` -> `$.resource.uri`, validating every segment.
fn json_path(word: &str) -> Result<String, FilterError> {
    let valid = word.split('.').all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    });
    if !valid {
        return Err(FilterError::BadPath(word.to_string()));
    }
    Ok(format!("$.{}", word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(expr: &str) -> Result<Predicate, ProvenanceError> {
        JsonFilterCompiler.compile(expr)
    }

    #[test]
    fn test_single_comparison() {
        let p = compile(r#"kind = "VULNERABILITY""#).unwrap();
        assert_eq!(p.sql, "json_extract(data, ?) = ?");
        assert_eq!(
            p.params,
            vec![
                Value::Text("$.kind".to_string()),
                Value::Text("VULNERABILITY".to_string())
            ]
        );
    }

    #[test]
    fn test_precedence_and_grouping() {
        let p = compile(r#"a = 1 OR b = 2 AND NOT (c.d != "x" OR e >= 2.5)"#).unwrap();
        assert_eq!(
            p.sql,
            "json_extract(data, ?) = ? OR json_extract(data, ?) = ? AND \
             NOT ((json_extract(data, ?) IS NOT ? OR json_extract(data, ?) >= ?))"
        );
        assert_eq!(p.params.len(), 8);
        assert_eq!(p.params[4], Value::Text("$.c.d".to_string()));
        assert_eq!(p.params[7], Value::Real(2.5));
    }

    #[test]
    fn test_literals() {
        let p = compile(r#"x < -3 AND y = true AND z = "say \"hi\"""#).unwrap();
        assert_eq!(p.params[1], Value::Integer(-3));
        assert_eq!(p.params[3], Value::Integer(1));
        assert_eq!(p.params[5], Value::Text("say \"hi\"".to_string()));
    }

    #[test]
    fn test_caller_text_never_reaches_sql() {
        let p = compile(r#"name = "'; DROP TABLE notes; --""#).unwrap();
        assert!(!p.sql.contains("DROP"));
        assert!(!p.sql.contains("name"));
    }

    #[test]
    fn test_rejects_malformed() {
        for expr in [
            "kind",
            "kind =",
            "= \"x\"",
            "kind = \"unterminated",
            "kind = \"bad \\q escape\"",
            "(kind = 1",
            "kind = 1)",
            "kind = 1 AND",
            "kind ~ 1",
            "a..b = 1",
            "a = 1 b = 2",
            "AND = 1",
            "kind = 1.2.3",
            "kind = other",
        ] {
            let err = compile(expr).unwrap_err();
            assert!(
                matches!(err, ProvenanceError::InvalidArgument(_)),
                "{expr:?} should be rejected, got {err}"
            );
        }
    }

    #[test]
    fn test_rejects_runaway_nesting() {
        let expr = format!("{}a = 1{}", "(".repeat(40), ")".repeat(40));
        let err = compile(&expr).unwrap_err();
        assert!(err.to_string().contains("nests deeper"));
    }

    #[test]
    fn test_predicate_runs_against_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"CREATE TABLE t (id INTEGER PRIMARY KEY, data TEXT NOT NULL);
               INSERT INTO t (data) VALUES ('{"kind":"BUILD","resource":{"uri":"a"},"ok":true}');
               INSERT INTO t (data) VALUES ('{"kind":"VULNERABILITY","resource":{"uri":"b"},"ok":false}');
               INSERT INTO t (data) VALUES ('{"kind":"VULNERABILITY","resource":{"uri":"c"}}');"#,
        )
        .unwrap();

        let count = |expr: &str| -> i64 {
            let p = compile(expr).unwrap();
            conn.query_row(
                &format!("SELECT COUNT(*) FROM t WHERE {}", p.sql),
                rusqlite::params_from_iter(p.params.iter()),
                |row| row.get(0),
            )
            .unwrap()
        };

        assert_eq!(count(r#"kind = "VULNERABILITY""#), 2);
        assert_eq!(count(r#"kind = "VULNERABILITY" AND resource.uri = "c""#), 1);
        assert_eq!(count("ok = true"), 1);
        assert_eq!(count("ok != true"), 2);
        assert_eq!(count(r#"NOT kind = "BUILD""#), 2);
    }
}
