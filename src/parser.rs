use std::fmt;
use std::ops::Range;

use crate::lexer::{self, Token};
use crate::value::{map_assoc, Keyword, Symbol, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub error: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}:{}", self.error, self.line, self.column)
    }
}

impl std::error::Error for ParseError {}

type Tokens = [(Token, Range<usize>)];

pub struct Parser {
    line_starts: Vec<usize>,
}

impl Parser {
    pub fn new(source: &str) -> Parser {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Parser { line_starts }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(l) => l,
            Err(l) => l - 1,
        };
        (line as u32 + 1, (offset - self.line_starts[line]) as u32 + 1)
    }

    fn error<T>(&self, msg: &str, offset: usize) -> Result<T, ParseError> {
        let (line, column) = self.position(offset);
        Err(ParseError { error: msg.to_string(), line, column })
    }

    fn parse_single(&self, tokens: &Tokens) -> Result<(Value, usize), ParseError> {
        let Some((token, span)) = tokens.first() else {
            return self.error("EOF while reading", self.line_starts.last().copied().unwrap_or(0));
        };
        match token {
            Token::Nil => Ok((Value::Nil, 1)),
            Token::Boolean(b) => Ok((Value::Bool(*b), 1)),
            Token::Integer(n) => Ok((Value::Long(*n), 1)),
            Token::Float(f) => Ok((Value::Double(*f), 1)),
            Token::String(s) => Ok((Value::from(s.as_str()), 1)),
            Token::Char(c) => Ok((Value::Char(*c), 1)),
            Token::Keyword(k) => Ok((Value::from(Keyword::intern(k)), 1)),
            Token::Symbol(s) => Ok((Value::from(Symbol::intern(s)), 1)),
            Token::Quote | Token::VarQuote => {
                let (form, consumed) = self.parse_single(&tokens[1..])?;
                let head = if *token == Token::Quote { "quote" } else { "var" };
                Ok((self.with_position(Value::list(vec![Value::sym(head), form]), span.start), consumed + 1))
            }
            Token::Caret => {
                let (meta, used) = self.parse_single(&tokens[1..])?;
                let (target, consumed) = self.parse_single(&tokens[1 + used..])?;
                let meta = match meta {
                    Value::Symbol(_) | Value::Str(_) => Value::map(vec![(Value::kw("tag"), meta)]),
                    Value::Keyword(_) => Value::map(vec![(meta, Value::Bool(true))]),
                    m @ Value::Map(_) => m,
                    _ => return self.error("Metadata must be Symbol, Keyword, String or Map", span.start),
                };
                if !matches!(target, Value::Symbol(_) | Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_)) {
                    return self.error("Metadata can only be applied to IMetas", span.start);
                }
                let mut merged = target.meta().cloned();
                if let Value::Map(m) = &meta {
                    for (k, v) in &m.entries {
                        merged = Some(map_assoc(merged.as_ref(), k.clone(), v.clone()));
                    }
                }
                Ok((target.with_meta(merged), used + consumed + 1))
            }
            Token::LParen => {
                let (items, consumed) = self.parse_delimited(&tokens[1..], &Token::RParen, span.start)?;
                Ok((self.with_position(Value::list(items), span.start), consumed + 1))
            }
            Token::LBracket => {
                let (items, consumed) = self.parse_delimited(&tokens[1..], &Token::RBracket, span.start)?;
                Ok((Value::vector(items), consumed + 1))
            }
            Token::HashBrace => {
                let (items, consumed) = self.parse_delimited(&tokens[1..], &Token::RBrace, span.start)?;
                Ok((Value::set(items), consumed + 1))
            }
            Token::LBrace => {
                let (items, consumed) = self.parse_delimited(&tokens[1..], &Token::RBrace, span.start)?;
                if items.len() % 2 != 0 {
                    return self.error("Map literal must contain an even number of forms", span.start);
                }
                let mut it = items.into_iter();
                let mut entries = Vec::new();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    entries.push((k, v));
                }
                Ok((Value::map(entries), consumed + 1))
            }
            Token::RParen | Token::RBracket | Token::RBrace => self.error("Unmatched delimiter", span.start),
        }
    }

    fn parse_delimited(&self, tokens: &Tokens, close: &Token, start: usize) -> Result<(Vec<Value>, usize), ParseError> {
        let mut items = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if &tokens[i].0 == close {
                return Ok((items, i + 1));
            }
            let (form, consumed) = self.parse_single(&tokens[i..])?;
            items.push(form);
            i += consumed;
        }
        self.error("EOF while reading, starting", start)
    }

    fn with_position(&self, form: Value, offset: usize) -> Value {
        let (line, column) = self.position(offset);
        let meta = map_assoc(None, Value::kw("line"), Value::Long(line as i64));
        let meta = map_assoc(Some(&meta), Value::kw("column"), Value::Long(column as i64));
        form.with_meta(Some(meta))
    }

    pub fn parse(&self, tokens: &Tokens) -> Result<Vec<Value>, ParseError> {
        let mut forms = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let (form, consumed) = self.parse_single(&tokens[i..])?;
            forms.push(form);
            i += consumed;
        }
        Ok(forms)
    }
}

pub fn read_all(source: &str) -> Result<Vec<Value>, ParseError> {
    let parser = Parser::new(source);
    let tokens = lexer::tokenize(source).map_err(|e| ParseError { error: format!("{:?}", e), line: 0, column: 0 })?;
    parser.parse(&tokens)
}

pub fn read_one(source: &str) -> Result<Value, ParseError> {
    let mut forms = read_all(source)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        n => Err(ParseError { error: format!("Expected one form, read {}", n), line: 1, column: 1 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_carry_positions() {
        let forms = read_all("1\n  (f x)").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1].meta_get("line").map(|v| v.to_string()), Some("2".into()));
        assert_eq!(forms[1].meta_get("column").map(|v| v.to_string()), Some("3".into()));
    }

    #[test]
    fn caret_hints_become_tag_meta() {
        let form = read_one("^long x").unwrap();
        assert_eq!(form.meta_get("tag").map(|v| v.to_string()), Some("long".into()));
        let form = read_one("^:dynamic *x*").unwrap();
        assert!(matches!(form.meta_get("dynamic"), Some(Value::Bool(true))));
    }

    #[test]
    fn quote_expands() {
        assert_eq!(read_one("'a").unwrap().to_string(), "(quote a)");
        assert_eq!(read_one("#'a").unwrap().to_string(), "(var a)");
    }

    #[test]
    fn unbalanced_input_fails() {
        assert!(read_all("(a b").is_err());
        assert!(read_all(")").is_err());
        assert!(read_all("{:a}").is_err());
    }
}
