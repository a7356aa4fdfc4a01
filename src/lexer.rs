use logos::Logos;

#[derive(Debug, PartialEq, Clone, Default)]
pub enum TokenizingError {
    NumberParseError,
    BadCharacter,
    #[default]
    Other,
}

impl From<std::num::ParseIntError> for TokenizingError {
    fn from(_: std::num::ParseIntError) -> Self {
        TokenizingError::NumberParseError
    }
}

impl From<std::num::ParseFloatError> for TokenizingError {
    fn from(_: std::num::ParseFloatError) -> Self {
        TokenizingError::NumberParseError
    }
}

impl From<std::convert::Infallible> for TokenizingError {
    fn from(_: std::convert::Infallible) -> Self {
        TokenizingError::Other
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn char_literal(slice: &str) -> Result<char, TokenizingError> {
    match &slice[1..] {
        "newline" => Ok('\n'),
        "space" => Ok(' '),
        "tab" => Ok('\t'),
        "return" => Ok('\r'),
        s => {
            let mut it = s.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(TokenizingError::BadCharacter),
            }
        }
    }
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(error = TokenizingError)]
#[logos(skip r"[ \t\r\n\f,]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("#{")]
    HashBrace,
    #[token("'")]
    Quote,
    #[token("#'")]
    VarQuote,
    #[token("^")]
    Caret,
    #[token("nil")]
    Nil,
    #[regex("(true|false)", |lex| lex.slice() == "true")]
    Boolean(bool),
    #[regex(r"[+-]?(0|[1-9][0-9]*)", |lex| lex.slice().parse(), priority = 4)]
    Integer(i64),
    #[regex(r"[+-]?[0-9]+(\.[0-9]+([eE][+-]?[0-9]+)?|[eE][+-]?[0-9]+)", |lex| lex.slice().parse(), priority = 3)]
    Float(f64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| { let s = lex.slice(); unescape(&s[1..s.len() - 1]) })]
    String(String),
    #[regex(r"\\(newline|space|tab|return|[^ \t\r\n\f])", |lex| char_literal(lex.slice()))]
    Char(char),
    #[regex(r#":[^ \t\r\n\f,()\[\]{}"';^\\]+"#, |lex| lex.slice()[1..].to_string())]
    Keyword(String),
    #[regex(r#"[^ \t\r\n\f,()\[\]{}"';^\\:#0-9][^ \t\r\n\f,()\[\]{}"';^\\]*"#, |lex| lex.slice().to_string(), priority = 1)]
    Symbol(String),
}

pub fn tokenize(prog: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, TokenizingError> {
    let lexer = Token::lexer(prog);
    lexer.spanned().map(|(token, span)| token.map(|t| (t, span))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn numbers_and_symbols() {
        assert_eq!(
            kinds("(+ -1 2.5 x)"),
            vec![
                Token::LParen,
                Token::Symbol("+".into()),
                Token::Integer(-1),
                Token::Float(2.5),
                Token::Symbol("x".into()),
                Token::RParen
            ]
        );
    }

    #[test]
    fn reader_punctuation() {
        assert_eq!(
            kinds("^long #{:a} 'q #'v \\a ; comment"),
            vec![
                Token::Caret,
                Token::Symbol("long".into()),
                Token::HashBrace,
                Token::Keyword("a".into()),
                Token::RBrace,
                Token::Quote,
                Token::Symbol("q".into()),
                Token::VarQuote,
                Token::Symbol("v".into()),
                Token::Char('a')
            ]
        );
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![Token::String("a\"b\n".into())]);
    }
}
