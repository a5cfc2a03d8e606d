//! Tokenizer for the contract language.

use crate::lang::CompileError;
use crate::types::numeric::U256;

/// A lexical token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(U256),
    HexBytes(Vec<u8>),

    // keywords
    AssetScript,
    TxScript,
    TxContract,
    Event,
    Emit,
    Fn,
    Pub,
    Payable,
    Mut,
    Let,
    If,
    Else,
    While,
    Return,
    Loop,
    True,
    False,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Arrow,
    Assign,
    Question,

    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

impl Token {
    /// Short description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{}`", name),
            Token::Number(n) => format!("number `{}`", n),
            Token::HexBytes(_) => "hex literal".to_string(),
            other => format!("`{:?}`", other),
        }
    }
}

/// A token with the line it starts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
}

/// Scans source text into tokens.
///
/// `//` starts a comment running to end of line. Numbers are decimal;
/// `0x...` literals become byte vectors.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, CompileError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut idx = 0;
    let mut line = 1;

    while idx < bytes.len() {
        let c = bytes[idx] as char;
        match c {
            '\n' => {
                line += 1;
                idx += 1;
            }
            ' ' | '\t' | '\r' => idx += 1,
            '/' if bytes.get(idx + 1) == Some(&b'/') => {
                while idx < bytes.len() && bytes[idx] != b'\n' {
                    idx += 1;
                }
            }
            _ => {
                let start_line = line;
                let token = scan_token(bytes, &mut idx, line)?;
                tokens.push(SpannedToken {
                    token,
                    line: start_line,
                });
            }
        }
    }
    Ok(tokens)
}

fn scan_token(bytes: &[u8], idx: &mut usize, line: usize) -> Result<Token, CompileError> {
    let c = bytes[*idx] as char;

    if c.is_ascii_alphabetic() || c == '_' {
        let start = *idx;
        while *idx < bytes.len() {
            let c = bytes[*idx] as char;
            if c.is_ascii_alphanumeric() || c == '_' {
                *idx += 1;
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&bytes[start..*idx]).expect("ascii identifier");
        return Ok(keyword_or_ident(word));
    }

    if c.is_ascii_digit() {
        return scan_number(bytes, idx, line);
    }

    let two = if *idx + 1 < bytes.len() {
        Some((bytes[*idx] as char, bytes[*idx + 1] as char))
    } else {
        None
    };
    if let Some(pair) = two {
        let token = match pair {
            ('-', '>') => Some(Token::Arrow),
            ('=', '=') => Some(Token::EqEq),
            ('!', '=') => Some(Token::NotEq),
            ('<', '=') => Some(Token::Le),
            ('>', '=') => Some(Token::Ge),
            ('&', '&') => Some(Token::AndAnd),
            ('|', '|') => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = token {
            *idx += 2;
            return Ok(token);
        }
    }

    let token = match c {
        '(' => Token::LParen,
        ')' => Token::RParen,
        '{' => Token::LBrace,
        '}' => Token::RBrace,
        '[' => Token::LBracket,
        ']' => Token::RBracket,
        ',' => Token::Comma,
        ':' => Token::Colon,
        ';' => Token::Semicolon,
        '.' => Token::Dot,
        '=' => Token::Assign,
        '?' => Token::Question,
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '/' => Token::Slash,
        '%' => Token::Percent,
        '<' => Token::Lt,
        '>' => Token::Gt,
        '!' => Token::Bang,
        other => {
            return Err(CompileError::at(
                line,
                format!("unexpected character `{}`", other),
            ))
        }
    };
    *idx += 1;
    Ok(token)
}

fn scan_number(bytes: &[u8], idx: &mut usize, line: usize) -> Result<Token, CompileError> {
    // 0x... hex byte literal
    if bytes[*idx] == b'0' && bytes.get(*idx + 1) == Some(&b'x') {
        *idx += 2;
        let start = *idx;
        while *idx < bytes.len() && (bytes[*idx] as char).is_ascii_hexdigit() {
            *idx += 1;
        }
        let digits = std::str::from_utf8(&bytes[start..*idx]).expect("ascii hex");
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(CompileError::at(
                line,
                format!("hex literal `0x{}` needs an even number of digits", digits),
            ));
        }
        let decoded = hex::decode(digits)
            .map_err(|e| CompileError::at(line, format!("bad hex literal: {}", e)))?;
        return Ok(Token::HexBytes(decoded));
    }

    let start = *idx;
    while *idx < bytes.len() && (bytes[*idx] as char).is_ascii_digit() {
        *idx += 1;
    }
    let digits = std::str::from_utf8(&bytes[start..*idx]).expect("ascii digits");
    let value = U256::from_dec_str(digits)
        .map_err(|_| CompileError::at(line, format!("number `{}` does not fit U256", digits)))?;
    Ok(Token::Number(value))
}

fn keyword_or_ident(word: &str) -> Token {
    match word {
        "AssetScript" => Token::AssetScript,
        "TxScript" => Token::TxScript,
        "TxContract" => Token::TxContract,
        "event" => Token::Event,
        "emit" => Token::Emit,
        "fn" => Token::Fn,
        "pub" => Token::Pub,
        "payable" => Token::Payable,
        "mut" => Token::Mut,
        "let" => Token::Let,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "return" => Token::Return,
        "loop" => Token::Loop,
        "true" => Token::True,
        "false" => Token::False,
        _ => Token::Ident(word.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("fn add payable total_1"),
            vec![
                Token::Fn,
                Token::Ident("add".into()),
                Token::Payable,
                Token::Ident("total_1".into()),
            ]
        );
    }

    #[test]
    fn scans_numbers_and_hex() {
        assert_eq!(
            kinds("42 0xdeadbeef"),
            vec![
                Token::Number(U256::from(42u64)),
                Token::HexBytes(vec![0xde, 0xad, 0xbe, 0xef]),
            ]
        );
    }

    #[test]
    fn scans_two_char_operators() {
        assert_eq!(
            kinds("-> == != <= >= && ||"),
            vec![
                Token::Arrow,
                Token::EqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("a // the rest is ignored != ==\nb"),
            vec![Token::Ident("a".into()), Token::Ident("b".into())]
        );
    }

    #[test]
    fn tracks_line_numbers() {
        let tokens = tokenize("a\nb\n  c").unwrap();
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_odd_hex_and_unknown_chars() {
        assert!(tokenize("0xabc").is_err());
        assert!(tokenize("a # b").is_err());
    }

    #[test]
    fn placeholder_token() {
        assert_eq!(kinds("?"), vec![Token::Question]);
    }
}
