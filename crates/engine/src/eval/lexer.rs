// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tokenizer for condition and capture expressions.

use crate::error::{Error, Result};

/// One token of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer literal; `is_long` when suffixed with `L`/`l`.
    Int {
        /// The value bits.
        value: u64,
        /// `L` suffix present.
        is_long: bool,
    },
    /// Floating-point literal; `is_single` when suffixed with `f`/`F`.
    Float {
        /// The value.
        value: f64,
        /// `f` suffix present.
        is_single: bool,
    },
    /// Character literal.
    Char(char),
    /// String literal.
    Str(String),
    /// Identifier.
    Ident(String),
    /// `true`.
    True,
    /// `false`.
    False,
    /// `null`.
    Null,

    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `~`
    Tilde,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `&`
    Amp,
    /// `^`
    Caret,
    /// `|`
    Pipe,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
}

/// Tokenizes an expression string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let (token, consumed) = lex_number(&chars[pos..])?;
            tokens.push(token);
            pos += consumed;
            continue;
        }

        if c == '_' || c.is_alphabetic() {
            let start = pos;
            while pos < chars.len() && (chars[pos] == '_' || chars[pos].is_alphanumeric()) {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                _ => Token::Ident(word),
            });
            continue;
        }

        if c == '\'' {
            let (value, consumed) = lex_char(&chars[pos..])?;
            tokens.push(Token::Char(value));
            pos += consumed;
            continue;
        }

        if c == '"' {
            let (value, consumed) = lex_string(&chars[pos..])?;
            tokens.push(Token::Str(value));
            pos += consumed;
            continue;
        }

        let two = |offset: usize| chars.get(pos + offset).copied();
        let (token, consumed) = match c {
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '~' => (Token::Tilde, 1),
            '^' => (Token::Caret, 1),
            '?' => (Token::Question, 1),
            ':' => (Token::Colon, 1),
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '!' if two(1) == Some('=') => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '=' if two(1) == Some('=') => (Token::EqEq, 2),
            '<' if two(1) == Some('<') => (Token::Shl, 2),
            '<' if two(1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if two(1) == Some('>') && two(2) == Some('>') => (Token::UShr, 3),
            '>' if two(1) == Some('>') => (Token::Shr, 2),
            '>' if two(1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '&' if two(1) == Some('&') => (Token::AndAnd, 2),
            '&' => (Token::Amp, 1),
            '|' if two(1) == Some('|') => (Token::OrOr, 2),
            '|' => (Token::Pipe, 1),
            other => {
                return Err(Error::Compile(format!("unexpected character {other:?}")));
            }
        };
        tokens.push(token);
        pos += consumed;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char]) -> Result<(Token, usize)> {
    let mut pos = 0;

    // Hex prefix.
    if chars[0] == '0' && matches!(chars.get(1), Some('x') | Some('X')) {
        pos = 2;
        let start = pos;
        while pos < chars.len() && chars[pos].is_ascii_hexdigit() {
            pos += 1;
        }
        if pos == start {
            return Err(Error::Compile("hex literal has no digits".to_string()));
        }
        let digits: String = chars[start..pos].iter().collect();
        let value = u64::from_str_radix(&digits, 16)
            .map_err(|e| Error::Compile(format!("invalid hex literal: {e}")))?;
        let is_long = matches!(chars.get(pos), Some('L') | Some('l'));
        if is_long {
            pos += 1;
        }
        return Ok((Token::Int { value, is_long }, pos));
    }

    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }

    // Fraction or exponent makes it a float.
    let is_float = matches!(chars.get(pos), Some('.'))
        && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit());
    if is_float || matches!(chars.get(pos), Some('e') | Some('E')) {
        if is_float {
            pos += 1;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
        if matches!(chars.get(pos), Some('e') | Some('E')) {
            pos += 1;
            if matches!(chars.get(pos), Some('+') | Some('-')) {
                pos += 1;
            }
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
        let text: String = chars[..pos].iter().collect();
        let value =
            text.parse::<f64>().map_err(|e| Error::Compile(format!("invalid float: {e}")))?;
        let is_single = matches!(chars.get(pos), Some('f') | Some('F'));
        if is_single || matches!(chars.get(pos), Some('d') | Some('D')) {
            pos += 1;
        }
        return Ok((Token::Float { value, is_single }, pos));
    }

    // Float suffix directly on a digit run.
    if matches!(chars.get(pos), Some('f') | Some('F') | Some('d') | Some('D')) {
        let is_single = matches!(chars.get(pos), Some('f') | Some('F'));
        let text: String = chars[..pos].iter().collect();
        let value =
            text.parse::<f64>().map_err(|e| Error::Compile(format!("invalid float: {e}")))?;
        return Ok((Token::Float { value, is_single }, pos + 1));
    }

    let text: String = chars[..pos].iter().collect();

    // Leading zero means octal.
    let value = if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8)
            .map_err(|e| Error::Compile(format!("invalid octal literal: {e}")))?
    } else {
        text.parse::<u64>().map_err(|e| Error::Compile(format!("invalid integer: {e}")))?
    };

    let is_long = matches!(chars.get(pos), Some('L') | Some('l'));
    if is_long {
        pos += 1;
    }
    Ok((Token::Int { value, is_long }, pos))
}

fn lex_escape(chars: &[char], pos: &mut usize) -> Result<char> {
    *pos += 1; // consume backslash
    let c = *chars
        .get(*pos)
        .ok_or_else(|| Error::Compile("unterminated escape sequence".to_string()))?;
    *pos += 1;
    Ok(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        'u' => {
            let mut code = 0u32;
            for _ in 0..4 {
                let digit = chars
                    .get(*pos)
                    .and_then(|c| c.to_digit(16))
                    .ok_or_else(|| Error::Compile("invalid unicode escape".to_string()))?;
                code = code * 16 + digit;
                *pos += 1;
            }
            char::from_u32(code)
                .ok_or_else(|| Error::Compile("invalid unicode code point".to_string()))?
        }
        other => return Err(Error::Compile(format!("unknown escape sequence \\{other}"))),
    })
}

fn lex_char(chars: &[char]) -> Result<(char, usize)> {
    let mut pos = 1; // opening quote
    let c = *chars
        .get(pos)
        .ok_or_else(|| Error::Compile("unterminated char literal".to_string()))?;
    let value = if c == '\\' { lex_escape(chars, &mut pos)? } else {
        pos += 1;
        c
    };
    if chars.get(pos) != Some(&'\'') {
        return Err(Error::Compile("unterminated char literal".to_string()));
    }
    Ok((value, pos + 1))
}

fn lex_string(chars: &[char]) -> Result<(String, usize)> {
    let mut pos = 1; // opening quote
    let mut value = String::new();
    loop {
        let c = *chars
            .get(pos)
            .ok_or_else(|| Error::Compile("unterminated string literal".to_string()))?;
        match c {
            '"' => return Ok((value, pos + 1)),
            '\\' => value.push(lex_escape(chars, &mut pos)?),
            other => {
                value.push(other);
                pos += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(
            tokenize("42 7L 0x1f 010").unwrap(),
            vec![
                Token::Int { value: 42, is_long: false },
                Token::Int { value: 7, is_long: true },
                Token::Int { value: 0x1f, is_long: false },
                Token::Int { value: 8, is_long: false },
            ]
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(
            tokenize("2.5 1f 3.0d").unwrap(),
            vec![
                Token::Float { value: 2.5, is_single: false },
                Token::Float { value: 1.0, is_single: true },
                Token::Float { value: 3.0, is_single: false },
            ]
        );
    }

    #[test]
    fn test_char_and_string_escapes() {
        assert_eq!(
            tokenize(r#"'\n' "a\"b""#).unwrap(),
            vec![Token::Char('\n'), Token::Str("a\"b".to_string())]
        );
        assert_eq!(tokenize(r"'A'").unwrap(), vec![Token::Char('A')]);
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            tokenize(">>> >> > >= << <= && & || |").unwrap(),
            vec![
                Token::UShr,
                Token::Shr,
                Token::Gt,
                Token::Ge,
                Token::Shl,
                Token::Le,
                Token::AndAnd,
                Token::Amp,
                Token::OrOr,
                Token::Pipe,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            tokenize("true false null flag x1 _y").unwrap(),
            vec![
                Token::True,
                Token::False,
                Token::Null,
                Token::Ident("flag".to_string()),
                Token::Ident("x1".to_string()),
                Token::Ident("_y".to_string()),
            ]
        );
    }

    #[test]
    fn test_full_expression() {
        let tokens = tokenize("x > 10 ? a.b[0] : -1").unwrap();
        assert_eq!(tokens.len(), 13);
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(tokenize("x $ y"), Err(Error::Compile(_))));
    }
}
