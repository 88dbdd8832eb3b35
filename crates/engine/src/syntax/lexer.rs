//! The lexer turns source text into a stream of spanned [`Token`]s.
//!
//! It is built with [`chumsky`], and recovers from unexpected characters by
//! skipping them and retrying, so a stray character produces one error rather
//! than ending tokenisation.

use chumsky::{
    error::{Simple, SimpleReason},
    prelude::*,
};

use crate::syntax::token::{Keyword, Punct, Spanned, Token};

/// Simply to avoid typing out the whole parser type parameter specification
/// every single time given it only varies in one parameter.
pub trait LexParser<T>: Parser<char, T, Error = Simple<char>> {}

/// A blanket impl to make this work.
impl<T, U> LexParser<T> for U where U: Parser<char, T, Error = Simple<char>> {}

/// Parses a hexadecimal literal such as `0xff`.
#[must_use]
pub fn hex() -> impl LexParser<Token> {
    just("0x")
        .ignore_then(filter(char::is_ascii_hexdigit).repeated().at_least(1))
        .collect::<String>()
        .map(Token::Hex)
}

/// Parses a decimal literal, allowing `_` separators after the first digit.
#[must_use]
pub fn int() -> impl LexParser<Token> {
    filter(char::is_ascii_digit)
        .chain(filter(|c: &char| c.is_ascii_digit() || *c == '_').repeated())
        .collect::<String>()
        .map(|digits| Token::Int(digits.replace('_', "")))
}

/// Parses a double-quoted string literal. Strings may not span lines.
#[must_use]
pub fn string() -> impl LexParser<Token> {
    just('"')
        .ignore_then(filter(|c: &char| *c != '"' && *c != '\n').repeated())
        .then_ignore(just('"'))
        .collect::<String>()
        .map(Token::Str)
}

/// Parses operators and punctuation, preferring the longest match.
#[must_use]
pub fn punct() -> impl LexParser<Token> {
    let double = choice((
        just("->").to(Punct::Arrow),
        just("==").to(Punct::EqEq),
        just("!=").to(Punct::NotEq),
        just("<=").to(Punct::Le),
        just(">=").to(Punct::Ge),
        just("&&").to(Punct::AndAnd),
        just("||").to(Punct::OrOr),
        just("+=").to(Punct::PlusAssign),
        just("-=").to(Punct::MinusAssign),
        just("*=").to(Punct::StarAssign),
        just("/=").to(Punct::SlashAssign),
    ));

    let single = select! {
        '{' => Punct::LBrace,
        '}' => Punct::RBrace,
        '(' => Punct::LParen,
        ')' => Punct::RParen,
        '[' => Punct::LBracket,
        ']' => Punct::RBracket,
        ',' => Punct::Comma,
        '.' => Punct::Dot,
        ':' => Punct::Colon,
        '@' => Punct::At,
        '=' => Punct::Assign,
        '<' => Punct::Lt,
        '>' => Punct::Gt,
        '+' => Punct::Plus,
        '-' => Punct::Minus,
        '*' => Punct::Star,
        '/' => Punct::Slash,
        '%' => Punct::Percent,
        '!' => Punct::Bang,
    };

    double.or(single).map(Token::Punct)
}

/// Parses an identifier or keyword.
#[must_use]
pub fn word() -> impl LexParser<Token> {
    text::ident().map(|word: String| match Keyword::from_word(&word) {
        Some(keyword) => Token::Keyword(keyword),
        None => Token::Ident(word),
    })
}

/// Parses a line or block comment.
#[must_use]
pub fn comment() -> impl LexParser<()> + Clone {
    let line = just("//").then(take_until(just('\n').ignored().or(end())));
    let block = just("/*").then(take_until(just("*/")));
    line.ignored().or(block.ignored()).padded()
}

/// Parses an entire source file into tokens.
#[must_use]
pub fn lexer() -> impl LexParser<Vec<Spanned<Token>>> {
    let token = hex().or(int()).or(string()).or(punct()).or(word());

    token
        .map_with_span(|token, span| (token, span))
        .padded_by(comment().repeated())
        .padded()
        .recover_with(skip_then_retry_until([]))
        .repeated()
        .padded_by(comment().repeated())
        .padded()
        .then_ignore(end())
}

/// Renders a lexer error as a human-readable message.
#[must_use]
pub fn describe(error: &Simple<char>) -> String {
    match error.reason() {
        SimpleReason::Custom(message) => message.clone(),
        SimpleReason::Unclosed { delimiter, .. } => format!("Unclosed delimiter `{delimiter}`"),
        SimpleReason::Unexpected => match error.found().copied() {
            Some('"') => "Unterminated string literal".to_string(),
            Some(c) => format!("Unexpected character `{}`", c.escape_default()),
            None => "Unexpected end of input".to_string(),
        },
    }
}

#[cfg(test)]
mod test {
    use chumsky::Parser;

    use crate::syntax::{
        lexer::lexer,
        token::{Keyword, Punct, Token},
    };

    fn tokens(source: &str) -> Vec<Token> {
        lexer()
            .parse(source)
            .expect("lexing failed")
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn can_lex_field_declarations() {
        assert_eq!(tokens("owner: address"), vec![
            Token::Ident("owner".to_string()),
            Token::Punct(Punct::Colon),
            Token::Ident("address".to_string()),
        ]);
    }

    #[test]
    fn prefers_longest_operators() {
        assert_eq!(tokens("a >= b -> c += 1_000"), vec![
            Token::Ident("a".to_string()),
            Token::Punct(Punct::Ge),
            Token::Ident("b".to_string()),
            Token::Punct(Punct::Arrow),
            Token::Ident("c".to_string()),
            Token::Punct(Punct::PlusAssign),
            Token::Int("1000".to_string()),
        ]);
    }

    #[test]
    fn skips_comments_and_recognises_keywords() {
        let source = "// leading\ncontract /* inline */ A { }\n// trailing";
        assert_eq!(tokens(source), vec![
            Token::Keyword(Keyword::Contract),
            Token::Ident("A".to_string()),
            Token::Punct(Punct::LBrace),
            Token::Punct(Punct::RBrace),
        ]);
    }

    #[test]
    fn lexes_literals() {
        assert_eq!(tokens(r#"0xdead "Unauthorized" 42"#), vec![
            Token::Hex("dead".to_string()),
            Token::Str("Unauthorized".to_string()),
            Token::Int("42".to_string()),
        ]);
    }

    #[test]
    fn recovers_from_stray_characters() {
        let (tokens, errors) = lexer().parse_recovery("a $ b");
        assert!(!errors.is_empty());
        assert_eq!(errors[0].span().start, 2);
        let tokens = tokens.expect("recovery should produce tokens");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn spans_count_characters() {
        let lexed = lexer().parse("\"é\" x").expect("lexing failed");
        assert_eq!(lexed[0].1, 0..3);
        assert_eq!(lexed[1].1, 4..5);
    }
}
