//! The tokens produced by the lexer.

use std::fmt;

use aurion_errors::location::Span;

/// A token paired with the characters it was lexed from.
pub type Spanned<T> = (T, Span);

/// A single lexical token of Aurion source.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Token {
    /// An identifier that is not a keyword. Type names, and the environment
    /// objects `msg`, `block` and `tx`, are ordinary identifiers.
    Ident(String),

    /// A decimal integer literal, with any `_` separators removed.
    Int(String),

    /// A hexadecimal integer literal, without its `0x` prefix.
    Hex(String),

    /// A string literal, without its quotes.
    Str(String),

    Keyword(Keyword),
    Punct(Punct),
}

/// The reserved words of the language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Keyword {
    Contract,
    Init,
    Event,
    Private,
    Let,
    If,
    Else,
    While,
    Return,
    Require,
    Assert,
    Revert,
    Emit,
    SelfValue,
    True,
    False,
}

impl Keyword {
    /// Looks up the keyword spelled `word`, if there is one.
    #[must_use]
    pub fn from_word(word: &str) -> Option<Self> {
        let keyword = match word {
            "contract" => Self::Contract,
            "init" => Self::Init,
            "event" => Self::Event,
            "private" => Self::Private,
            "let" => Self::Let,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "return" => Self::Return,
            "require" => Self::Require,
            "assert" => Self::Assert,
            "revert" => Self::Revert,
            "emit" => Self::Emit,
            "self" => Self::SelfValue,
            "true" => Self::True,
            "false" => Self::False,
            _ => return None,
        };
        Some(keyword)
    }

    /// The keyword as it is written in source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Init => "init",
            Self::Event => "event",
            Self::Private => "private",
            Self::Let => "let",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::Return => "return",
            Self::Require => "require",
            Self::Assert => "assert",
            Self::Revert => "revert",
            Self::Emit => "emit",
            Self::SelfValue => "self",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

/// Punctuation and operators.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    At,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
}

impl Punct {
    /// The punctuation as it is written in source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Colon => ":",
            Self::At => "@",
            Self::Arrow => "->",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Int(digits) => write!(f, "{digits}"),
            Self::Hex(digits) => write!(f, "0x{digits}"),
            Self::Str(text) => write!(f, "\"{text}\""),
            Self::Keyword(keyword) => write!(f, "{}", keyword.as_str()),
            Self::Punct(punct) => write!(f, "{}", punct.as_str()),
        }
    }
}
