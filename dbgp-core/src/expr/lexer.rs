//! Lexical analysis for expressions
//!
//! Whitespace matters in the expression language: `a b` concatenates,
//! `a . b` concatenates while `a.b` is member access, and `f (x)` concatenates
//! while `f(x)` is a call. Whitespace is therefore lexed, then folded into the
//! `space_before` flag of the next lexeme.

use logos::Logos;

use super::error::ParseError;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    /// Identifiers, including the word operators `and`, `or`, `not` and the
    /// scope keywords; the parser tells them apart by text.
    #[regex(r"[A-Za-z_$@#\x{80}-\x{10FFFF}][A-Za-z0-9_$@#\x{80}-\x{10FFFF}]*")]
    Identifier,

    #[regex(r"[0-9]+")]
    Integer,
    #[regex(r"0[xX][0-9a-fA-F]+")]
    Hex,
    #[regex(r"[0-9]+\.[0-9]+")]
    Float,
    #[regex(r"[0-9]+(\.[0-9]+)?[eE][+-]?[0-9]+")]
    Scientific,

    #[regex(r#""([^"`]|""|`[^\n])*""#)]
    DoubleString,
    #[regex(r#"'([^'`]|''|`[^\n])*'"#)]
    SingleString,

    // Assignment
    #[token(":=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubAssign,
    #[token("*=")]
    MulAssign,
    #[token("/=")]
    DivAssign,
    #[token("//=")]
    FloorDivAssign,
    #[token(".=")]
    ConcatAssign,
    #[token("|=")]
    BitOrAssign,
    #[token("&=")]
    BitAndAssign,
    #[token("^=")]
    BitXorAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token(">>>=")]
    UShrAssign,

    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("||")]
    OrOr,
    #[token("&&")]
    AndAnd,

    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("!==")]
    NotEqEq,
    #[token("<>")]
    LtGt,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("~=")]
    RegexMatch,

    #[token(".")]
    Dot,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token(">>>")]
    UShr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("**")]
    StarStar,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,

    #[token("%")]
    Percent,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
}

impl Token {
    /// Token name used in parse diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Token::Whitespace => "whitespace",
            Token::Identifier => "identifier",
            Token::Integer | Token::Hex | Token::Float | Token::Scientific => "number",
            Token::DoubleString | Token::SingleString => "string",
            Token::Assign => "':='",
            Token::AddAssign => "'+='",
            Token::SubAssign => "'-='",
            Token::MulAssign => "'*='",
            Token::DivAssign => "'/='",
            Token::FloorDivAssign => "'//='",
            Token::ConcatAssign => "'.='",
            Token::BitOrAssign => "'|='",
            Token::BitAndAssign => "'&='",
            Token::BitXorAssign => "'^='",
            Token::ShlAssign => "'<<='",
            Token::ShrAssign => "'>>='",
            Token::UShrAssign => "'>>>='",
            Token::Question => "'?'",
            Token::Colon => "':'",
            Token::OrOr => "'||'",
            Token::AndAnd => "'&&'",
            Token::Eq => "'='",
            Token::EqEq => "'=='",
            Token::NotEq => "'!='",
            Token::NotEqEq => "'!=='",
            Token::LtGt => "'<>'",
            Token::Lt => "'<'",
            Token::Gt => "'>'",
            Token::Le => "'<='",
            Token::Ge => "'>='",
            Token::RegexMatch => "'~='",
            Token::Dot => "'.'",
            Token::Pipe => "'|'",
            Token::Caret => "'^'",
            Token::Amp => "'&'",
            Token::Shl => "'<<'",
            Token::Shr => "'>>'",
            Token::UShr => "'>>>'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::SlashSlash => "'//'",
            Token::StarStar => "'**'",
            Token::PlusPlus => "'++'",
            Token::MinusMinus => "'--'",
            Token::Bang => "'!'",
            Token::Tilde => "'~'",
            Token::Percent => "'%'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::Comma => "','",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexeme<'a> {
    pub token: Token,
    pub text: &'a str,
    /// Byte offset of the lexeme in the source.
    pub offset: usize,
    /// Whitespace separates this lexeme from the previous one.
    pub space_before: bool,
}

impl Lexeme<'_> {
    /// Identifier spelled `word`, ignoring case.
    pub fn is_word(&self, word: &str) -> bool {
        self.token == Token::Identifier && self.text.eq_ignore_ascii_case(word)
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Lexeme<'_>>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut lexemes = Vec::new();
    let mut space_before = false;

    while let Some(result) = lexer.next() {
        match result {
            Ok(Token::Whitespace) => space_before = true,
            Ok(token) => {
                lexemes.push(Lexeme {
                    token,
                    text: lexer.slice(),
                    offset: lexer.span().start,
                    space_before,
                });
                space_before = false;
            }
            Err(()) => {
                return Err(ParseError::expected(
                    lexer.span().start,
                    &[],
                    Some(lexer.slice()),
                ));
            }
        }
    }

    Ok(lexemes)
}
