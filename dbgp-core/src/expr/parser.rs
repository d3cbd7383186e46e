//! Expression parser
//!
//! Recursive descent over the lexemes from [`super::lexer`]. The v2 grammar is
//! the v1 grammar with a few rules replaced; the rule table is picked once,
//! when the parser is built.

use super::ast::{AssignOp, BinaryOp, DerefPart, Expr, IncDec, NumberKind, Scope, UnaryOp};
use super::error::ParseError;
use super::lexer::{tokenize, Lexeme, Token};
use crate::dialect::Dialect;

pub type PResult<T> = Result<T, ParseError>;

/// Bound on recursive rule entries (subexpressions, unary chains, `**`
/// chains). Parenthesised nesting costs two entries per level.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Dialect-specific grammar rules.
#[derive(Clone, Copy)]
pub struct Grammar {
    pub dialect: Dialect,
    /// Body of `%...%`, called after the opening `%`.
    dereference: fn(&mut Parser<'_>) -> PResult<Expr>,
    /// Member access, called after an adjacent `.`.
    member: fn(&mut Parser<'_>, Expr) -> PResult<Expr>,
    /// String literal at the current position, if any.
    string_literal: fn(&mut Parser<'_>) -> PResult<Option<Expr>>,
    /// Character produced by a backtick escape.
    escape: fn(char) -> Option<char>,
}

pub const V1_GRAMMAR: Grammar = Grammar {
    dialect: Dialect::V1,
    dereference: v1_dereference,
    member: v1_member,
    string_literal: v1_string_literal,
    escape: backtick_escape,
};

pub const V2_GRAMMAR: Grammar = Grammar {
    dialect: Dialect::V2,
    dereference: v2_dereference,
    member: v2_member,
    string_literal: v2_string_literal,
    ..V1_GRAMMAR
};

impl std::fmt::Debug for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grammar")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl Grammar {
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::V1 => V1_GRAMMAR,
            Dialect::V2 => V2_GRAMMAR,
        }
    }
}

/// Parse an expression string into our AST
pub fn parse_expr(source: &str, dialect: Dialect) -> Result<Expr, ParseError> {
    Parser::new(source, Grammar::for_dialect(dialect))?.parse()
}

pub struct Parser<'a> {
    source: &'a str,
    lexemes: Vec<Lexeme<'a>>,
    pos: usize,
    grammar: Grammar,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, grammar: Grammar) -> PResult<Self> {
        Ok(Self {
            source,
            lexemes: tokenize(source)?,
            pos: 0,
            grammar,
            depth: 0,
        })
    }

    pub fn parse(mut self) -> PResult<Expr> {
        if self.lexemes.is_empty() {
            return Err(self.error(&["expression"]));
        }
        let expr = self.parse_sequence()?;
        if self.peek().is_some() {
            return Err(self.error(&["operator", "end of expression"]));
        }
        Ok(expr)
    }

    // Cursor

    fn peek(&self) -> Option<Lexeme<'a>> {
        self.lexemes.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<Lexeme<'a>> {
        self.lexemes.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<Lexeme<'a>> {
        let lexeme = self.peek()?;
        self.pos += 1;
        Some(lexeme)
    }

    fn check(&self, token: Token) -> bool {
        self.peek().map(|l| l.token == token).unwrap_or(false)
    }

    /// Next lexeme is `token` and touches the previous one.
    fn check_adjacent(&self, token: Token) -> bool {
        self.peek()
            .map(|l| l.token == token && !l.space_before)
            .unwrap_or(false)
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let is_operator = self.peek().map(|l| l.is_word(word)).unwrap_or(false)
            && self.peek_at(1).map(starts_operand).unwrap_or(false);
        if is_operator {
            self.pos += 1;
        }
        is_operator
    }

    fn expect(&mut self, token: Token) -> PResult<Lexeme<'a>> {
        match self.peek() {
            Some(lexeme) if lexeme.token == token => {
                self.pos += 1;
                Ok(lexeme)
            }
            _ => Err(self.error(&[token.describe()])),
        }
    }

    fn error(&self, expected: &[&str]) -> ParseError {
        match self.peek() {
            Some(lexeme) => ParseError::expected(lexeme.offset, expected, Some(lexeme.text)),
            None => ParseError::expected(self.source.len(), expected, None),
        }
    }

    /// Run a recursive rule one level deeper.
    fn nested(&mut self, rule: fn(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            let mut err = self.error(&[]);
            err.message = "Expression is nested too deeply".to_string();
            return Err(err);
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    // Precedence levels, lowest first

    fn parse_sequence(&mut self) -> PResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.check(Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(Token::Comma) {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let scope = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some(word), Some(name), Some(op))
                if word.token == Token::Identifier
                    && name.token == Token::Identifier
                    && name.space_before
                    && assign_op(op.token).is_some() =>
            {
                Scope::parse(word.text)
            }
            _ => None,
        };
        if scope.is_some() {
            self.advance();
        }

        let target_offset = self.peek().map(|l| l.offset).unwrap_or(self.source.len());
        let target = self.parse_ternary()?;
        let Some(op) = self.peek().and_then(|l| assign_op(l.token)) else {
            return Ok(target);
        };
        if !is_assignable(&target) {
            let mut err = self.error(&["variable", "property"]);
            err.offset = target_offset;
            err.message = "Invalid assignment target".to_string();
            return Err(err);
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assignment {
            scope,
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        self.nested(Self::ternary)
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let condition = self.parse_or()?;
        if !self.eat(Token::Question) {
            return Ok(condition);
        }
        let then = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(Token::OrOr) || self.eat_word("or") {
            let right = self.parse_and()?;
            left = binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(Token::AndAnd) || self.eat_word("and") {
            let right = self.parse_not()?;
            left = binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.eat_word("not") {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_equality()
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: fn(Token) -> Option<BinaryOp>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self.peek().and_then(|l| ops(l.token)) {
            self.advance();
            let right = next(self)?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_relational, |t| match t {
            Token::Eq => Some(BinaryOp::LooseEq),
            Token::EqEq => Some(BinaryOp::StrictEq),
            Token::NotEq | Token::LtGt => Some(BinaryOp::LooseNe),
            Token::NotEqEq => Some(BinaryOp::StrictNe),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_regex_match, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Le => Some(BinaryOp::Le),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn parse_regex_match(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_concat, |t| match t {
            Token::RegexMatch => Some(BinaryOp::RegexMatch),
            _ => None,
        })
    }

    fn parse_concat(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bit_or()?;
        while let Some(next) = self.peek() {
            if !next.space_before {
                break;
            }
            if next.token == Token::Dot {
                self.advance();
            } else if !starts_implicit_concat(next) {
                break;
            }
            let right = self.parse_bit_or()?;
            left = binary(left, BinaryOp::Concat, right);
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_bit_xor, |t| {
            (t == Token::Pipe).then_some(BinaryOp::BitOr)
        })
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_bit_and, |t| {
            (t == Token::Caret).then_some(BinaryOp::BitXor)
        })
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_shift, |t| {
            (t == Token::Amp).then_some(BinaryOp::BitAnd)
        })
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_additive, |t| match t {
            Token::Shl => Some(BinaryOp::Shl),
            Token::Shr => Some(BinaryOp::Shr),
            Token::UShr => Some(BinaryOp::UShr),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_exponent, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::SlashSlash => Some(BinaryOp::FloorDiv),
            _ => None,
        })
    }

    fn parse_exponent(&mut self) -> PResult<Expr> {
        let base = self.parse_prefix()?;
        if !self.eat(Token::StarStar) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_exponent)?;
        Ok(binary(base, BinaryOp::Pow, exponent))
    }

    fn parse_prefix(&mut self) -> PResult<Expr> {
        let Some(lexeme) = self.peek() else {
            return Err(self.error(&["expression"]));
        };
        let increment = match lexeme.token {
            Token::PlusPlus => Some(IncDec::Increment),
            Token::MinusMinus => Some(IncDec::Decrement),
            _ => None,
        };
        if let Some(op) = increment {
            self.advance();
            let operand = self.nested(Self::parse_prefix)?;
            return Ok(Expr::PrefixUnary {
                op,
                operand: Box::new(operand),
            });
        }

        let unary = match lexeme.token {
            Token::Plus => Some(UnaryOp::Plus),
            Token::Minus => Some(UnaryOp::Minus),
            Token::Bang => Some(UnaryOp::Not),
            Token::Tilde => Some(UnaryOp::BitNot),
            Token::Amp => Some(UnaryOp::AddressOf),
            Token::Star => Some(UnaryOp::Deref),
            _ => None,
        };
        match unary {
            Some(op) => {
                self.advance();
                let operand = self.nested(Self::parse_prefix)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let operand = self.parse_chain()?;
        let op = if self.check_adjacent(Token::PlusPlus) {
            IncDec::Increment
        } else if self.check_adjacent(Token::MinusMinus) {
            IncDec::Decrement
        } else {
            return Ok(operand);
        };
        self.advance();
        Ok(Expr::PostfixUnary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_chain(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_adjacent(Token::LParen) {
                self.advance();
                let args = self.parse_arguments(Token::RParen)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.check_adjacent(Token::LBracket) {
                self.advance();
                if self.check(Token::RBracket) {
                    return Err(self.error(&["expression"]));
                }
                let indices = self.parse_arguments(Token::RBracket)?;
                expr = Expr::ElementAccess {
                    object: Box::new(expr),
                    indices,
                };
            } else if self.check_adjacent(Token::Dot) {
                self.advance();
                expr = (self.grammar.member)(self, expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_arguments(&mut self, close: Token) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat(Token::Comma) {
                continue;
            }
            self.expect(close)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let Some(lexeme) = self.peek() else {
            return Err(self.error(&["expression"]));
        };
        match lexeme.token {
            Token::Identifier => {
                self.advance();
                if self.check_adjacent(Token::Percent) {
                    return self.parse_dereferences(Some(lexeme.text.to_string()));
                }
                Ok(Expr::Identifier(lexeme.text.to_string()))
            }
            Token::Integer | Token::Hex | Token::Float | Token::Scientific => {
                self.advance();
                let kind = match lexeme.token {
                    Token::Hex => NumberKind::Hex,
                    Token::Float => NumberKind::Float,
                    Token::Scientific => NumberKind::Scientific,
                    _ => NumberKind::Integer,
                };
                Ok(Expr::NumberLiteral {
                    raw: lexeme.text.to_string(),
                    kind,
                })
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_sequence()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Percent => self.parse_dereferences(None),
            Token::DoubleString | Token::SingleString => {
                match (self.grammar.string_literal)(self)? {
                    Some(literal) => Ok(literal),
                    None => Err(self.error(&["expression"])),
                }
            }
            _ => Err(self.error(&["identifier", "number", "string", "'('", "'%'"])),
        }
    }

    /// A run of adjacent name pieces and `%...%` dereferences: `a%b%c`.
    fn parse_dereferences(&mut self, first: Option<String>) -> PResult<Expr> {
        let mut parts: Vec<DerefPart> = first.into_iter().map(DerefPart::Name).collect();
        loop {
            let Some(next) = self.peek() else {
                break;
            };
            let adjacent = parts.is_empty() || !next.space_before;
            match next.token {
                Token::Percent if adjacent => {
                    self.advance();
                    let inner = (self.grammar.dereference)(self)?;
                    self.expect(Token::Percent)?;
                    parts.push(DerefPart::Expr(inner));
                }
                Token::Identifier | Token::Integer if adjacent && !parts.is_empty() => {
                    self.advance();
                    parts.push(DerefPart::Name(next.text.to_string()));
                }
                _ => break,
            }
        }
        Ok(Expr::Dereferences(parts))
    }

    fn unescape(&self, raw: &str, quote: char) -> String {
        let inner = raw
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
            .unwrap_or(raw);
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == quote && chars.peek() == Some(&quote) {
                chars.next();
                out.push(quote);
            } else if c == '`' {
                if let Some(escaped) = chars.next() {
                    out.push((self.grammar.escape)(escaped).unwrap_or(escaped));
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn assign_op(token: Token) -> Option<AssignOp> {
    let op = match token {
        Token::Assign => AssignOp::Assign,
        Token::AddAssign => AssignOp::Add,
        Token::SubAssign => AssignOp::Sub,
        Token::MulAssign => AssignOp::Mul,
        Token::DivAssign => AssignOp::Div,
        Token::FloorDivAssign => AssignOp::FloorDiv,
        Token::ConcatAssign => AssignOp::Concat,
        Token::BitOrAssign => AssignOp::BitOr,
        Token::BitAndAssign => AssignOp::BitAnd,
        Token::BitXorAssign => AssignOp::BitXor,
        Token::ShlAssign => AssignOp::Shl,
        Token::ShrAssign => AssignOp::Shr,
        Token::UShrAssign => AssignOp::UShr,
        _ => return None,
    };
    Some(op)
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Identifier(_)
            | Expr::PropertyAccess { .. }
            | Expr::DereferencePropertyAccess { .. }
            | Expr::ElementAccess { .. }
            | Expr::Dereferences(_)
    )
}

fn is_word_operator(lexeme: &Lexeme<'_>) -> bool {
    lexeme.is_word("and") || lexeme.is_word("or") || lexeme.is_word("not")
}

fn starts_operand(lexeme: Lexeme<'_>) -> bool {
    matches!(
        lexeme.token,
        Token::Identifier
            | Token::Integer
            | Token::Hex
            | Token::Float
            | Token::Scientific
            | Token::DoubleString
            | Token::SingleString
            | Token::LParen
            | Token::Percent
            | Token::PlusPlus
            | Token::MinusMinus
            | Token::Plus
            | Token::Minus
            | Token::Bang
            | Token::Tilde
            | Token::Amp
            | Token::Star
    )
}

/// Operands that concatenate when they follow another operand after whitespace.
fn starts_implicit_concat(lexeme: Lexeme<'_>) -> bool {
    match lexeme.token {
        Token::Identifier => !is_word_operator(&lexeme),
        Token::Integer
        | Token::Hex
        | Token::Float
        | Token::Scientific
        | Token::DoubleString
        | Token::SingleString
        | Token::LParen
        | Token::Percent => true,
        _ => false,
    }
}

// v1 rules

fn v1_dereference(parser: &mut Parser<'_>) -> PResult<Expr> {
    match parser.peek() {
        Some(lexeme) if lexeme.token == Token::Identifier => {
            parser.advance();
            Ok(Expr::Identifier(lexeme.text.to_string()))
        }
        _ => Err(parser.error(&["identifier"])),
    }
}

fn v1_member(parser: &mut Parser<'_>, object: Expr) -> PResult<Expr> {
    match parser.peek() {
        Some(lexeme)
            if !lexeme.space_before
                && matches!(lexeme.token, Token::Identifier | Token::Integer) =>
        {
            parser.advance();
            Ok(Expr::PropertyAccess {
                object: Box::new(object),
                property: lexeme.text.to_string(),
            })
        }
        _ => Err(parser.error(&["property name"])),
    }
}

fn v1_string_literal(parser: &mut Parser<'_>) -> PResult<Option<Expr>> {
    match parser.peek() {
        Some(lexeme) if lexeme.token == Token::DoubleString => {
            parser.advance();
            Ok(Some(Expr::StringLiteral(parser.unescape(lexeme.text, '"'))))
        }
        _ => Ok(None),
    }
}

fn backtick_escape(c: char) -> Option<char> {
    match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        'b' => Some('\u{8}'),
        'f' => Some('\u{c}'),
        'v' => Some('\u{b}'),
        'a' => Some('\u{7}'),
        _ => None,
    }
}

// v2 overrides

fn v2_dereference(parser: &mut Parser<'_>) -> PResult<Expr> {
    parser.parse_ternary()
}

fn v2_member(parser: &mut Parser<'_>, object: Expr) -> PResult<Expr> {
    if !parser.check_adjacent(Token::Percent) {
        return v1_member(parser, object);
    }
    parser.advance();
    let property = parser.parse_ternary()?;
    parser.expect(Token::Percent)?;
    Ok(Expr::DereferencePropertyAccess {
        object: Box::new(object),
        property: Box::new(property),
    })
}

fn v2_string_literal(parser: &mut Parser<'_>) -> PResult<Option<Expr>> {
    match parser.peek() {
        Some(lexeme) if lexeme.token == Token::SingleString => {
            parser.advance();
            Ok(Some(Expr::StringLiteral(parser.unescape(lexeme.text, '\''))))
        }
        _ => v1_string_literal(parser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Expr {
        parse_expr(source, Dialect::V2).unwrap()
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Identifier(name.to_string()))
    }

    #[test]
    fn test_precedence() {
        let Expr::Binary { op, right, .. } = parse("1 + (2 + 3) * 4 ** 5") else {
            panic!("Expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        let Expr::Binary { op, right, .. } = *right else {
            panic!("Expected multiplication");
        };
        assert_eq!(op, BinaryOp::Mul);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let Expr::Binary { left, op, right } = parse("2 ** 3 ** 2") else {
            panic!("Expected binary");
        };
        assert_eq!(op, BinaryOp::Pow);
        assert!(matches!(*left, Expr::NumberLiteral { .. }));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn test_whitespace_decides_concat_or_member() {
        assert!(matches!(parse("a.b"), Expr::PropertyAccess { .. }));
        assert!(matches!(
            parse("a . b"),
            Expr::Binary { op: BinaryOp::Concat, .. }
        ));
        assert!(matches!(
            parse(r#""x" y"#),
            Expr::Binary { op: BinaryOp::Concat, .. }
        ));
        assert!(matches!(parse("f(x)"), Expr::Call { .. }));
        assert!(matches!(
            parse("f (x)"),
            Expr::Binary { op: BinaryOp::Concat, .. }
        ));
    }

    #[test]
    fn test_word_operators() {
        assert!(matches!(parse("a and b"), Expr::Binary { op: BinaryOp::And, .. }));
        assert!(matches!(parse("a OR b"), Expr::Binary { op: BinaryOp::Or, .. }));
        assert!(matches!(parse("not a"), Expr::Unary { op: UnaryOp::Not, .. }));
        // A lone word is still a variable.
        assert_eq!(parse("and"), Expr::Identifier("and".to_string()));
    }

    #[test]
    fn test_assignment() {
        let Expr::Assignment {
            scope,
            target,
            op,
            value,
        } = parse("global x := y += 1")
        else {
            panic!("Expected assignment");
        };
        assert_eq!(scope, Some(Scope::Global));
        assert_eq!(target, ident("x"));
        assert_eq!(op, AssignOp::Assign);
        assert!(matches!(*value, Expr::Assignment { op: AssignOp::Add, .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_expr("1 := 2", Dialect::V2).unwrap_err();
        assert_eq!(err.message, "Invalid assignment target");
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_increments() {
        assert!(matches!(parse("++i"), Expr::PrefixUnary { op: IncDec::Increment, .. }));
        assert!(matches!(parse("i--"), Expr::PostfixUnary { op: IncDec::Decrement, .. }));
    }

    #[test]
    fn test_chain() {
        let Expr::Call { callee, args } = parse("a.b[1, c](d)") else {
            panic!("Expected call");
        };
        assert_eq!(args.len(), 1);
        let Expr::ElementAccess { object, indices } = *callee else {
            panic!("Expected element access");
        };
        assert_eq!(indices.len(), 2);
        assert!(matches!(*object, Expr::PropertyAccess { ref property, .. } if property == "b"));
    }

    #[test]
    fn test_ternary() {
        assert!(matches!(parse("a ? b : c"), Expr::Ternary { .. }));
    }

    #[test]
    fn test_sequence() {
        let Expr::Sequence(items) = parse("a := 1, b := 2, a + b") else {
            panic!("Expected sequence");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_dereference_runs() {
        assert_eq!(
            parse_expr("a%b%c", Dialect::V1).unwrap(),
            Expr::Dereferences(vec![
                DerefPart::Name("a".to_string()),
                DerefPart::Expr(Expr::Identifier("b".to_string())),
                DerefPart::Name("c".to_string()),
            ])
        );
        // v1 only dereferences plain names.
        assert!(parse_expr(r#"%"a" b%"#, Dialect::V1).is_err());
        assert!(matches!(
            parse_expr(r#"%"a" b%"#, Dialect::V2).unwrap(),
            Expr::Dereferences(ref parts) if parts.len() == 1
        ));
    }

    #[test]
    fn test_dynamic_property_is_v2_only() {
        assert!(matches!(
            parse_expr("obj.%key%", Dialect::V2).unwrap(),
            Expr::DereferencePropertyAccess { .. }
        ));
        assert!(parse_expr("obj.%key%", Dialect::V1).is_err());
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(
            parse_expr(r#""say ""hi"" `n""#, Dialect::V1).unwrap(),
            Expr::StringLiteral("say \"hi\" \n".to_string())
        );
        assert_eq!(
            parse_expr("'it''s'", Dialect::V2).unwrap(),
            Expr::StringLiteral("it's".to_string())
        );
        assert!(parse_expr("'single'", Dialect::V1).is_err());
    }

    #[test]
    fn test_number_kinds() {
        assert_eq!(
            parse("0x1F"),
            Expr::NumberLiteral {
                raw: "0x1F".to_string(),
                kind: NumberKind::Hex
            }
        );
        assert!(matches!(
            parse("1.5e3"),
            Expr::NumberLiteral {
                kind: NumberKind::Scientific,
                ..
            }
        ));
    }

    #[test]
    fn test_errors_list_expected_tokens() {
        let err = parse_expr("(1 + 2", Dialect::V2).unwrap_err();
        assert_eq!(err.expected, vec!["')'".to_string()]);
        assert_eq!(err.found, None);
        assert_eq!(err.offset, 6);

        let err = parse_expr("1 +", Dialect::V2).unwrap_err();
        assert_eq!(err.message, "Expected expression but found end of expression");

        let err = parse_expr("1 + )", Dialect::V2).unwrap_err();
        assert!(err.message.starts_with("Expected one of identifier"));
        assert_eq!(err.found.as_deref(), Some(")"));

        assert!(parse_expr("", Dialect::V2).is_err());
        assert!(parse_expr("a b )", Dialect::V2).is_err());
    }

    fn nest(depth: usize, open: &str, inner: &str, close: &str) -> String {
        format!("{}{}{}", open.repeat(depth), inner, close.repeat(depth))
    }

    #[test]
    fn test_moderate_nesting_parses() {
        assert!(parse_expr(&nest(20, "(", "1", ")"), Dialect::V2).is_ok());
        assert!(parse_expr(&nest(20, "f(", "x", ")"), Dialect::V1).is_ok());
        assert!(parse_expr(&nest(20, "-", "x", ""), Dialect::V2).is_ok());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        for source in [
            nest(1000, "(", "1", ")"),
            nest(1000, "a[", "1", "]"),
            nest(1000, "f(", "1", ")"),
            nest(1000, "%", "x", "%"),
            nest(1000, "-", "1", ""),
            nest(1000, "not ", "1", ""),
            nest(1000, "2 ** ", "2", ""),
            nest(1000, "a := ", "1", ""),
            nest(1000, "1 ? 2 : ", "3", ""),
        ] {
            let err = parse_expr(&source, Dialect::V2).unwrap_err();
            assert_eq!(err.message, "Expression is nested too deeply", "{}", &source[..20]);
        }
    }
}
