//! AST definitions for the expression language

use serde::{Deserialize, Serialize};

/// Expression AST. Built once per evaluation and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Comma-separated expressions: a, b, c
    Sequence(Vec<Expr>),

    /// Variable: foo
    Identifier(String),

    /// Assignment: x := 1, global y += 2
    Assignment {
        scope: Option<Scope>,
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },

    /// Binary operation: a + b
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation: -a, !b, ~c
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// ++x, --x
    PrefixUnary { op: IncDec, operand: Box<Expr> },

    /// x++, x--
    PostfixUnary { op: IncDec, operand: Box<Expr> },

    /// cond ? a : b
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// obj.name
    PropertyAccess { object: Box<Expr>, property: String },

    /// obj.%expr%
    DereferencePropertyAccess {
        object: Box<Expr>,
        property: Box<Expr>,
    },

    /// obj[a, b]
    ElementAccess {
        object: Box<Expr>,
        indices: Vec<Expr>,
    },

    /// f(a, b)
    Call { callee: Box<Expr>, args: Vec<Expr> },

    /// Dynamic variable name: %a%, a%b%c
    Dereferences(Vec<DerefPart>),

    StringLiteral(String),

    NumberLiteral { raw: String, kind: NumberKind },
}

/// One piece of a dynamic variable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DerefPart {
    Name(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Local,
    Static,
}

impl Scope {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "global" => Some(Scope::Global),
            "local" => Some(Scope::Local),
            "static" => Some(Scope::Static),
            _ => None,
        }
    }

    /// Name of the DBGP context this scope writes to.
    pub fn context_name(&self) -> &'static str {
        match self {
            Scope::Global => "Global",
            Scope::Local => "Local",
            Scope::Static => "Static",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberKind {
    Integer,
    Hex,
    Float,
    Scientific,
}

/// Binary operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BinaryOp {
    // Logical
    Or,  // || or
    And, // && and

    // Equality
    LooseEq,  // =
    StrictEq, // ==
    LooseNe,  // != <>
    StrictNe, // !==

    // Relational
    Lt, // <
    Gt, // >
    Le, // <=
    Ge, // >=

    RegexMatch, // ~=
    Concat,     // . or whitespace

    // Bitwise
    BitOr,  // |
    BitXor, // ^
    BitAnd, // &
    Shl,    // <<
    Shr,    // >>
    UShr,   // >>>

    // Arithmetic
    Add,      // +
    Sub,      // -
    Mul,      // *
    Div,      // /
    FloorDiv, // //
    Pow,      // **
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::LooseEq => "=",
            BinaryOp::StrictEq => "==",
            BinaryOp::LooseNe => "!=",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::RegexMatch => "~=",
            BinaryOp::Concat => ".",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Pow => "**",
        }
    }
}

/// Assignment operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignOp {
    Assign,   // :=
    Add,      // +=
    Sub,      // -=
    Mul,      // *=
    Div,      // /=
    FloorDiv, // //=
    Concat,   // .=
    BitOr,    // |=
    BitAnd,   // &=
    BitXor,   // ^=
    Shl,      // <<=
    Shr,      // >>=
    UShr,     // >>>=
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::FloorDiv => Some(BinaryOp::FloorDiv),
            AssignOp::Concat => Some(BinaryOp::Concat),
            AssignOp::BitOr => Some(BinaryOp::BitOr),
            AssignOp::BitAnd => Some(BinaryOp::BitAnd),
            AssignOp::BitXor => Some(BinaryOp::BitXor),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
            AssignOp::UShr => Some(BinaryOp::UShr),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,      // +
    Minus,     // -
    Not,       // ! not
    BitNot,    // ~
    AddressOf, // &
    Deref,     // *
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::AddressOf => "&",
            UnaryOp::Deref => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IncDec {
    Increment,
    Decrement,
}

impl IncDec {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncDec::Increment => "++",
            IncDec::Decrement => "--",
        }
    }
}
