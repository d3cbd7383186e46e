//! Expression evaluation module
//!
//! Parses script expressions in either dialect and evaluates them against a
//! paused engine.

pub mod ast;
pub mod builtins;
pub mod ci_map;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::Expr;
pub use ci_map::CiMap;
pub use error::{EvalError, ParseError};
pub use eval::{Evaluator, MAX_INHERITANCE_DEPTH};
pub use parser::{parse_expr, Grammar, MAX_NESTING_DEPTH, V1_GRAMMAR, V2_GRAMMAR};
pub use value::{Number, Value};
