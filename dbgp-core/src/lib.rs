//! dbgp-aell Core Library
//!
//! Client side of a DBGP script debugger:
//! - DBGP wire codec, transport and typed command session
//! - Expression evaluation against a paused engine in two language dialects
//! - Line breakpoints with client-side conditions, hit counts and log points
//! - JSON-RPC message types for the dbgp-server bridge

pub mod breakpoint;
pub mod dbgp;
pub mod dialect;
pub mod expr;
pub mod protocol;

pub use breakpoint::{AdvancedData, Breakpoint, BreakpointError, BreakpointManager, DebugEvent};
pub use dbgp::{DbgpError, Session, SessionConfig, SessionEvent};
pub use dialect::Dialect;
pub use expr::{parse_expr, CiMap, EvalError, Evaluator, Expr, Value};
pub use protocol::{Notification, Request, Response};
