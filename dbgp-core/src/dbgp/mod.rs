//! DBGP client
//!
//! Wire codec, transport and the typed command session used to drive a
//! script engine's debugger.

pub mod codec;
pub mod error;
pub mod packet;
pub mod property;
pub mod session;
pub mod transport;
pub mod types;
pub mod xml;

#[cfg(any(test, feature = "mock-engine"))]
pub mod mock;

pub use error::{DbgpError, Result};
pub use packet::{InitPacket, StreamKind};
pub use property::{Context, ObjectProperty, PrimitiveProperty, Property, PropertyType};
pub use session::{Session, SessionConfig};
pub use transport::{SessionEvent, Transport, TransportConfig};
pub use types::{
    BreakpointInfo, BreakpointSetResponse, BreakpointState, Continuation, ContinuationResponse,
    FeatureValue, OutputMode, RunStatus, StackFrame, StatusReason,
};
