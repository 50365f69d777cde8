//! JSON-RPC 2.0 correlation layer.
//!
//! [`ClientProxy`] issues calls and waits for matching responses.
//! [`ServerPull`] validates incoming envelopes and hands requests out one at
//! a time so the caller can enforce its own per-state method whitelist.

mod client;
mod envelope;
mod server;

pub use client::{ClientProxy, RpcError};
pub use envelope::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use server::{DispatchError, IncomingCall, Pulled, ServerPull};

pub(crate) const RPC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rpc");

/// Malformed request envelope.
pub const INVALID_REQUEST: i64 = -32600;
/// Method name not recognised.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters did not match the method's schema.
pub const INVALID_PARAMS: i64 = -32602;
/// Method recognised but not legal in the current state.
pub const METHOD_UNAVAILABLE: i64 = -32000;

/// A closed set of method names understood by a server.
pub trait RpcMethod: Copy + PartialEq {
    /// Parses a wire method name.
    fn parse(name: &str) -> Option<Self>;

    /// Wire name of the method.
    fn name(&self) -> &'static str;
}
