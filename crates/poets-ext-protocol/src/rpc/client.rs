use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::RPC_TARGET;
use super::envelope::{JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::channel::{ChannelError, RawChannel};

/// Failure reported by [`ClientProxy::call`].
///
/// Carries the server's error code and payload when the failure came from
/// an `error` member, and neither when the envelope itself was unusable.
#[derive(Debug, Error)]
#[error("{description}")]
pub struct RpcError {
    /// Human-readable description.
    pub description: String,
    /// JSON-RPC error code, when the server supplied one.
    pub code: Option<i64>,
    /// Offending message or error data, when available.
    pub payload: Option<Value>,
    #[source]
    source: Option<ChannelError>,
}

impl RpcError {
    fn envelope(description: impl Into<String>, payload: Value) -> Self {
        Self {
            description: description.into(),
            code: None,
            payload: Some(payload),
            source: None,
        }
    }

    fn transport(source: ChannelError) -> Self {
        Self {
            description: format!("transport failure: {source}"),
            code: None,
            payload: None,
            source: Some(source),
        }
    }
}

/// Client side of the correlation layer.
///
/// Issues one call at a time over a [`RawChannel`] and waits for the matching
/// response. Identifiers are `"id1"`, `"id2"`, and so on.
#[derive(Debug)]
pub struct ClientProxy<C> {
    channel: C,
    next_id: u64,
}

impl<C: RawChannel> ClientProxy<C> {
    /// Wraps a channel.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            next_id: 1,
        }
    }

    /// Borrows the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Releases the underlying channel.
    #[must_use]
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Sends `method` with `params` and blocks for the matching response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] when the channel fails, when the response envelope
    /// is malformed or answers a different id, or when the server replied
    /// with an `error` member.
    pub fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = RequestId::Text(format!("id{}", self.next_id));
        self.next_id += 1;

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let encoded = serde_json::to_value(&request)
            .map_err(|error| RpcError::transport(ChannelError::Encode(error)))?;
        debug!(target: RPC_TARGET, %id, method, "sending request");
        self.channel.send(&encoded).map_err(RpcError::transport)?;

        let raw = self.channel.recv().map_err(RpcError::transport)?;
        let response: JsonRpcResponse = match serde_json::from_value(raw.clone()) {
            Ok(response) => response,
            Err(error) => {
                return Err(RpcError::envelope(
                    format!("response is not a JSON-RPC envelope: {error}"),
                    raw,
                ));
            }
        };
        if response.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::envelope("response has wrong jsonrpc version", raw));
        }
        if response.id.as_ref() != Some(&id) {
            return Err(RpcError::envelope(
                format!("response id does not match request id {id}"),
                raw,
            ));
        }
        if let Some(error) = response.error {
            return Err(RpcError {
                description: error.message,
                code: Some(error.code),
                payload: error.data,
                source: None,
            });
        }
        response
            .result
            .ok_or_else(|| RpcError::envelope("response has neither result nor error", raw))
    }
}
