use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::envelope::{JSONRPC_VERSION, JsonRpcResponse, RequestId};
use super::{INVALID_REQUEST, METHOD_NOT_FOUND, METHOD_UNAVAILABLE, RPC_TARGET, RpcMethod};
use crate::channel::{ChannelError, RawChannel, Received};

/// Errors raised by [`ServerPull`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A response was issued for an id that is not in flight.
    #[error("request {0} is not in progress")]
    UnknownRequest(RequestId),
    /// The channel failed while answering.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// A validated request handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall<M> {
    /// Parsed method.
    pub method: M,
    /// Request id; `None` for notifications.
    pub id: Option<RequestId>,
    /// Parameters; an empty object when the request carried none.
    pub params: Value,
}

/// Result of asking the dispatcher for the next request.
#[derive(Debug, Clone, PartialEq)]
pub enum Pulled<M> {
    /// A request the caller must answer with `complete` or `error`.
    Call(IncomingCall<M>),
    /// No acceptable request is available yet.
    Pending,
    /// The input side of the channel has ended.
    Closed,
}

/// Server side of the correlation layer.
///
/// Requests are pulled on demand instead of being pushed to handlers, so the
/// caller decides when to accept input and which methods are currently
/// legal. Malformed, duplicate, unknown or disallowed requests are answered
/// here and never reach the caller.
#[derive(Debug)]
pub struct ServerPull<C> {
    channel: C,
    in_flight: HashSet<RequestId>,
}

impl<C: RawChannel> ServerPull<C> {
    /// Wraps a channel.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            in_flight: HashSet::new(),
        }
    }

    /// Borrows the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Whether `id` has been handed out and not yet answered.
    #[must_use]
    pub fn is_in_flight(&self, id: &RequestId) -> bool {
        self.in_flight.contains(id)
    }

    /// Blocks until an acceptable request arrives or the input closes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Channel`] if answering a rejected request fails.
    pub fn begin<M: RpcMethod>(
        &mut self,
        allowed: Option<&[M]>,
    ) -> Result<Pulled<M>, DispatchError> {
        self.try_begin(allowed, true)
    }

    /// Returns the next acceptable request, if any.
    ///
    /// Rejected requests are answered and skipped, so one call may consume
    /// several input values. With `block` set the call waits for input;
    /// otherwise it returns [`Pulled::Pending`] as soon as none is ready.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Channel`] if answering a rejected request fails.
    pub fn try_begin<M: RpcMethod>(
        &mut self,
        allowed: Option<&[M]>,
        block: bool,
    ) -> Result<Pulled<M>, DispatchError> {
        loop {
            let raw = if block {
                match self.channel.recv() {
                    Ok(value) => value,
                    Err(ChannelError::Closed) => return Ok(Pulled::Closed),
                    Err(error) => return Err(error.into()),
                }
            } else {
                match self.channel.try_recv() {
                    Received::Value(value) => value,
                    Received::Pending => return Ok(Pulled::Pending),
                    Received::Closed => return Ok(Pulled::Closed),
                }
            };
            match self.screen(raw, allowed) {
                Ok(call) => {
                    if let Some(id) = &call.id {
                        self.in_flight.insert(id.clone());
                    }
                    debug!(
                        target: RPC_TARGET,
                        method = call.method.name(),
                        id = ?call.id,
                        "request accepted"
                    );
                    return Ok(Pulled::Call(call));
                }
                Err(rejection) => {
                    warn!(
                        target: RPC_TARGET,
                        id = ?rejection.id,
                        code = rejection.code,
                        reason = %rejection.message,
                        "request rejected"
                    );
                    if rejection.answer {
                        self.send(&JsonRpcResponse::failure(
                            rejection.id,
                            rejection.code,
                            rejection.message,
                        ))?;
                    }
                }
            }
        }
    }

    /// Answers a request with a result and retires its id.
    ///
    /// A `None` id denotes a notification and sends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownRequest`] when `id` is not in flight and
    /// [`DispatchError::Channel`] when sending fails.
    pub fn complete(&mut self, id: Option<&RequestId>, result: Value) -> Result<(), DispatchError> {
        let Some(id) = id else {
            return Ok(());
        };
        self.retire(id)?;
        self.send(&JsonRpcResponse::success(id.clone(), result))
    }

    /// Answers a request with an error and retires its id.
    ///
    /// A `None` id denotes a notification and sends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownRequest`] when `id` is not in flight and
    /// [`DispatchError::Channel`] when sending fails.
    pub fn error(
        &mut self,
        id: Option<&RequestId>,
        code: i64,
        message: &str,
    ) -> Result<(), DispatchError> {
        let Some(id) = id else {
            return Ok(());
        };
        self.retire(id)?;
        self.send(&JsonRpcResponse::failure(Some(id.clone()), code, message))
    }

    fn retire(&mut self, id: &RequestId) -> Result<(), DispatchError> {
        if self.in_flight.remove(id) {
            Ok(())
        } else {
            Err(DispatchError::UnknownRequest(id.clone()))
        }
    }

    fn send(&mut self, response: &JsonRpcResponse) -> Result<(), DispatchError> {
        let value = serde_json::to_value(response).map_err(ChannelError::Encode)?;
        self.channel.send(&value)?;
        Ok(())
    }

    fn screen<M: RpcMethod>(
        &self,
        raw: Value,
        allowed: Option<&[M]>,
    ) -> Result<IncomingCall<M>, Rejection> {
        let Value::Object(mut envelope) = raw else {
            return Err(Rejection::invalid(None, "request must be a JSON object"));
        };

        let id = match envelope.remove("id") {
            None => None,
            Some(raw_id) => match RequestId::from_json(&raw_id) {
                Some(id) => Some(id),
                None => {
                    return Err(Rejection::invalid(
                        None,
                        "request id must be a string or integer",
                    ));
                }
            },
        };

        if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Rejection::invalid(id, "jsonrpc member must be \"2.0\""));
        }
        if let Some(id) = &id
            && self.in_flight.contains(id)
        {
            // Answered with a null id so the reply cannot be mistaken for the
            // original request's response.
            return Err(Rejection {
                answer: true,
                id: None,
                code: INVALID_REQUEST,
                message: format!("request id {id} is already in progress"),
            });
        }

        let Some(Value::String(name)) = envelope.remove("method") else {
            return Err(Rejection::invalid(id, "method member must be a string"));
        };
        let Some(method) = M::parse(&name) else {
            return Err(Rejection {
                answer: id.is_some(),
                id,
                code: METHOD_NOT_FOUND,
                message: format!("method '{name}' not found"),
            });
        };
        if let Some(allowed) = allowed
            && !allowed.contains(&method)
        {
            return Err(Rejection {
                answer: id.is_some(),
                id,
                code: METHOD_UNAVAILABLE,
                message: format!("method '{name}' is not currently available"),
            });
        }

        let params = match envelope.remove("params") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(params @ (Value::Object(_) | Value::Array(_))) => params,
            Some(_) => {
                return Err(Rejection::invalid(id, "params must be an object or array"));
            }
        };

        Ok(IncomingCall { method, id, params })
    }
}

struct Rejection {
    answer: bool,
    id: Option<RequestId>,
    code: i64,
    message: String,
}

impl Rejection {
    fn invalid(id: Option<RequestId>, message: &str) -> Self {
        Self {
            answer: true,
            id,
            code: INVALID_REQUEST,
            message: message.to_owned(),
        }
    }
}
