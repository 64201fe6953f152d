//! Messages exchanged between the server and client side of a [`PluginClient`](crate::client::PluginClient).
//!
//! A [`PluginMessage`] is tagged with a caller-chosen identifier. A reply carries the
//! identifier of the message it answers, which is how replies are correlated with blocked
//! [`send_and_wait`](crate::client::PluginClient::send_and_wait) calls.
//!
//! Replies are never replied to. The dispatcher discards any reply a handler produces in
//! answer to a reply, so two handlers cannot bounce messages back and forth forever.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// Key/value parameters of a message.
pub type Params = HashMap<String, String>;

/// The side of a plugin client a message is sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// From the client-side handler to the server-side handler.
    ToServer,
    /// From the server-side handler to the client-side handler.
    ToClient,
}

impl Direction {
    /// Returns the opposite direction, which is where replies travel.
    pub fn invert(self) -> Direction {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToServer => write!(f, "ToServer"),
            Direction::ToClient => write!(f, "ToClient"),
        }
    }
}

/// Access level of the client side, as seen by the server-side handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientPermissions {
    /// The client is running in the same process.
    Direct,
    /// The client is connected over the network with full access.
    FullNetwork,
    /// The client is connected over the network with restricted access.
    RestrictedNetwork,
}

/// Scheduling hint for handler invocations.
///
/// A handler advertises its priority through
/// [`MessageHandler::priority`](crate::handler::MessageHandler::priority). Higher priorities are
/// picked first when the worker pool is saturated, but ordering is never guaranteed.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Lowest priority, for bulk work.
    Min,
    /// Below normal.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Above normal.
    High,
    /// Latency sensitive work.
    Max,
}

impl Priority {
    /// All priorities, from highest to lowest.
    pub const DESCENDING: [Priority; 5] = [
        Priority::Max,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Min,
    ];
}

/// Outcome fields carried by a reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyStatus {
    /// Whether the request succeeded.
    pub success: bool,
    /// Machine readable error code, only set on failures.
    pub error_code: Option<String>,
    /// Human readable error description, only set on failures.
    pub error_message: Option<String>,
}

/// A message sent through a plugin client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMessage {
    /// Correlation identifier.
    ///
    /// Must be unique among the concurrently outstanding non-reply messages of a client.
    pub identifier: String,
    /// Key/value payload.
    pub params: Params,
    /// Optional binary attachment.
    pub data: Option<Vec<u8>>,
    /// Set if and only if this message is a reply.
    pub reply: Option<ReplyStatus>,
    /// Permissions of the client side. Stamped on delivery to the server-side handler.
    pub permissions: Option<ClientPermissions>,
}

impl PluginMessage {
    /// Creates a new non-reply message with a random identifier.
    pub fn new(params: Params, data: Option<Vec<u8>>) -> Self {
        PluginMessage::with_identifier(uuid::Uuid::new_v4().to_string(), params, data)
    }

    /// Creates a new non-reply message with the given identifier.
    pub fn with_identifier(
        identifier: impl Into<String>,
        params: Params,
        data: Option<Vec<u8>>,
    ) -> Self {
        PluginMessage {
            identifier: identifier.into(),
            params,
            data,
            reply: None,
            permissions: None,
        }
    }

    /// Creates an empty success reply for the message with the given identifier.
    pub fn success_reply(identifier: impl Into<String>) -> Self {
        PluginMessage {
            identifier: identifier.into(),
            params: Params::new(),
            data: None,
            reply: Some(ReplyStatus {
                success: true,
                error_code: None,
                error_message: None,
            }),
            permissions: None,
        }
    }

    /// Creates a failure reply for the message with the given identifier.
    pub fn failure_reply(
        identifier: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        PluginMessage {
            identifier: identifier.into(),
            params: Params::new(),
            data: None,
            reply: Some(ReplyStatus {
                success: false,
                error_code: Some(error_code.into()),
                error_message: Some(error_message.into()),
            }),
            permissions: None,
        }
    }

    /// Creates a success reply to this message carrying a payload.
    pub fn reply(&self, params: Params, data: Option<Vec<u8>>) -> PluginMessage {
        PluginMessage {
            params,
            data,
            ..PluginMessage::success_reply(self.identifier.clone())
        }
    }

    /// Creates a failure reply to this message.
    pub fn error_reply(
        &self,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> PluginMessage {
        PluginMessage::failure_reply(self.identifier.clone(), error_code, error_message)
    }

    /// Returns `true` if this message is a reply to another message.
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Returns `true` if this message is a successful reply.
    pub fn is_success(&self) -> bool {
        self.reply.as_ref().is_some_and(|status| status.success)
    }

    /// The error code of a failed reply.
    pub fn error_code(&self) -> Option<&str> {
        self.reply.as_ref()?.error_code.as_deref()
    }

    /// The error message of a failed reply.
    pub fn error_message(&self) -> Option<&str> {
        self.reply.as_ref()?.error_message.as_deref()
    }
}

impl fmt::Display for PluginMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginMessage({}", self.identifier)?;
        match &self.reply {
            Some(status) if status.success => write!(f, ", reply: success)"),
            Some(status) => write!(
                f,
                ", reply: {})",
                status.error_code.as_deref().unwrap_or("failure")
            ),
            None => write!(f, ")"),
        }
    }
}
