//! # Messages, Topics and Envelopes
//!
//! Messages are plain Rust values. The runtime moves them around type-erased
//! inside an [`Envelope`], which remembers the concrete [`MessageType`] and the
//! optional [`Topic`] used for routing.

use crate::framework::error::DispatchError;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Anything that can be published and handled.
///
/// Implemented automatically for every `Debug + Send + Sync + 'static` type.
pub trait Message: Any + Send + Sync + fmt::Debug {}

impl<T: Any + Send + Sync + fmt::Debug> Message for T {}

/// Drops the module path from a type name (`app::events::OrderPlaced` → `OrderPlaced`).
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

/// Runtime identity of a message type.
///
/// Equality and hashing use the [`TypeId`] only; the name is for logs.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self.short_name())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A routing qualifier that narrows which subscribers receive a message.
///
/// A topic is never empty and never whitespace-only. "No topic" is
/// represented as `Option::<Topic>::None`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Builds a topic, rejecting empty and whitespace-only strings.
    pub fn new(topic: impl AsRef<str>) -> Result<Self, DispatchError> {
        let topic = topic.as_ref();
        if topic.trim().is_empty() {
            return Err(DispatchError::InvalidArgument(format!(
                "topic {topic:?} must contain non-whitespace characters"
            )));
        }
        Ok(Self(Arc::from(topic)))
    }

    /// Interprets an optional topic string the way every public API does:
    /// absent or `""` means no topic, whitespace-only is rejected.
    pub fn parse(topic: Option<&str>) -> Result<Option<Self>, DispatchError> {
        match topic {
            None | Some("") => Ok(None),
            Some(t) => Self::new(t).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({:?})", self.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders an optional topic for logs and error messages.
pub(crate) fn topic_label(topic: Option<&Topic>) -> String {
    topic.map_or_else(|| "<none>".to_string(), |t| t.as_str().to_string())
}

/// A type-erased message plus its routing key.
///
/// Cloning is cheap: the payload is shared.
#[derive(Clone)]
pub struct Envelope {
    message_type: MessageType,
    topic: Option<Topic>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Envelope {
    pub fn new<M: Message>(message: M, topic: Option<Topic>) -> Self {
        Self {
            message_type: MessageType::of::<M>(),
            topic,
            payload: Arc::new(message),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.payload.as_ref().downcast_ref::<M>()
    }

    pub(crate) fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.payload.as_ref()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("message_type", &self.message_type)
            .field("topic", &self.topic)
            .finish()
    }
}
