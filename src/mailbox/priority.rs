use serde::{Deserialize, Serialize};

/// Delivery tier of a mailbox message.
///
/// Declared by the message type itself via [`Prioritized`]; senders never
/// choose it per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Bypasses queued normal messages (control traffic such as stop or heartbeat).
    JumpAhead,
    /// Regular FIFO delivery.
    #[default]
    Normal,
}

impl Priority {
    /// True for [`Priority::JumpAhead`].
    #[inline]
    pub fn is_jump_ahead(self) -> bool {
        matches!(self, Priority::JumpAhead)
    }
}

/// Messages that declare their own delivery tier.
///
/// The default is [`Priority::Normal`], so bulk message types only need an
/// empty impl.
///
/// # Example
/// ```rust
/// use fleetvisor::{Prioritized, Priority};
///
/// enum AgentCommand {
///     Stop,
///     AppendLog(String),
/// }
///
/// impl Prioritized for AgentCommand {
///     fn priority(&self) -> Priority {
///         match self {
///             AgentCommand::Stop => Priority::JumpAhead,
///             AgentCommand::AppendLog(_) => Priority::Normal,
///         }
///     }
/// }
///
/// assert!(AgentCommand::Stop.priority().is_jump_ahead());
/// ```
pub trait Prioritized {
    /// Tier this message is queued in.
    fn priority(&self) -> Priority {
        Priority::Normal
    }
}

impl<M: Prioritized + ?Sized> Prioritized for Box<M> {
    fn priority(&self) -> Priority {
        (**self).priority()
    }
}
