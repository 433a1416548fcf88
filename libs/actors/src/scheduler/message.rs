//! Inter-lane messages.
//!
//! Every change of actor ownership travels as one of these through the
//! receiving lane's inbox for the sending lane.

use super::state::ActorState;
use std::fmt;
use std::sync::Arc;

pub(crate) enum ThreadMessage {
    /// Take ownership of a new actor
    AddActor { actor: Arc<ActorState> },
    /// Drop an actor and confirm to `source`
    RemoveActor {
        source: usize,
        actor: Arc<ActorState>,
    },
    /// Confirmation consumed by the scheduler's bookkeeping lane
    RemoveActorResponse { actor: Arc<ActorState> },
    /// `source` is idle and asks for an actor
    StealActor { source: usize },
    /// Reply to a steal request, possibly empty
    StealActorResponse { actor: Option<Arc<ActorState>> },
}

impl ThreadMessage {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ThreadMessage::AddActor { .. } => "add_actor",
            ThreadMessage::RemoveActor { .. } => "remove_actor",
            ThreadMessage::RemoveActorResponse { .. } => "remove_actor_response",
            ThreadMessage::StealActor { .. } => "steal_actor",
            ThreadMessage::StealActorResponse { .. } => "steal_actor_response",
        }
    }
}

impl fmt::Debug for ThreadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}
