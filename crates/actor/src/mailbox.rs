use std::fmt::{self, Debug};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{Actor, ActorDeadError};

/// Helper trait for handling boxed messages.
pub trait BoxMessage<S>: Send + Debug + 'static {
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>);
}

/// The message that an actor can handle.
pub trait Message<S>: BoxMessage<S> {
    /// Handles the message with mutable access to the actor's state.
    ///
    /// Handlers run on the actor's task and block every other message
    /// while running, so they must not wait on anything.
    fn handle(self, state: &mut S, handle: &Actor<S>);
}

impl<S, M: Message<S>> BoxMessage<S> for M {
    #[inline]
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>) {
        (*self).handle(state, handle)
    }
}

impl<S, M: Message<S> + ?Sized> Message<S> for Box<M> {
    #[inline]
    fn handle(self, state: &mut S, handle: &Actor<S>) {
        self.handle_box(state, handle)
    }
}

/// A closure to run against the state, with its result sent back.
pub struct Call<S, F, R> {
    f: F,
    reply_tx: oneshot::Sender<R>,
    _state: std::marker::PhantomData<fn(&mut S)>,
}

impl<S, F, R> Call<S, F, R> {
    #[inline]
    pub fn new(f: F, reply_tx: oneshot::Sender<R>) -> Self {
        Self {
            f,
            reply_tx,
            _state: std::marker::PhantomData,
        }
    }
}

impl<S, F, R> Debug for Call<S, F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("returns", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}

impl<S, F, R> Message<S> for Call<S, F, R>
where
    S: 'static,
    F: FnOnce(&mut S, &Actor<S>) -> R + Send + 'static,
    R: Send + 'static,
{
    #[inline]
    fn handle(self, state: &mut S, handle: &Actor<S>) {
        // The caller may have given up waiting.
        self.reply_tx.send((self.f)(state, handle)).ok();
    }
}

pub struct MailboxParts<S> {
    pub mailbox: Mailbox<S>,
    pub msg_rx: mpsc::UnboundedReceiver<Box<dyn Message<S>>>,
    pub kill_rx: watch::Receiver<bool>,
}

pub struct Mailbox<S> {
    msg_tx: mpsc::UnboundedSender<Box<dyn Message<S>>>,
    kill_tx: watch::Sender<bool>,
}

impl<S: Send + 'static> Mailbox<S> {
    #[inline]
    pub fn new() -> MailboxParts<S> {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        MailboxParts {
            mailbox: Mailbox { msg_tx, kill_tx },
            msg_rx,
            kill_rx,
        }
    }

    #[inline]
    pub fn send(&self, msg: Box<dyn Message<S>>) -> Result<(), ActorDeadError> {
        self.msg_tx.send(msg).map_err(|_| ActorDeadError)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.msg_tx.is_closed()
    }

    #[inline]
    pub fn try_kill(&self) {
        self.kill_tx.send(true).ok();
    }
}
