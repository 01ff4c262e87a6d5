use std::fmt::Display;
use std::time::Duration;

use log::{debug, error};
use tokio::sync::{mpsc, watch};

const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// A message loop that owns its state and runs as a single tokio task.
///
/// Messages are processed one at a time, so [`Actor::receive`] has exclusive access to the
/// actor and needs no locking. An error returned from any callback ends the loop.
pub trait Actor: Sized + Send + 'static {
    /// Identifies the actor in log messages.
    const NAME: &'static str;

    type Message: Send + 'static;
    type Options;
    type Error: Display + From<mpsc::error::SendError<Self::Message>>;

    fn new(options: Self::Options) -> Self;

    fn start(&mut self, _handle: &ActorHandle<Self>) -> Result<(), Self::Error> {
        Ok(())
    }

    fn receive(
        &mut self,
        message: Self::Message,
        handle: &ActorHandle<Self>,
    ) -> Result<ActorAction, Self::Error>;

    fn stop(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorAction {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    Running,
    Stopped,
}

pub struct ActorHandle<T: Actor> {
    mailbox: mpsc::Sender<T::Message>,
    state: watch::Receiver<ActorState>,
}

impl<T: Actor> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            state: self.state.clone(),
        }
    }
}

async fn run<T: Actor>(
    mut actor: T,
    mut mailbox: mpsc::Receiver<T::Message>,
    handle: ActorHandle<T>,
) -> Result<(), T::Error> {
    actor.start(&handle)?;
    while let Some(message) = mailbox.recv().await {
        if actor.receive(message, &handle)? == ActorAction::Stop {
            break;
        }
    }
    // Pending and later messages are rejected once the loop is over.
    mailbox.close();
    actor.stop()
}

impl<T: Actor> ActorHandle<T> {
    /// Spawns the actor on the current tokio runtime.
    pub fn new(options: T::Options) -> Self {
        Self::with_capacity(options, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(options: T::Options, capacity: usize) -> Self {
        let (mailbox, receiver) = mpsc::channel(capacity);
        let (state_tx, state) = watch::channel(ActorState::Running);
        let handle = Self { mailbox, state };
        let actor = T::new(options);
        let own = handle.clone();
        tokio::spawn(async move {
            match run(actor, receiver, own).await {
                Ok(()) => debug!("{} actor stopped", T::NAME),
                Err(e) => error!("{} actor failed: {e}", T::NAME),
            }
            state_tx.send_replace(ActorState::Stopped);
        });
        handle
    }

    /// Waits for mailbox capacity and delivers the message.
    pub async fn send(&self, message: T::Message) -> Result<(), T::Error> {
        Ok(self.mailbox.send(message).await?)
    }

    /// Delivers the message if the mailbox has room.
    /// Returns `false` when the message was dropped.
    pub fn try_send(&self, message: T::Message) -> bool {
        self.mailbox.try_send(message).is_ok()
    }

    /// Delivers the message after `delay`, unless the actor has stopped by then.
    pub fn send_later(&self, message: T::Message, delay: Duration) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(message).await;
        });
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow() == ActorState::Stopped
    }

    pub async fn wait_for_stop(mut self) {
        // A closed channel means the actor task is gone.
        let _ = self.state.wait_for(|s| *s == ActorState::Stopped).await;
    }
}
