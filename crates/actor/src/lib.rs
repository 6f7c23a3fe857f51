//! A lightweight actor framework.
//!
//! An actor owns a piece of state and processes messages one at a time,
//! so the state never needs a lock. Long running work should be spawned
//! onto separate tasks that report back with another message.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod scheduler;

pub use error::ActorDeadError;
pub use handle::Actor;
pub use mailbox::Message;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    #[derive(Debug)]
    struct Add(u32);

    impl Message<Counter> for Add {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            state.value += self.0;
        }
    }

    #[derive(Debug)]
    struct Get(oneshot::Sender<u32>);

    impl Message<Counter> for Get {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            self.0.send(state.value).ok();
        }
    }

    #[derive(Debug)]
    struct AddLater(u32);

    impl Message<Counter> for AddLater {
        fn handle(self, _state: &mut Counter, handle: &Actor<Counter>) {
            // Messages sent from a handler are processed after it returns.
            handle.send(Add(self.0)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_send_message() {
        let actor = Actor::spawn(Counter::default(), Some("counter"));
        actor.send(Add(40)).unwrap();
        actor.send(AddLater(2)).unwrap();

        let (tx, rx) = oneshot::channel();
        actor.send(AddLater(0)).unwrap();
        actor.send(Get(tx)).unwrap();
        assert_eq!(rx.await.unwrap(), 40);

        let value = actor.call(|state, _| state.value).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_kill() {
        let actor = Actor::spawn(Counter::default(), None);
        assert!(actor.is_alive());
        actor.try_kill();

        timeout(Duration::from_millis(500), async {
            while actor.is_alive() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(actor.send(Add(1)).is_err());
        assert!(actor.call(|state, _| state.value).await.is_err());
    }
}
