//! Command channel from the UI into the runtime.

use std::time::Instant;

use murmur_client::{ClientEvent, FileUpload};
use murmur_proto::{ConversationId, MessageId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Receiving half of the runtime's event queue, owned by the driver.
pub type EventQueue<I = Instant> = mpsc::UnboundedReceiver<RuntimeEvent<I>>;

/// Everything that can arrive at the runtime.
#[derive(Debug, Clone)]
pub enum RuntimeEvent<I = Instant> {
    /// Feed an event to the client.
    Client(ClientEvent<I>),
    /// Leave the run loop.
    Shutdown,
}

impl<I> From<ClientEvent<I>> for RuntimeEvent<I> {
    fn from(event: ClientEvent<I>) -> Self {
        Self::Client(event)
    }
}

/// The runtime stopped and no longer accepts commands.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("runtime has stopped")]
pub struct HandleError;

/// Create a handle and the queue its commands land in.
///
/// Drivers push their own completions through clones of the same handle, so
/// commands and I/O results share one FIFO order.
pub fn event_channel<I>() -> (RuntimeHandle<I>, EventQueue<I>) {
    let (sender, queue) = mpsc::unbounded_channel();
    (RuntimeHandle { sender }, queue)
}

/// Cloneable command sender.
#[derive(Debug)]
pub struct RuntimeHandle<I = Instant> {
    sender: mpsc::UnboundedSender<RuntimeEvent<I>>,
}

impl<I> Clone for RuntimeHandle<I> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

impl<I> RuntimeHandle<I> {
    /// Queue any runtime event.
    pub fn send(&self, event: impl Into<RuntimeEvent<I>>) -> Result<(), HandleError> {
        self.sender.send(event.into()).map_err(|_| HandleError)
    }

    /// Bring the push channel up.
    pub fn connect(&self, token: impl Into<String>) -> Result<(), HandleError> {
        self.send(ClientEvent::Connect { token: token.into() })
    }

    /// Take the push channel down and stop reconnecting.
    pub fn disconnect(&self) -> Result<(), HandleError> {
        self.send(ClientEvent::Disconnect)
    }

    /// Send a text message.
    pub fn send_text(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<(), HandleError> {
        self.send(ClientEvent::SendText { conversation_id, content: content.into() })
    }

    /// Send a file.
    pub fn send_file(
        &self,
        conversation_id: ConversationId,
        file: FileUpload,
    ) -> Result<(), HandleError> {
        self.send(ClientEvent::SendFile { conversation_id, file })
    }

    /// Re-send a failed message.
    pub fn resend(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<(), HandleError> {
        self.send(ClientEvent::Resend { conversation_id, message_id })
    }

    /// Fetch older history.
    pub fn load_next_page(&self, conversation_id: ConversationId) -> Result<(), HandleError> {
        self.send(ClientEvent::LoadNextPage { conversation_id })
    }

    /// Switch the conversation on screen.
    pub fn set_active_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), HandleError> {
        self.send(ClientEvent::SetActiveConversation { conversation_id })
    }

    /// Open a background view.
    pub fn open_conversation(&self, conversation_id: ConversationId) -> Result<(), HandleError> {
        self.send(ClientEvent::OpenConversation { conversation_id })
    }

    /// Close a view.
    pub fn close_conversation(&self, conversation_id: ConversationId) -> Result<(), HandleError> {
        self.send(ClientEvent::CloseConversation { conversation_id })
    }

    /// Ask the runtime to stop.
    pub fn shutdown(&self) -> Result<(), HandleError> {
        self.send(RuntimeEvent::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_arrive_in_order() {
        let (handle, mut queue) = event_channel::<Instant>();

        handle.connect("t").unwrap();
        handle.clone().load_next_page(ConversationId(1)).unwrap();
        handle.shutdown().unwrap();

        assert!(matches!(queue.try_recv(), Ok(RuntimeEvent::Client(ClientEvent::Connect { .. }))));
        assert!(matches!(
            queue.try_recv(),
            Ok(RuntimeEvent::Client(ClientEvent::LoadNextPage { conversation_id: ConversationId(1) }))
        ));
        assert!(matches!(queue.try_recv(), Ok(RuntimeEvent::Shutdown)));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (handle, queue) = event_channel::<Instant>();
        drop(queue);

        assert_eq!(handle.disconnect(), Err(HandleError));
    }
}
