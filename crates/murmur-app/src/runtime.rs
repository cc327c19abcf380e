//! Generic runtime for client orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`SyncClient`]: sync state machine
//! - [`Driver`]: platform-specific I/O

use murmur_client::{ClientAction, ClientEvent, SyncClient};
use murmur_core::Environment;

use crate::{Driver, RuntimeEvent};

/// Generic runtime that feeds driver events to the client and executes the
/// resulting actions.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment the client reads time and randomness from
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    client: SyncClient<E>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver<Instant = E::Instant>,
    E: Environment,
{
    /// Create a runtime around a configured client.
    pub fn new(driver: D, client: SyncClient<E>) -> Self {
        Self { driver, client }
    }

    /// Run the main event loop until a [`RuntimeEvent::Shutdown`].
    ///
    /// Each cycle:
    /// 1. Polls the driver, bounded by the client's next deadline
    /// 2. Feeds the event (or a tick) to the client
    /// 3. Executes the resulting actions through the driver
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error.
    pub async fn run(mut self) -> Result<(), D::Error> {
        tracing::info!(user = %self.client.user_id(), "runtime started");

        let result = loop {
            match self.step().await {
                Ok(true) => break Ok(()),
                Ok(false) => {},
                Err(e) => break Err(e),
            }
        };

        self.driver.stop();
        tracing::info!("runtime stopped");
        result
    }

    /// Process one cycle of the event loop.
    ///
    /// Returns `true` if the runtime should stop.
    pub async fn step(&mut self) -> Result<bool, D::Error> {
        let deadline = self.client.next_deadline();

        match self.driver.poll_event(deadline).await? {
            Some(RuntimeEvent::Shutdown) => {
                let actions = self.handle(ClientEvent::Disconnect);
                self.execute(actions).await?;
                Ok(true)
            },
            Some(RuntimeEvent::Client(event)) => {
                let actions = self.handle(event);
                self.execute(actions).await?;
                Ok(false)
            },
            None => {
                let now = self.driver.now();
                let actions = self.handle(ClientEvent::Tick { now });
                self.execute(actions).await?;
                Ok(false)
            },
        }
    }

    /// Feed one event to the client. Caller mistakes become error actions.
    fn handle(&mut self, event: ClientEvent<E::Instant>) -> Vec<ClientAction> {
        match self.client.handle(event) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(error = %e, "event rejected");
                vec![ClientAction::Error { conversation_id: None, reason: e.to_string() }]
            },
        }
    }

    /// Execute client actions in order.
    async fn execute(&mut self, actions: Vec<ClientAction>) -> Result<(), D::Error> {
        for action in actions {
            match action {
                ClientAction::OpenChannel { url } => self.driver.open_channel(&url).await?,
                ClientAction::SendFrame(frame) => match frame.encode() {
                    Ok(text) => self.driver.send_text(text).await?,
                    Err(e) => tracing::warn!(kind = %frame.kind(), error = %e, "frame not encodable"),
                },
                ClientAction::CloseChannel { reason } => self.driver.close_channel(&reason).await?,
                ClientAction::FetchHistory(request) => self.driver.fetch_history(request)?,
                ClientAction::SubmitMessage(submission) => self.driver.submit_message(submission)?,
                change @ (ClientAction::TimelineChanged { .. }
                | ClientAction::UnreadChanged { .. }
                | ClientAction::ConnectionChanged { .. }
                | ClientAction::Error { .. }) => self.driver.publish(&self.client, &change)?,
            }
        }
        Ok(())
    }

    /// Get a reference to the client
    pub fn client(&self) -> &SyncClient<E> {
        &self.client
    }

    /// Get a reference to the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get a mutable reference to the driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
