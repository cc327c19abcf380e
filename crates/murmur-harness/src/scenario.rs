//! Scripted and generated scenarios over a full runtime.
//!
//! A [`Simulation`] owns a [`Runtime`] wired to a [`SimDriver`] and a seeded
//! [`SimEnv`]. Tests either call its methods directly or feed it a sequence
//! of [`Operation`]s produced by proptest or a fuzzer.

use arbitrary::Arbitrary;
use murmur_app::{Runtime, RuntimeHandle};
use murmur_client::{ClientConfig, SyncClient};
use murmur_core::ConnectionState;
use murmur_proto::{ConversationId, DeliveryStatus, MessageId, UserId};

use crate::{SimDriver, SimDriverError, SimEnv, invariants::InvariantRegistry};

/// Local user in every simulation.
pub const LOCAL_USER: UserId = UserId(1);

/// Sender of remote posts.
pub const REMOTE_USER: UserId = UserId(2);

/// Conversations operations are spread over.
pub const CONVERSATIONS: u8 = 3;

/// Events processed before [`Simulation::settle`] gives up.
const SETTLE_LIMIT: usize = 10_000;

const TOKEN: &str = "sim-token";

/// One step of a generated scenario.
///
/// Conversation fields are reduced modulo [`CONVERSATIONS`].
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Bring the channel up.
    Connect,
    /// Take the channel down.
    Disconnect,
    /// Switch the active conversation.
    SetActive {
        /// Conversation index
        conversation: u8,
    },
    /// Open a background view.
    Open {
        /// Conversation index
        conversation: u8,
    },
    /// Close a view.
    Close {
        /// Conversation index
        conversation: u8,
    },
    /// Request older history.
    LoadMore {
        /// Conversation index
        conversation: u8,
    },
    /// Send a text message.
    SendText {
        /// Conversation index
        conversation: u8,
        /// Message text
        text: String,
    },
    /// Re-send the oldest failed message of a view, if any.
    Resend {
        /// Conversation index
        conversation: u8,
    },
    /// Another user posts.
    RemotePost {
        /// Conversation index
        conversation: u8,
    },
    /// The server drops the channel.
    DropChannel,
    /// Refuse the next channel opens.
    RejectConnects {
        /// Number of opens to refuse
        count: u8,
    },
    /// Fail the next history requests.
    FailFetches {
        /// Number of requests to fail
        count: u8,
    },
    /// Fail the next submissions.
    FailSends {
        /// Number of submissions to fail
        count: u8,
    },
    /// Let time pass until the client's next deadline.
    Wait,
}

/// Map an operation's conversation index to an id.
pub fn conversation(index: u8) -> ConversationId {
    ConversationId(1 + u64::from(index % CONVERSATIONS))
}

/// A client runtime against the simulated backend.
pub struct Simulation {
    env: SimEnv,
    runtime: Runtime<SimDriver, SimEnv>,
    handle: RuntimeHandle,
    posts: u64,
}

impl Simulation {
    /// Simulation with the standard invariants checked on every change.
    pub fn new(seed: u64, page_size: u32) -> Result<Self, SimDriverError> {
        let env = SimEnv::with_seed(seed);
        let driver =
            SimDriver::new(env.clone(), LOCAL_USER).with_invariants(InvariantRegistry::standard());
        Self::with_driver(env, driver, page_size)
    }

    /// Simulation around a configured driver.
    pub fn with_driver(
        env: SimEnv,
        driver: SimDriver,
        page_size: u32,
    ) -> Result<Self, SimDriverError> {
        let config = ClientConfig { page_size, ..ClientConfig::default() };
        let client = SyncClient::new(env.clone(), LOCAL_USER, config)
            .map_err(|e| SimDriverError(e.to_string()))?;
        let handle = driver.handle();

        Ok(Self { env, runtime: Runtime::new(driver, client), handle, posts: 0 })
    }

    /// The simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Command handle.
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// The client under test.
    pub fn client(&self) -> &SyncClient<SimEnv> {
        self.runtime.client()
    }

    /// The simulation driver.
    pub fn driver(&self) -> &SimDriver {
        self.runtime.driver()
    }

    /// The simulation driver, for scripting the server.
    pub fn driver_mut(&mut self) -> &mut SimDriver {
        self.runtime.driver_mut()
    }

    /// Process events until nothing is in flight.
    pub async fn settle(&mut self) -> Result<(), SimDriverError> {
        for _ in 0..SETTLE_LIMIT {
            if !self.runtime.driver_mut().has_pending() {
                return Ok(());
            }
            if self.runtime.step().await? {
                return Err(SimDriverError("runtime stopped while settling".to_string()));
            }
        }
        Err(SimDriverError(format!("not settled after {SETTLE_LIMIT} events")))
    }

    /// Process at most `limit` pending events.
    pub async fn step_some(&mut self, limit: usize) -> Result<(), SimDriverError> {
        for _ in 0..limit {
            if !self.runtime.driver_mut().has_pending() {
                break;
            }
            self.runtime.step().await?;
        }
        Ok(())
    }

    /// Advance the clock to the client's next deadline and tick it.
    ///
    /// Does nothing when no timer is armed or events are still pending.
    pub async fn wait_for_deadline(&mut self) -> Result<(), SimDriverError> {
        if self.client().next_deadline().is_none() || self.runtime.driver_mut().has_pending() {
            return Ok(());
        }
        self.runtime.driver_mut().allow_idle_ticks(1);
        self.runtime.step().await?;
        Ok(())
    }

    /// Apply one operation and let a few events through.
    pub async fn apply(&mut self, operation: &Operation) -> Result<(), SimDriverError> {
        tracing::debug!(?operation, "apply");
        match operation {
            Operation::Connect => self.command(self.handle.connect(TOKEN))?,
            Operation::Disconnect => self.command(self.handle.disconnect())?,
            Operation::SetActive { conversation: c } => {
                self.command(self.handle.set_active_conversation(conversation(*c)))?;
            },
            Operation::Open { conversation: c } => {
                self.command(self.handle.open_conversation(conversation(*c)))?;
            },
            Operation::Close { conversation: c } => {
                self.command(self.handle.close_conversation(conversation(*c)))?;
            },
            Operation::LoadMore { conversation: c } => {
                self.command(self.handle.load_next_page(conversation(*c)))?;
            },
            Operation::SendText { conversation: c, text } => {
                self.command(self.handle.send_text(conversation(*c), text.clone()))?;
            },
            Operation::Resend { conversation: c } => {
                let id = conversation(*c);
                if let Some(message_id) = self.first_failed(id) {
                    self.command(self.handle.resend(id, message_id))?;
                }
            },
            Operation::RemotePost { conversation: c } => {
                self.posts += 1;
                let text = format!("remote {}", self.posts);
                self.driver_mut().remote_post(conversation(*c), REMOTE_USER, text)?;
            },
            Operation::DropChannel => self.driver_mut().drop_channel(),
            Operation::RejectConnects { count } => {
                self.driver_mut().server_mut().reject_next_connects(u32::from(*count % 4));
            },
            Operation::FailFetches { count } => {
                self.driver_mut().server_mut().fail_next_fetches(u32::from(*count % 4));
            },
            Operation::FailSends { count } => {
                self.driver_mut().server_mut().fail_next_sends(u32::from(*count % 4));
            },
            Operation::Wait => self.wait_for_deadline().await?,
        }

        let burst = self.env.pick(4);
        self.step_some(burst).await
    }

    /// Bring every open view in line with the server.
    ///
    /// Clears armed failures, reconnects twice so the second open is a
    /// reconnect that re-reads every view, then pages each view to the end.
    pub async fn converge(&mut self) -> Result<(), SimDriverError> {
        let server = self.driver_mut().server_mut();
        server.reject_next_connects(0);
        server.fail_next_fetches(0);
        server.fail_next_sends(0);

        self.settle().await?;
        for _ in 0..2 {
            self.command(self.handle.disconnect())?;
            self.command(self.handle.connect(TOKEN))?;
            self.settle().await?;
        }
        if self.client().connection_state() != ConnectionState::Connected {
            return Err(SimDriverError(format!(
                "expected connected, got {}",
                self.client().connection_state()
            )));
        }

        let views: Vec<_> = self.client().open_conversations().collect();
        for _ in 0..SETTLE_LIMIT {
            let unfinished: Vec<_> =
                views.iter().copied().filter(|id| self.client().has_more(*id)).collect();
            if unfinished.is_empty() {
                return Ok(());
            }
            for id in unfinished {
                self.command(self.handle.load_next_page(id))?;
            }
            self.settle().await?;
        }
        Err(SimDriverError("history never exhausted".to_string()))
    }

    /// Confirmed messages of every open view match the server exactly.
    pub fn check_converged(&self) -> Result<(), SimDriverError> {
        for id in self.client().open_conversations() {
            let Some(timeline) = self.client().timeline(id) else {
                continue;
            };
            let local: Vec<&MessageId> =
                timeline.messages().iter().filter(|m| !m.id.is_local()).map(|m| &m.id).collect();
            let server: Vec<&MessageId> =
                self.driver().server().messages(id).iter().map(|m| &m.id).collect();

            if local != server {
                return Err(SimDriverError(format!(
                    "conversation {id} diverged: client {local:?}, server {server:?}"
                )));
            }
        }
        Ok(())
    }

    fn first_failed(&self, conversation_id: ConversationId) -> Option<MessageId> {
        self.client()
            .timeline(conversation_id)?
            .messages()
            .iter()
            .find(|m| m.status == DeliveryStatus::Failed)
            .map(|m| m.id.clone())
    }

    fn command(&self, sent: Result<(), murmur_app::HandleError>) -> Result<(), SimDriverError> {
        sent.map_err(|e| SimDriverError(e.to_string()))
    }
}
