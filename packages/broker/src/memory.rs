//! In-process broker actor with at-least-once delivery.
//!
//! Semantics follow a hosted queue closely enough for the consumer to be
//! exercised honestly: received messages stay hidden for the visibility
//! timeout and reappear unless acknowledged, every delivery gets its own
//! token, and receivers can long-poll.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::time::Instant;

use crate::{AckToken, MessageQueue, QueueError, ReceivedMessage};

/// Extra time granted to a broker call beyond its own long-poll wait.
const CALL_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the in-memory broker.
#[derive(Debug, Clone)]
pub struct MemoryQueueConfig {
    /// How long a received message stays hidden before redelivery.
    pub visibility_timeout: Duration,
    /// How often expired deliveries and long-poll deadlines are checked.
    pub tick_interval: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(50),
        }
    }
}

impl MemoryQueueConfig {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// Snapshot of the broker's queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryQueueStats {
    /// Messages available for delivery.
    pub visible: usize,
    /// Delivered messages awaiting acknowledgment.
    pub in_flight: usize,
    /// Receivers blocked in a long poll.
    pub waiting: usize,
}

/// Messages for the broker actor.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Append a message.
    Publish {
        body: String,
        reply: RpcReplyPort<String>,
    },

    /// Take up to `max_messages`, waiting up to `wait` if none are visible.
    Receive {
        max_messages: usize,
        wait: Duration,
        reply: RpcReplyPort<Vec<ReceivedMessage>>,
    },

    /// Delete a delivered message.
    Acknowledge {
        token: AckToken,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Get queue stats.
    Stats { reply: RpcReplyPort<MemoryQueueStats> },

    /// Periodic tick for visibility and long-poll deadlines.
    Tick,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
}

struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

struct Waiter {
    max_messages: usize,
    deadline: Instant,
    reply: RpcReplyPort<Vec<ReceivedMessage>>,
}

/// State for the broker actor.
pub struct BrokerState {
    config: MemoryQueueConfig,
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<AckToken, InFlight>,
    waiters: VecDeque<Waiter>,
    next_message: u64,
    next_receipt: u64,
}

impl BrokerState {
    fn new(config: MemoryQueueConfig) -> Self {
        Self {
            config,
            visible: VecDeque::new(),
            in_flight: HashMap::new(),
            waiters: VecDeque::new(),
            next_message: 0,
            next_receipt: 0,
        }
    }

    fn stats(&self) -> MemoryQueueStats {
        MemoryQueueStats {
            visible: self.visible.len(),
            in_flight: self.in_flight.len(),
            waiting: self.waiters.len(),
        }
    }

    /// Hand out up to `max_messages` visible messages, hiding them.
    fn deliver(&mut self, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut batch = Vec::new();

        while batch.len() < max_messages.max(1) {
            let Some(mut message) = self.visible.pop_front() else {
                break;
            };
            message.receive_count += 1;
            self.next_receipt += 1;
            let token = AckToken::new(format!("{}:{}", message.id, self.next_receipt));

            batch.push(ReceivedMessage {
                message_id: message.id.clone(),
                body: message.body.clone(),
                token: token.clone(),
                receive_count: message.receive_count,
            });
            self.in_flight.insert(
                token,
                InFlight {
                    message,
                    visible_at: now + self.config.visibility_timeout,
                },
            );
        }

        batch
    }

    /// Undo a delivery whose receiver went away before taking it.
    fn restore(&mut self, tokens: &[AckToken]) {
        for token in tokens.iter().rev() {
            if let Some(mut entry) = self.in_flight.remove(token) {
                entry.message.receive_count = entry.message.receive_count.saturating_sub(1);
                self.visible.push_front(entry.message);
            }
        }
    }

    fn serve_waiters(&mut self) {
        while !self.visible.is_empty() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            let batch = self.deliver(waiter.max_messages);
            let tokens: Vec<AckToken> = batch.iter().map(|m| m.token.clone()).collect();
            if waiter.reply.send(batch).is_err() {
                self.restore(&tokens);
            }
        }
    }

    /// Make expired deliveries visible again and release timed-out receivers.
    fn on_tick(&mut self) {
        let now = Instant::now();

        let expired: Vec<AckToken> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(entry) = self.in_flight.remove(&token) {
                tracing::debug!(
                    message_id = %entry.message.id,
                    "Visibility timeout expired, message visible again"
                );
                self.visible.push_back(entry.message);
            }
        }

        self.serve_waiters();

        let (due, pending): (Vec<Waiter>, Vec<Waiter>) =
            self.waiters.drain(..).partition(|w| w.deadline <= now);
        self.waiters = pending.into();
        for waiter in due {
            let _ = waiter.reply.send(Vec::new());
        }
    }
}

/// Broker actor holding all queue state.
pub struct MemoryBroker;

impl Actor for MemoryBroker {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = MemoryQueueConfig;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting in-memory broker (visibility timeout {:?})",
            args.visibility_timeout
        );

        // Start periodic tick
        let tick_interval = args.tick_interval;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(BrokerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(BrokerState::new(args))
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::Publish { body, reply } => {
                state.next_message += 1;
                let id = format!("msg-{}", state.next_message);
                state.visible.push_back(StoredMessage {
                    id: id.clone(),
                    body,
                    receive_count: 0,
                });
                state.serve_waiters();
                let _ = reply.send(id);
            }

            BrokerMessage::Receive {
                max_messages,
                wait,
                reply,
            } => {
                let batch = state.deliver(max_messages);
                if !batch.is_empty() || wait.is_zero() {
                    let tokens: Vec<AckToken> = batch.iter().map(|m| m.token.clone()).collect();
                    if reply.send(batch).is_err() {
                        state.restore(&tokens);
                    }
                } else {
                    state.waiters.push_back(Waiter {
                        max_messages,
                        deadline: Instant::now() + wait,
                        reply,
                    });
                }
            }

            BrokerMessage::Acknowledge { token, reply } => {
                let result = match state.in_flight.remove(&token) {
                    Some(_) => Ok(()),
                    None => Err(QueueError::InvalidAcknowledgment(format!(
                        "token {} is expired or unknown",
                        token
                    ))),
                };
                let _ = reply.send(result);
            }

            BrokerMessage::Stats { reply } => {
                let _ = reply.send(state.stats());
            }

            BrokerMessage::Tick => state.on_tick(),
        }

        Ok(())
    }
}

/// Shared handle to a running in-memory broker.
#[derive(Clone)]
pub struct MemoryQueue {
    actor: ActorRef<BrokerMessage>,
}

impl MemoryQueue {
    /// Spawn the broker actor.
    pub async fn start(config: MemoryQueueConfig) -> Result<(Self, JoinHandle<()>), QueueError> {
        let (actor, handle) = Actor::spawn(None, MemoryBroker, config)
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to spawn broker: {}", e)))?;

        Ok((Self { actor }, handle))
    }

    /// Get current queue stats.
    pub async fn stats(&self) -> Result<MemoryQueueStats, QueueError> {
        self.call(|reply| BrokerMessage::Stats { reply }, CALL_GRACE)
            .await
    }

    /// Stop the broker. Blocked receivers are released with an error.
    pub fn shutdown(&self) {
        self.actor.stop(None);
    }

    async fn call<T, F>(&self, build: F, timeout: Duration) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> BrokerMessage,
    {
        match ractor::rpc::call(&self.actor, build, Some(timeout)).await {
            Ok(ractor::rpc::CallResult::Success(value)) => Ok(value),
            Ok(ractor::rpc::CallResult::Timeout) => {
                Err(QueueError::Unavailable("broker call timed out".into()))
            }
            Ok(ractor::rpc::CallResult::SenderError) => {
                Err(QueueError::Unavailable("broker dropped the request".into()))
            }
            Err(e) => Err(QueueError::Unavailable(format!("broker is not running: {}", e))),
        }
    }
}

impl MessageQueue for MemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.call(
            |reply| BrokerMessage::Receive {
                max_messages,
                wait,
                reply,
            },
            wait + CALL_GRACE,
        )
        .await
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<(), QueueError> {
        let token = token.clone();
        self.call(|reply| BrokerMessage::Acknowledge { token, reply }, CALL_GRACE)
            .await?
    }

    async fn publish(&self, body: String) -> Result<String, QueueError> {
        self.call(|reply| BrokerMessage::Publish { body, reply }, CALL_GRACE)
            .await
    }
}
