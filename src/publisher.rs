use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{ mpsc, Arc, Mutex, MutexGuard };

use log::{ debug, warn };

use crate::dns::Message;
use crate::mdns_error::{ MdnsError, Result };
use crate::service::ServiceRecord;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Queue
{
    /// Parsed and validated inbound messages.
    Messages,
    /// Datagrams that failed to parse or validate.
    Errors,
    /// Service types observed by the cache.
    Names,
    /// Service records ingested by the cache.
    Records
}

/// Opaque subscription handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(u64);

#[derive(Clone, Debug)]
pub enum Payload
{
    Message(Arc<Message>, SocketAddr),
    Error(Arc<MdnsError>),
    Name(String),
    Record(Arc<ServiceRecord>)
}

pub type Handler = Arc<dyn Fn(&Payload) + Send + Sync>;

#[derive(Clone)]
enum Subscriber
{
    Handler(Handler),
    Channel(mpsc::SyncSender<Payload>)
}

impl fmt::Debug for Subscriber
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self
        {
            Subscriber::Handler(_) => write!(f, "Handler"),
            Subscriber::Channel(_) => write!(f, "Channel")
        }
    }
}

#[derive(Debug, Default)]
struct State
{
    next_token: u64,
    closed: bool,
    subscribers: HashMap<Queue, Vec<(Token, Subscriber)>>
}

/// Named queues with handler and bounded-channel subscribers.
///
/// Emits dispatch to a snapshot of the subscriber list taken under the lock;
/// the lock is released before any subscriber runs, so handlers may subscribe,
/// unsubscribe or send without deadlocking.
#[derive(Debug, Default)]
pub struct Publisher
{
    state: Mutex<State>
}

impl Publisher
{
    pub fn new() -> Publisher
    {
        Publisher::default()
    }

    fn lock(&self) -> MutexGuard<'_, State>
    {
        match self.state.lock()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    fn add(&self, queue: Queue, subscriber: Subscriber) -> Result<Token>
    {
        let mut state = self.lock();
        if state.closed
        {
            return Err(MdnsError::OutOfOrder(String::from("subscribe: publisher closed")));
        }

        state.next_token += 1;
        let token = Token(state.next_token);
        state.subscribers.entry(queue).or_default().push((token, subscriber));

        Ok(token)
    }

    /// Runs `handler` synchronously for every payload emitted on `queue`.
    /// Handlers are expected to copy what they need and return.
    pub fn subscribe<F>(&self, queue: Queue, handler: F) -> Result<Token>
    where
        F: Fn(&Payload) + Send + Sync + 'static
    {
        self.add(queue, Subscriber::Handler(Arc::new(handler)))
    }

    /// Delivers payloads into a channel holding at most `capacity` entries.
    /// Payloads that find the channel full are dropped.
    pub fn subscribe_channel(&self, queue: Queue, capacity: usize) -> Result<(Token, mpsc::Receiver<Payload>)>
    {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let token = self.add(queue, Subscriber::Channel(sender))?;

        Ok((token, receiver))
    }

    /// Removes a subscription. Each token is accepted once; after `close`
    /// this is a no-op.
    pub fn unsubscribe(&self, token: Token) -> Result<()>
    {
        let mut state = self.lock();
        if state.closed
        {
            return Ok(());
        }

        for subscribers in state.subscribers.values_mut()
        {
            if let Some(position) = subscribers.iter().position(|(t, _)| *t == token)
            {
                // Dropping a channel sender closes the receiving end.
                subscribers.remove(position);
                return Ok(());
            }
        }

        Err(MdnsError::NotFound(format!("unsubscribe: {:?}", token)))
    }

    pub fn emit(&self, queue: Queue, payload: Payload)
    {
        let snapshot: Vec<Subscriber> = {
            let state = self.lock();
            match state.subscribers.get(&queue)
            {
                Some(subscribers) => subscribers.iter().map(|(_, subscriber)| subscriber.clone()).collect(),
                None => return
            }
        };

        for subscriber in snapshot
        {
            match subscriber
            {
                Subscriber::Handler(handler) => handler(&payload),
                Subscriber::Channel(sender) =>
                {
                    match sender.try_send(payload.clone())
                    {
                        Ok(()) => (),
                        Err(mpsc::TrySendError::Full(_)) =>
                        {
                            warn!("Dropping {:?} payload, subscriber channel is full", queue);
                        },
                        Err(mpsc::TrySendError::Disconnected(_)) =>
                        {
                            debug!("Subscriber on {:?} went away", queue);
                        }
                    }
                }
            }
        }
    }

    pub fn subscriber_count(&self, queue: Queue) -> usize
    {
        self.lock().subscribers.get(&queue).map(|subscribers| subscribers.len()).unwrap_or(0)
    }

    /// Drops every subscriber, closing channel receivers. Idempotent.
    pub fn close(&self)
    {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}
