//! Multicast DNS service discovery and publication.
//!
//! [`Mdns`] ties the pieces together: a [`Listener`] owns the sockets, the
//! [`Registrar`] publishes local services, [`Discovery`] runs active queries
//! and the [`ServiceDb`] caches everything seen on the link and reports
//! changes to an [`EventSink`].

#[macro_use]
extern crate lazy_static;

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::time::Duration;

use log::{ info, warn };

pub mod clock;
pub mod config;
pub mod context;
pub mod discovery;
pub mod dns;
pub mod event;
mod hexdump;
pub mod listener;
pub mod mdns_error;
pub mod publisher;
pub mod registrar;
pub mod service;
pub mod servicedb;
pub mod socket;
pub mod transport;

pub use clock::{ Clock, SystemClock };
pub use config::Config;
pub use context::Context;
pub use discovery::Discovery;
pub use event::{ Event, EventKind, EventSink, LogSink, EVENT_NAME };
pub use listener::Listener;
pub use mdns_error::{ MdnsError, Result };
pub use publisher::{ Payload, Publisher, Queue, Token };
pub use registrar::Registrar;
pub use service::{ ServiceRecord, DEFAULT_TTL, SERVICES_QUERY };
pub use servicedb::ServiceDb;
pub use transport::Transport;

/// The mDNS component as seen by the enclosing tool.
pub struct Mdns
{
    transport: Arc<dyn Transport>,
    discovery: Arc<Discovery>,
    registrar: Arc<Registrar>,
    servicedb: Arc<ServiceDb>,
    closed: AtomicBool
}

impl Mdns
{
    /// Opens the sockets described by `config` and starts the cache.
    pub fn new(config: &Config, sink: Arc<dyn EventSink>) -> Result<Mdns>
    {
        config.validate()?;

        let listener = Listener::open(config)?;
        Mdns::with_transport(listener, sink, Arc::new(SystemClock))
    }

    /// Builds the component on an already open transport.
    pub fn with_transport(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Result<Mdns>
    {
        let discovery = Arc::new(Discovery::new(transport.clone()));
        let registrar = Registrar::new(transport.clone())?;

        let servicedb = match ServiceDb::new(transport.clone(), discovery.clone(), sink, clock)
        {
            Ok(servicedb) => servicedb,
            Err(err) =>
            {
                registrar.close()?;
                return Err(err);
            }
        };

        if let Err(err) = servicedb.start()
        {
            servicedb.close()?;
            registrar.close()?;
            return Err(err);
        }

        info!("mDNS ready in zone {}", transport.zone());

        Ok(Mdns
        {
            transport,
            discovery,
            registrar,
            servicedb,
            closed: AtomicBool::new(false)
        })
    }

    pub fn zone(&self) -> &str
    {
        self.transport.zone()
    }

    /// Instances of `service`, from the cache when possible.
    pub fn lookup(&self, service: &str, ctx: &Context) -> Result<Vec<ServiceRecord>>
    {
        self.servicedb.lookup(service, ctx)
    }

    /// Service types on the link, from the cache when possible.
    pub fn enumerate(&self, ctx: &Context) -> Result<Vec<String>>
    {
        self.servicedb.enumerate(ctx)
    }

    /// Publishes `record` until `lifetime` passes, `ctx` is done or the
    /// component closes. Blocks for the whole registration.
    pub fn register(&self, record: ServiceRecord, lifetime: Duration, ctx: &Context) -> Result<()>
    {
        self.registrar.register(record, lifetime, ctx)
    }

    /// Active queries that bypass the cache.
    pub fn discovery(&self) -> &Discovery
    {
        &self.discovery
    }

    /// The transport, for subscribing to its queues.
    pub fn transport(&self) -> &Arc<dyn Transport>
    {
        &self.transport
    }

    /// Stops the cache, retracts every registration and closes the transport.
    /// Idempotent.
    pub fn close(&self) -> Result<()>
    {
        if self.closed.swap(true, Ordering::SeqCst)
        {
            return Ok(());
        }

        let mut errors: Vec<MdnsError> = Vec::new();

        if let Err(err) = self.servicedb.close()
        {
            errors.push(err);
        }

        if let Err(err) = self.registrar.close()
        {
            errors.push(err);
        }

        if let Err(err) = self.transport.close()
        {
            errors.push(err);
        }

        info!("mDNS closed");

        MdnsError::compound(errors)
    }
}

impl Drop for Mdns
{
    fn drop(&mut self)
    {
        if let Err(err) = self.close()
        {
            warn!("{}", err);
        }
    }
}
