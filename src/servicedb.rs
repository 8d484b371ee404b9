use std::collections::{ HashMap, VecDeque };
use std::sync::{ Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard, Weak };
use std::thread;
use std::time::{ Duration, Instant };

use log::{ debug, warn };

use crate::clock::Clock;
use crate::context::Context;
use crate::discovery::{ fold_message, Discovery };
use crate::dns::Message;
use crate::event::{ Event, EventKind, EventSink };
use crate::mdns_error::{ MdnsError, Result };
use crate::publisher::{ Payload, Queue, Token };
use crate::service::{ validate_service_type, ServiceRecord };
use crate::transport::Transport;

/// How often expired entries are swept.
const EXPIRE_INTERVAL: Duration = Duration::from_millis(250);
/// Minimum spacing between two background lookups.
const LOOKUP_INTERVAL: Duration = Duration::from_millis(500);
const LOOKUP_DEADLINE: Duration = Duration::from_secs(1);

struct CachedService
{
    record: ServiceRecord,
    expires_at: Instant
}

impl CachedService
{
    /// The record with its TTL reduced to the time it has left.
    fn remaining(&self, now: Instant) -> ServiceRecord
    {
        let mut record = self.record.clone();
        record.ttl = self.expires_at.saturating_duration_since(now);
        record
    }
}

#[derive(Default)]
struct State
{
    /// service type -> instance key -> entry
    services: HashMap<String, HashMap<String, CachedService>>,
    /// service type -> expiry
    names: HashMap<String, Instant>,
    /// Service types waiting for a background lookup.
    name_queue: VecDeque<String>
}

/// Changes produced under the lock and delivered after it is released.
#[derive(Default)]
struct Changes
{
    events: Vec<Event>,
    payloads: Vec<(Queue, Payload)>
}

/// Passive cache of everything seen on the link, with expiry and background
/// refresh of newly learned service types.
pub struct ServiceDb
{
    transport: Arc<dyn Transport>,
    discovery: Arc<Discovery>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    zone: String,
    state: RwLock<State>,
    /// Held from computing changes until they are delivered, so the sink sees
    /// them in the order they were applied. Never taken under `state`.
    delivery: Mutex<()>,
    shutdown: Context,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    token: Mutex<Option<Token>>
}

impl ServiceDb
{
    /// Creates the cache and subscribes it to inbound messages. Background
    /// loops start with [`ServiceDb::start`].
    pub fn new(transport: Arc<dyn Transport>, discovery: Arc<Discovery>, sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Result<Arc<ServiceDb>>
    {
        let db = Arc::new(ServiceDb
        {
            zone: transport.zone().to_string(),
            transport,
            discovery,
            sink,
            clock,
            state: RwLock::new(State::default()),
            delivery: Mutex::new(()),
            shutdown: Context::background(),
            threads: Mutex::new(Vec::new()),
            token: Mutex::new(None)
        });

        let weak: Weak<ServiceDb> = Arc::downgrade(&db);
        let token = db.transport.publisher().subscribe(Queue::Messages, move |payload|
        {
            if let (Some(db), Payload::Message(message, _)) = (weak.upgrade(), payload)
            {
                if message.is_response()
                {
                    db.ingest(message);
                }
            }
        })?;

        *db.token.lock()? = Some(token);

        Ok(db)
    }

    /// Starts the expiry and background lookup loops.
    pub fn start(self: &Arc<Self>) -> Result<()>
    {
        let mut threads = self.threads.lock()?;
        if !threads.is_empty()
        {
            return Err(MdnsError::OutOfOrder(String::from("start: already running")));
        }

        let db = self.clone();
        threads.push(thread::Builder::new()
            .name(String::from("mdns-expire"))
            .spawn(move ||
            {
                while !db.shutdown.wait(EXPIRE_INTERVAL)
                {
                    db.expire();
                }
            })
            .map_err(|err| MdnsError::io("start: spawn expiry", err))?);

        let db = self.clone();
        threads.push(thread::Builder::new()
            .name(String::from("mdns-lookup"))
            .spawn(move ||
            {
                while !db.shutdown.wait(LOOKUP_INTERVAL)
                {
                    db.lookup_next();
                }
            })
            .map_err(|err| MdnsError::io("start: spawn lookup", err))?);

        Ok(())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State>
    {
        match self.state.write()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    fn delivery(&self) -> MutexGuard<'_, ()>
    {
        match self.delivery.lock()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    fn deliver(&self, changes: Changes)
    {
        for (queue, payload) in changes.payloads
        {
            self.transport.publisher().emit(queue, payload);
        }

        for event in changes.events
        {
            self.sink.emit(event);
        }
    }

    /// Applies every answer in an inbound response.
    pub fn ingest(&self, message: &Message)
    {
        let answers = fold_message(message, &self.zone);
        if answers.records.is_empty() && answers.names.is_empty()
        {
            return;
        }

        let _delivery = self.delivery();
        let now = self.clock.now();
        let mut changes = Changes::default();

        {
            let mut state = self.write();

            for (service, ttl) in answers.names
            {
                self.apply_name(&mut state, &service, ttl, now, &mut changes);
            }

            for record in answers.records
            {
                self.apply_record(&mut state, record, now, &mut changes);
            }
        }

        self.deliver(changes);
    }

    fn apply_name(&self, state: &mut State, service: &str, ttl: Duration, now: Instant, changes: &mut Changes)
    {
        if ttl.is_zero()
        {
            if state.names.remove(service).is_some()
            {
                debug!("Service type {} withdrawn", service);
            }
            return;
        }

        let expires_at = now + ttl;

        match state.names.get_mut(service)
        {
            Some(existing) =>
            {
                *existing = (*existing).max(expires_at);
            },
            None =>
            {
                state.names.insert(service.to_string(), expires_at);

                if validate_service_type(service) && !state.name_queue.iter().any(|queued| queued == service)
                {
                    state.name_queue.push_back(service.to_string());
                }

                let mut record = ServiceRecord::new("", service, 0);
                record.zone = self.zone.clone();
                record.ttl = ttl;

                changes.payloads.push((Queue::Names, Payload::Name(service.to_string())));
                changes.events.push(Event::new(EventKind::Name, record));
            }
        }
    }

    fn apply_record(&self, state: &mut State, record: ServiceRecord, now: Instant, changes: &mut Changes)
    {
        let key = record.key();
        let service = record.service.clone();

        if record.is_goodbye()
        {
            let removed = state.services.get_mut(&service).and_then(|instances| instances.remove(&key));
            if let Some(entry) = removed
            {
                let mut gone = entry.record;
                gone.ttl = Duration::ZERO;
                changes.events.push(Event::new(EventKind::Removed, gone));
            }
            return;
        }

        self.apply_name(state, &service, record.ttl, now, changes);
        changes.payloads.push((Queue::Records, Payload::Record(Arc::new(record.clone()))));

        let expires_at = now + record.ttl;
        let instances = state.services.entry(service).or_default();

        match instances.get_mut(&key)
        {
            Some(entry) =>
            {
                let changed = entry.record != record;
                entry.record = record;
                entry.expires_at = expires_at;

                if changed
                {
                    changes.events.push(Event::new(EventKind::Updated, entry.record.clone()));
                }
            },
            None =>
            {
                changes.events.push(Event::new(EventKind::Added, record.clone()));
                instances.insert(key, CachedService { record, expires_at });
            }
        }
    }

    /// Drops every entry whose expiry has passed.
    fn expire(&self)
    {
        let _delivery = self.delivery();
        let now = self.clock.now();
        let mut changes = Changes::default();

        {
            let mut state = self.write();

            for instances in state.services.values_mut()
            {
                instances.retain(|_, entry|
                {
                    if entry.expires_at > now
                    {
                        return true;
                    }

                    let mut expired = entry.record.clone();
                    expired.ttl = Duration::ZERO;
                    changes.events.push(Event::new(EventKind::Expired, expired));
                    false
                });
            }

            state.services.retain(|_, instances| !instances.is_empty());
            state.names.retain(|_, expires_at| *expires_at > now);
        }

        if !changes.events.is_empty()
        {
            debug!("Expired {} cached services", changes.events.len());
        }

        self.deliver(changes);
    }

    /// Runs one background lookup for the oldest queued service type.
    fn lookup_next(&self)
    {
        let service = match self.write().name_queue.pop_front()
        {
            Some(service) => service,
            None => return
        };

        let ctx = self.shutdown.child(Some(LOOKUP_DEADLINE));
        match self.discovery.lookup(&service, &ctx)
        {
            Ok(records) => debug!("Background lookup of {} saw {} instances", service, records.len()),
            Err(err) => warn!("Background lookup of {} failed: {}", service, err)
        }
    }

    /// Unexpired instances of `service` from the cache, or an active lookup
    /// when the cache has none.
    pub fn lookup(&self, service: &str, ctx: &Context) -> Result<Vec<ServiceRecord>>
    {
        if self.shutdown.is_cancelled()
        {
            return Err(MdnsError::OutOfOrder(String::from("lookup: cache closed")));
        }

        if !validate_service_type(service)
        {
            return Err(MdnsError::BadParameter(format!("lookup: service type {}", service)));
        }

        let now = self.clock.now();
        let mut cached: Vec<ServiceRecord> = {
            let state = self.state.read()?;
            match state.services.get(service)
            {
                Some(instances) => instances.values().filter(|entry| now <= entry.expires_at).map(|entry| entry.remaining(now)).collect(),
                None => Vec::new()
            }
        };

        if cached.is_empty()
        {
            return self.discovery.lookup(service, ctx);
        }

        cached.sort_by_key(|record| record.key());
        Ok(cached)
    }

    /// Unexpired service types from the cache, or an active enumeration when
    /// the cache has none.
    pub fn enumerate(&self, ctx: &Context) -> Result<Vec<String>>
    {
        if self.shutdown.is_cancelled()
        {
            return Err(MdnsError::OutOfOrder(String::from("enumerate: cache closed")));
        }

        let now = self.clock.now();
        let mut names: Vec<String> = self.state.read()?
            .names
            .iter()
            .filter(|(_, expires_at)| now <= **expires_at)
            .map(|(service, _)| service.clone())
            .collect();

        if names.is_empty()
        {
            return self.discovery.enumerate(ctx);
        }

        names.sort();
        Ok(names)
    }

    /// Stops the background loops and detaches from the transport.
    pub fn close(&self) -> Result<()>
    {
        self.shutdown.cancel();

        let threads: Vec<thread::JoinHandle<()>> = std::mem::take(&mut *self.threads.lock()?);
        for handle in threads
        {
            if handle.join().is_err()
            {
                warn!("Cache thread panicked");
            }
        }

        if let Some(token) = self.token.lock()?.take()
        {
            self.transport.publisher().unsubscribe(token)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::dns::Record;
    use crate::transport::memory::{ MemoryTransport, Wire };
    use crate::dns::RecordType;
    use std::net::{ IpAddr, Ipv4Addr };
    use std::sync::mpsc;

    struct Fixture
    {
        wire: Arc<Wire>,
        transport: Arc<MemoryTransport>,
        clock: Arc<ManualClock>,
        events: mpsc::Receiver<Event>,
        db: Arc<ServiceDb>
    }

    fn fixture() -> Fixture
    {
        let wire = Wire::new();
        let transport = wire.endpoint("local.");
        let clock = Arc::new(ManualClock::new());
        let (sender, events) = mpsc::channel();

        let discovery = Arc::new(Discovery::new(transport.clone()));
        let db = ServiceDb::new(transport.clone(), discovery, Arc::new(sender), clock.clone()).unwrap();

        Fixture { wire, transport, clock, events, db }
    }

    fn announcement(ttl: u32, port: u16) -> Message
    {
        let mut message = Message::new_response();
        message.answers.push(Record::ptr("_gopi._tcp.local.", ttl, "First._gopi._tcp.local."));
        message.additionals.push(Record::srv("First._gopi._tcp.local.", ttl, port, "test1.local."));
        message.additionals.push(Record::txt("First._gopi._tcp.local.", ttl, &[String::from("name=test1")]));
        message.additionals.push(Record::address("test1.local.", ttl, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))));
        message
    }

    fn kinds(events: &mpsc::Receiver<Event>) -> Vec<EventKind>
    {
        events.try_iter().map(|event| event.kind).collect()
    }

    #[test]
    fn test_added_then_updated()
    {
        let f = fixture();

        f.transport.send_all(&announcement(120, 8080)).unwrap();
        assert_eq!(kinds(&f.events), vec![EventKind::Name, EventKind::Added]);

        // Same content refreshes silently.
        f.transport.send_all(&announcement(120, 8080)).unwrap();
        assert!(kinds(&f.events).is_empty());

        f.transport.send_all(&announcement(120, 9090)).unwrap();
        let events: Vec<Event> = f.events.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Updated);
        assert_eq!(events[0].record.port, 9090);
    }

    #[test]
    fn test_goodbye_removes()
    {
        let f = fixture();

        f.transport.send_all(&announcement(120, 8080)).unwrap();
        f.events.try_iter().count();

        let mut goodbye = Message::new_response();
        goodbye.answers.push(Record::ptr("_gopi._tcp.local.", 0, "First._gopi._tcp.local."));
        f.transport.send_all(&goodbye).unwrap();

        let events: Vec<Event> = f.events.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Removed);
        assert_eq!(events[0].ttl, Duration::ZERO);
        assert_eq!(events[0].record.host, "test1.local.");

        // Goodbye for something never seen is silent.
        f.transport.send_all(&goodbye).unwrap();
        assert!(kinds(&f.events).is_empty());
    }

    #[test]
    fn test_expiry()
    {
        let f = fixture();

        f.transport.send_all(&announcement(1, 8080)).unwrap();
        f.events.try_iter().count();

        let ctx = Context::with_timeout(Duration::from_millis(50));
        assert_eq!(f.db.lookup("_gopi._tcp", &ctx).unwrap().len(), 1);

        f.clock.advance(Duration::from_millis(500));
        f.db.expire();
        assert!(kinds(&f.events).is_empty());

        f.clock.advance(Duration::from_secs(1));
        f.db.expire();

        let events: Vec<Event> = f.events.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Expired);
        assert_eq!(events[0].record.name, "First");

        // Nothing cached and nobody answering: the active lookup comes back empty.
        assert!(f.db.lookup("_gopi._tcp", &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_reports_remaining_ttl()
    {
        let f = fixture();

        f.transport.send_all(&announcement(120, 8080)).unwrap();
        f.clock.advance(Duration::from_secs(20));

        let records = f.db.lookup("_gopi._tcp", &Context::with_timeout(Duration::from_millis(50))).unwrap();
        assert_eq!(records[0].ttl, Duration::from_secs(100));
        assert_eq!(records[0].addrs, vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))]);
    }

    #[test]
    fn test_enumerate_from_cache()
    {
        let f = fixture();

        let mut message = Message::new_response();
        message.answers.push(Record::ptr("_services._dns-sd._udp.local.", 120, "_gopi._tcp.local."));
        message.answers.push(Record::ptr("_services._dns-sd._udp.local.", 120, "_http._tcp.local."));
        f.transport.send_all(&message).unwrap();

        let names = f.db.enumerate(&Context::with_timeout(Duration::from_millis(50))).unwrap();
        assert_eq!(names, vec!["_gopi._tcp", "_http._tcp"]);
        assert_eq!(kinds(&f.events), vec![EventKind::Name, EventKind::Name]);
        assert_eq!(f.db.state.read().unwrap().name_queue.len(), 2);
    }

    #[test]
    fn test_lookup_next_queries_queued_types()
    {
        let f = fixture();

        let mut message = Message::new_response();
        message.answers.push(Record::ptr("_services._dns-sd._udp.local.", 120, "_gopi._tcp.local."));
        message.answers.push(Record::ptr("_services._dns-sd._udp.local.", 120, "_http._tcp.local."));
        f.transport.send_all(&message).unwrap();

        let queried = |name: &str| f.wire.sent().iter().any(|(_, sent)|
        {
            !sent.is_response() && sent.questions.iter().any(|question| question.name == name && question.qtype == RecordType::PTR)
        });

        f.db.lookup_next();
        assert!(queried("_gopi._tcp.local."));
        assert!(!queried("_http._tcp.local."));
        assert_eq!(f.db.state.read().unwrap().name_queue, vec!["_http._tcp"]);

        f.db.lookup_next();
        assert!(queried("_http._tcp.local."));
        assert!(f.db.state.read().unwrap().name_queue.is_empty());

        // Nothing queued: no traffic.
        let before = f.wire.sent().len();
        f.db.lookup_next();
        assert_eq!(f.wire.sent().len(), before);
    }

    /// Records event kinds and parks inside the first `Added` until released.
    struct GatedSink
    {
        seen: Mutex<Vec<EventKind>>,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>
    }

    impl EventSink for GatedSink
    {
        fn emit(&self, event: Event)
        {
            if event.kind == EventKind::Added
            {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }

            self.seen.lock().unwrap().push(event.kind);
        }
    }

    #[test]
    fn test_events_delivered_in_order_across_threads()
    {
        let wire = Wire::new();
        let transport = wire.endpoint("local.");
        let (entered, on_entered) = mpsc::channel();
        let (release, on_release) = mpsc::channel();
        let sink = Arc::new(GatedSink
        {
            seen: Mutex::new(Vec::new()),
            entered: Mutex::new(entered),
            release: Mutex::new(on_release)
        });

        let discovery = Arc::new(Discovery::new(transport.clone()));
        let db = ServiceDb::new(transport, discovery, sink.clone(), Arc::new(ManualClock::new())).unwrap();

        let announcer = db.clone();
        let announce = thread::spawn(move || announcer.ingest(&announcement(120, 8080)));
        on_entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let mut goodbye = Message::new_response();
        goodbye.answers.push(Record::ptr("_gopi._tcp.local.", 0, "First._gopi._tcp.local."));
        let retracter = db.clone();
        let retract = thread::spawn(move || retracter.ingest(&goodbye));

        thread::sleep(Duration::from_millis(100));
        release.send(()).unwrap();

        announce.join().unwrap();
        retract.join().unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), vec![EventKind::Name, EventKind::Added, EventKind::Removed]);
    }

    #[test]
    fn test_records_and_names_queues()
    {
        let f = fixture();
        let (_, names) = f.transport.publisher().subscribe_channel(Queue::Names, 8).unwrap();
        let (_, records) = f.transport.publisher().subscribe_channel(Queue::Records, 8).unwrap();

        f.transport.send_all(&announcement(120, 8080)).unwrap();

        assert_eq!(names.try_iter().count(), 1);
        assert_eq!(records.try_iter().count(), 1);
    }

    #[test]
    fn test_lookup_bad_service_type()
    {
        let f = fixture();

        assert!(f.db.lookup("_bad.tcp", &Context::background()).unwrap_err().is_bad_parameter());
    }

    #[test]
    fn test_close()
    {
        let f = fixture();
        f.db.start().unwrap();

        f.db.close().unwrap();
        f.db.close().unwrap();

        assert_eq!(f.transport.publisher().subscriber_count(Queue::Messages), 0);
        assert!(f.db.enumerate(&Context::background()).is_err());
    }
}
