use std::collections::{ BTreeSet, HashMap };
use std::net::IpAddr;
use std::sync::{ Arc, Condvar, Mutex, RwLock, Weak };
use std::time::Duration;

use log::{ debug, info, warn };

use crate::context::Context;
use crate::dns::{ Message, Question, Record, RecordType };
use crate::mdns_error::{ MdnsError, Result };
use crate::publisher::{ Payload, Queue, Token };
use crate::service::{ qualify_host, strip_zone, validate_service_type, ServiceRecord, DEFAULT_TTL, SERVICES_QUERY };
use crate::transport::Transport;

/// Publishes local service records and answers queries for them.
pub struct Registrar
{
    transport: Arc<dyn Transport>,
    zone: String,
    records: RwLock<HashMap<String, ServiceRecord>>,
    shutdown: Context,
    active: Mutex<usize>,
    idle: Condvar,
    token: Mutex<Option<Token>>
}

/// Counts a running registration for as long as it lives.
struct Active<'a>(&'a Registrar);

impl<'a> Active<'a>
{
    /// Fails once the registrar is closing. The check and the increment
    /// happen under the same lock `close` waits on.
    fn enter(registrar: &'a Registrar) -> Result<Active<'a>>
    {
        let mut active = registrar.active.lock()?;
        if registrar.shutdown.is_cancelled()
        {
            return Err(MdnsError::OutOfOrder(String::from("register: registrar closed")));
        }

        *active += 1;
        Ok(Active(registrar))
    }
}

impl Drop for Active<'_>
{
    fn drop(&mut self)
    {
        let mut active = match self.0.active.lock()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        };

        *active -= 1;
        if *active == 0
        {
            self.0.idle.notify_all();
        }
    }
}

fn ttl_secs(ttl: Duration) -> u32
{
    ttl.as_secs().min(u32::MAX as u64) as u32
}

/// SRV, TXT and address records describing one instance.
fn instance_records(record: &ServiceRecord, ttl: u32) -> Vec<Record>
{
    let instance = record.instance_name();
    let mut records = vec![
        Record::srv(&instance, ttl, record.port, &record.host),
        Record::txt(&instance, ttl, &record.txt)
    ];

    records.extend(record.addrs.iter().map(|addr| Record::address(&record.host, ttl, *addr)));
    records
}

impl Registrar
{
    /// Creates the registrar and starts answering queries that arrive on the
    /// transport.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Arc<Registrar>>
    {
        let registrar = Arc::new(Registrar
        {
            zone: transport.zone().to_string(),
            transport,
            records: RwLock::new(HashMap::new()),
            shutdown: Context::background(),
            active: Mutex::new(0),
            idle: Condvar::new(),
            token: Mutex::new(None)
        });

        let weak: Weak<Registrar> = Arc::downgrade(&registrar);
        let token = registrar.transport.publisher().subscribe(Queue::Messages, move |payload|
        {
            if let (Some(registrar), Payload::Message(message, _)) = (weak.upgrade(), payload)
            {
                registrar.handle_message(message);
            }
        })?;

        *registrar.token.lock()? = Some(token);

        Ok(registrar)
    }

    /// Publishes `record` and blocks until `lifetime` elapses (zero means no
    /// limit), `ctx` is done or the registrar closes. The goodbye is sent
    /// before this returns.
    pub fn register(&self, record: ServiceRecord, lifetime: Duration, ctx: &Context) -> Result<()>
    {
        let _active = Active::enter(self)?;

        if !validate_service_type(&record.service)
        {
            return Err(MdnsError::BadParameter(format!("register: service type {}", record.service)));
        }

        if record.name.is_empty()
        {
            return Err(MdnsError::BadParameter(String::from("register: empty instance name")));
        }

        if record.host.trim_end_matches('.').is_empty()
        {
            return Err(MdnsError::BadParameter(format!("register: {} has no host", record.name)));
        }

        let mut record = record;
        record.zone = self.zone.clone();
        record.host = qualify_host(&record.host, &self.zone);
        record.ttl = DEFAULT_TTL;

        let key = record.key();
        {
            let mut records = self.records.write()?;
            if records.contains_key(&key)
            {
                return Err(MdnsError::DuplicateItem(format!("register: {}", record.instance_name())));
            }

            records.insert(key.clone(), record.clone());
        }

        let scope = ctx.child(if lifetime.is_zero() { None } else { Some(lifetime) });
        self.shutdown.link(&scope);

        if scope.is_done()
        {
            self.records.write()?.remove(&key);
            debug!("{} ended before it was announced", record.instance_name());
            return Ok(());
        }

        info!("Registered {}", record);

        if let Err(err) = self.announce(&record)
        {
            warn!("Announcing {} failed: {}", record.instance_name(), err);
        }

        scope.wait_done();

        let result = self.retract(&record);
        self.records.write()?.remove(&key);

        info!("Unregistered {}", record.instance_name());

        result
    }

    fn announce(&self, record: &ServiceRecord) -> Result<()>
    {
        let ttl = ttl_secs(DEFAULT_TTL);

        let mut enumeration = Message::new_response();
        enumeration.answers.push(Record::ptr(&format!("{}.{}", SERVICES_QUERY, self.zone), ttl, &record.service_name()));

        let mut response = Message::new_response();
        response.answers.push(Record::ptr(&record.service_name(), ttl, &record.instance_name()));
        response.additionals.extend(instance_records(record, ttl));

        let enumerated = self.transport.send_all(&enumeration);
        let announced = self.transport.send_all(&response);

        enumerated.and(announced)
    }

    fn retract(&self, record: &ServiceRecord) -> Result<()>
    {
        let mut goodbye = Message::new_response();
        goodbye.answers.push(Record::ptr(&record.service_name(), 0, &record.instance_name()));

        self.transport.send_all(&goodbye)
    }

    /// Published records, sorted by key.
    pub fn records(&self) -> Result<Vec<ServiceRecord>>
    {
        let mut records: Vec<ServiceRecord> = self.records.read()?.values().cloned().collect();
        records.sort_by_key(|record| record.key());

        Ok(records)
    }

    fn handle_message(&self, message: &Message)
    {
        if message.is_response()
        {
            return;
        }

        for question in message.questions.iter()
        {
            if question.unicast_response()
            {
                debug!("Not answering unicast question for {}", question.name);
                continue;
            }

            let (answers, additionals) = match self.answer(question)
            {
                Ok(records) => records,
                Err(err) =>
                {
                    warn!("Answering {} failed: {}", question.name, err);
                    continue;
                }
            };

            if answers.is_empty()
            {
                continue;
            }

            let mut response = Message::new_response();
            response.answers = answers;
            response.additionals = additionals;

            debug!("Answering {} {} with {} records", question.qtype, question.name, response.answers.len() + response.additionals.len());

            if let Err(err) = self.transport.send_all(&response)
            {
                warn!("Response for {} failed: {}", question.name, err);
            }
        }
    }

    /// Records answering `question`, split into answers and additionals. The
    /// lock is released before anything is sent.
    fn answer(&self, question: &Question) -> Result<(Vec<Record>, Vec<Record>)>
    {
        let mut answers: Vec<Record> = Vec::new();
        let mut additionals: Vec<Record> = Vec::new();

        let name = match strip_zone(&question.name, &self.zone)
        {
            Some(name) => name,
            None => return Ok((answers, additionals))
        };

        let qtype = question.qtype;
        let wants = |rtype: RecordType| qtype == rtype || qtype == RecordType::ANY;
        let ttl = ttl_secs(DEFAULT_TTL);
        let records = self.records.read()?;

        if name.eq_ignore_ascii_case(SERVICES_QUERY)
        {
            if wants(RecordType::PTR)
            {
                let services: BTreeSet<String> = records.values().map(|record| record.service_name()).collect();
                answers.extend(services.iter().map(|service| Record::ptr(&question.name, ttl, service)));
            }
        }
        else if records.values().any(|record| record.service.eq_ignore_ascii_case(name))
        {
            if wants(RecordType::PTR)
            {
                for record in records.values().filter(|record| record.service.eq_ignore_ascii_case(name))
                {
                    answers.push(Record::ptr(&record.service_name(), ttl, &record.instance_name()));
                    additionals.extend(instance_records(record, ttl));
                }
            }
        }
        else if let Some(record) = records.values().find(|record| record.key().eq_ignore_ascii_case(name))
        {
            answers.extend(instance_records(record, ttl));
        }
        else
        {
            for record in records.values().filter(|record| strip_zone(&record.host, &self.zone).map_or(false, |host| host.eq_ignore_ascii_case(name)))
            {
                for addr in record.addrs.iter()
                {
                    let matches = match addr
                    {
                        IpAddr::V4(_) => wants(RecordType::A),
                        IpAddr::V6(_) => wants(RecordType::AAAA)
                    };

                    let address = Record::address(&record.host, ttl, *addr);
                    if matches && !answers.contains(&address)
                    {
                        answers.push(address);
                    }
                }
            }
        }

        Ok((answers, additionals))
    }

    /// Ends every registration, waits for their goodbyes and stops answering.
    pub fn close(&self) -> Result<()>
    {
        self.shutdown.cancel();

        let mut active = self.active.lock()?;
        while *active > 0
        {
            active = self.idle.wait(active)?;
        }
        drop(active);

        if let Some(token) = self.token.lock()?.take()
        {
            self.transport.publisher().unsubscribe(token)?;
        }

        Ok(())
    }
}
