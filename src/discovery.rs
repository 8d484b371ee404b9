use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::mpsc::{ Receiver, RecvTimeoutError };
use std::sync::Arc;
use std::time::{ Duration, Instant };

use log::{ debug, warn };
use rand::Rng;

use crate::context::Context;
use crate::dns::{ Message, RecordData, RecordType };
use crate::mdns_error::{ MdnsError, Result };
use crate::publisher::{ Payload, Queue };
use crate::service::{ strip_zone, unquote, validate_service_type, ServiceRecord, SERVICES_QUERY };
use crate::transport::Transport;

const QUERY_ATTEMPTS: usize = 2;
const QUERY_JITTER_MS: u64 = 500;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CHANNEL_CAPACITY: usize = 256;

/// Everything one response says about service instances and service types.
#[derive(Debug, Default)]
pub struct Answers
{
    /// Instances keyed by PTR target, in the order they first appeared. A
    /// zero TTL marks a goodbye.
    pub records: Vec<ServiceRecord>,

    /// Service types from enumeration answers with their TTL.
    pub names: Vec<(String, Duration)>
}

fn is_service_type(service: &str) -> bool
{
    service.ends_with("._tcp") || service.ends_with("._udp")
}

/// Splits `instance` into the quoted instance label before `.service`.
fn instance_label<'a>(instance: &'a str, service: &str) -> Option<&'a str>
{
    if instance.len() <= service.len() + 1
    {
        return None;
    }

    let split = instance.len() - service.len();
    if !instance.is_char_boundary(split - 1) || !instance.is_char_boundary(split)
    {
        return None;
    }

    let (head, tail) = instance.split_at(split);
    if !tail.eq_ignore_ascii_case(service)
    {
        return None;
    }

    head.strip_suffix('.').filter(|label| !label.is_empty())
}

/// Folds the answer, authority and additional sections of `message` into
/// service records. PTR records name the instances; SRV, TXT and address
/// records are attached to them by owner name.
pub fn fold_message(message: &Message, zone: &str) -> Answers
{
    let mut answers = Answers::default();
    let mut order: Vec<String> = Vec::new();
    let mut found: HashMap<String, ServiceRecord> = HashMap::new();

    for record in message.records()
    {
        let target = match &record.data
        {
            RecordData::PTR(target) => target,
            _ => continue
        };

        let service = match strip_zone(&record.name, zone)
        {
            Some(service) => service,
            None => continue
        };

        if service.eq_ignore_ascii_case(SERVICES_QUERY)
        {
            match strip_zone(target, zone)
            {
                Some(name) if is_service_type(name) => answers.names.push((name.to_string(), Duration::from_secs(record.ttl as u64))),
                _ => debug!("Discarding enumeration answer {}", target)
            }
            continue;
        }

        if !is_service_type(service)
        {
            debug!("Discarding {}: not a service type", record);
            continue;
        }

        let name = match strip_zone(target, zone).and_then(|instance| instance_label(instance, service))
        {
            Some(label) => unquote(label),
            None =>
            {
                debug!("Discarding {}: no instance name", record);
                continue;
            }
        };

        let key = target.to_ascii_lowercase();
        if !found.contains_key(&key)
        {
            order.push(key.clone());
        }

        let mut instance = ServiceRecord::new(&name, service, 0);
        instance.zone = zone.to_string();
        instance.ttl = Duration::from_secs(record.ttl as u64);

        // A later PTR for the same instance replaces the earlier one.
        found.insert(key, instance);
    }

    for record in message.records()
    {
        let instance = match found.get_mut(&record.name.to_ascii_lowercase())
        {
            Some(instance) => instance,
            None => continue
        };

        match &record.data
        {
            RecordData::SRV { port, target, .. } =>
            {
                instance.host = target.clone();
                instance.port = *port;
            },
            RecordData::TXT(txt) => instance.txt = txt.clone(),
            _ => ()
        }
    }

    for instance in found.values_mut()
    {
        if instance.host.is_empty()
        {
            continue;
        }

        for record in message.records().filter(|record| record.name.eq_ignore_ascii_case(&instance.host))
        {
            let addr = match &record.data
            {
                RecordData::A(v4) => IpAddr::V4(*v4),
                RecordData::AAAA(v6) => IpAddr::V6(*v6),
                _ => continue
            };

            if !instance.addrs.contains(&addr)
            {
                instance.addrs.push(addr);
            }
        }
    }

    answers.records = order.into_iter().filter_map(|key| found.remove(&key)).collect();
    answers
}

/// Active queries: multicasts a question and collects the answers that
/// arrive before the deadline.
pub struct Discovery
{
    transport: Arc<dyn Transport>
}

impl Discovery
{
    pub fn new(transport: Arc<dyn Transport>) -> Discovery
    {
        Discovery { transport }
    }

    /// Instances of `service` seen before the context is done, one per key.
    pub fn lookup(&self, service: &str, ctx: &Context) -> Result<Vec<ServiceRecord>>
    {
        if !validate_service_type(service)
        {
            return Err(MdnsError::BadParameter(format!("lookup: service type {}", service)));
        }

        let name = format!("{}.{}", service, self.transport.zone());
        let mut records: Vec<ServiceRecord> = Vec::new();

        self.collect(&name, ctx, |answers|
        {
            for record in answers.records.into_iter().filter(|record| record.service.eq_ignore_ascii_case(service))
            {
                let position = records.iter().position(|existing| existing.key().eq_ignore_ascii_case(&record.key()));

                match (position, record.is_goodbye())
                {
                    (Some(position), true) =>
                    {
                        records.remove(position);
                    },
                    (None, true) => (),
                    (Some(position), false) => records[position] = record,
                    (None, false) => records.push(record)
                }
            }
        })?;

        Ok(records)
    }

    /// Service types advertised on the link before the context is done.
    pub fn enumerate(&self, ctx: &Context) -> Result<Vec<String>>
    {
        let name = format!("{}.{}", SERVICES_QUERY, self.transport.zone());
        let mut names: Vec<String> = Vec::new();

        self.collect(&name, ctx, |answers|
        {
            for (service, ttl) in answers.names
            {
                let position = names.iter().position(|existing| existing.eq_ignore_ascii_case(&service));

                match (position, ttl.is_zero())
                {
                    (Some(position), true) =>
                    {
                        names.remove(position);
                    },
                    (None, false) => names.push(service),
                    _ => ()
                }
            }
        })?;

        Ok(names)
    }

    fn collect<F>(&self, name: &str, ctx: &Context, fold: F) -> Result<()>
    where
        F: FnMut(Answers)
    {
        let publisher = self.transport.publisher();

        // Subscribe before the first query goes out so no answer is missed.
        let (token, receiver) = publisher.subscribe_channel(Queue::Messages, CHANNEL_CAPACITY)?;
        let result = self.drain(name, ctx, &receiver, fold);

        if let Err(err) = publisher.unsubscribe(token)
        {
            debug!("{}", err);
        }

        result
    }

    fn drain<F>(&self, name: &str, ctx: &Context, receiver: &Receiver<Payload>, mut fold: F) -> Result<()>
    where
        F: FnMut(Answers)
    {
        let query = Message::new_query(name, RecordType::PTR);
        let zone = self.transport.zone();
        let mut attempts = 0;
        let mut next_query = Some(Instant::now());

        while !ctx.is_done()
        {
            if let Some(at) = next_query.filter(|at| Instant::now() >= *at)
            {
                attempts += 1;
                debug!("Query {} attempt {}", name, attempts);

                match self.transport.send_all(&query)
                {
                    Ok(()) => (),
                    Err(err @ MdnsError::OutOfOrder(_)) => return Err(err),
                    Err(err) => warn!("Query {} failed: {}", name, err)
                }

                next_query = if attempts < QUERY_ATTEMPTS
                {
                    Some(at.max(Instant::now()) + Duration::from_millis(rand::rng().random_range(0..=QUERY_JITTER_MS)))
                }
                else
                {
                    None
                };
            }

            let mut wait = POLL_INTERVAL;
            if let Some(remaining) = ctx.remaining()
            {
                wait = wait.min(remaining);
            }
            if let Some(at) = next_query
            {
                wait = wait.min(at.saturating_duration_since(Instant::now()));
            }

            match receiver.recv_timeout(wait)
            {
                Ok(Payload::Message(message, from)) =>
                {
                    if message.is_response()
                    {
                        debug!("Answer for {} from {}", name, from);
                        fold(fold_message(&message, zone));
                    }
                },
                Ok(_) | Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return Err(MdnsError::OutOfOrder(format!("query {}: transport closed", name)))
            }
        }

        Ok(())
    }
}
