use std::collections::HashSet;
use std::fmt::Display;
use std::net::IpAddr;
use std::time::Duration;

use crate::mdns_error::{ MdnsError, Result };

/// Query name used to enumerate the service types on the link.
pub const SERVICES_QUERY: &str = "_services._dns-sd._udp";

/// TTL announced for published records.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// A service instance, published by this host or learned from the link.
#[derive(Clone, Debug, Default)]
pub struct ServiceRecord
{
    pub name: String,
    pub service: String,
    pub zone: String,
    pub host: String,
    pub port: u16,
    pub txt: Vec<String>,
    pub addrs: Vec<IpAddr>,
    pub ttl: Duration
}

impl ServiceRecord
{
    pub fn new(name: &str, service: &str, port: u16) -> ServiceRecord
    {
        ServiceRecord
        {
            name: name.to_string(),
            service: service.to_string(),
            port,
            ttl: DEFAULT_TTL,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: &str) -> ServiceRecord
    {
        self.host = host.to_string();
        self
    }

    pub fn with_txt(mut self, txt: &[&str]) -> ServiceRecord
    {
        self.txt = txt.iter().map(|entry| entry.to_string()).collect();
        self
    }

    pub fn with_addrs(mut self, addrs: &[IpAddr]) -> ServiceRecord
    {
        self.addrs = addrs.to_vec();
        self
    }

    /// Instance key: the quoted instance name followed by the service type.
    pub fn key(&self) -> String
    {
        instance_key(&self.name, &self.service)
    }

    /// Fully qualified instance name, the target of the service PTR record.
    pub fn instance_name(&self) -> String
    {
        format!("{}.{}", self.key(), self.zone)
    }

    /// Fully qualified service type name, the owner of the service PTR record.
    pub fn service_name(&self) -> String
    {
        format!("{}.{}", self.service, self.zone)
    }

    pub fn is_goodbye(&self) -> bool
    {
        self.ttl.is_zero()
    }
}

/// Records are equal when name, type, host, port and txt (in order) match and
/// the address sets are the same regardless of order. TTL and zone are ignored.
impl PartialEq for ServiceRecord
{
    fn eq(&self, other: &ServiceRecord) -> bool
    {
        if self.name != other.name || self.service != other.service || self.host != other.host || self.port != other.port
        {
            return false;
        }

        if self.txt != other.txt
        {
            return false;
        }

        let ours: HashSet<&IpAddr> = self.addrs.iter().collect();
        let theirs: HashSet<&IpAddr> = other.addrs.iter().collect();

        ours == theirs
    }
}

impl Eq for ServiceRecord
{
}

impl Display for ServiceRecord
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        write!(f, "{} -> {}:{} txt={:?} addrs={:?} ttl={}s", self.instance_name(), self.host, self.port, self.txt, self.addrs, self.ttl.as_secs())
    }
}

pub fn instance_key(name: &str, service: &str) -> String
{
    format!("{}.{}", quote(name), service)
}

/// Checks a service type against `_name._tcp` / `_name._udp`.
pub fn validate_service_type(service: &str) -> bool
{
    let (name, protocol) = match service.rsplit_once('.')
    {
        Some(parts) => parts,
        None => return false
    };

    if protocol != "_tcp" && protocol != "_udp"
    {
        return false;
    }

    let mut chars = name.chars();
    if chars.next() != Some('_')
    {
        return false;
    }

    match chars.next()
    {
        Some(first) if first.is_ascii_alphabetic() => (),
        _ => return false
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Escapes backslashes and dots so that `name` can be carried as a single label.
pub fn quote(name: &str) -> String
{
    let mut quoted = String::with_capacity(name.len());

    for c in name.chars()
    {
        if c == '\\' || c == '.'
        {
            quoted.push('\\');
        }

        quoted.push(c);
    }

    quoted
}

pub fn unquote(quoted: &str) -> String
{
    let mut name = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();

    while let Some(c) = chars.next()
    {
        if c == '\\'
        {
            match chars.next()
            {
                Some(escaped) => name.push(escaped),
                None => name.push(c)
            }
        }
        else
        {
            name.push(c);
        }
    }

    name
}

/// Splits a presentation-form name on unescaped dots into raw labels. The root
/// name (`.` or empty) has no labels.
pub fn split_name(name: &str) -> Result<Vec<String>>
{
    let mut labels: Vec<String> = Vec::new();
    let mut label = String::new();
    let mut chars = name.chars().peekable();

    if name == "." || name.is_empty()
    {
        return Ok(labels);
    }

    while let Some(c) = chars.next()
    {
        match c
        {
            '\\' =>
            {
                match chars.next()
                {
                    Some(escaped) => label.push(escaped),
                    None => return Err(MdnsError::LabelInvalid)
                }
            },
            '.' =>
            {
                if label.is_empty()
                {
                    return Err(MdnsError::LabelInvalid);
                }

                labels.push(std::mem::take(&mut label));
            },
            _ => label.push(c)
        }
    }

    if !label.is_empty()
    {
        labels.push(label);
    }

    Ok(labels)
}

/// Returns `name` without the trailing `.zone`, or `None` when the name lies
/// outside the zone. Comparison is ASCII case-insensitive.
pub fn strip_zone<'a>(name: &'a str, zone: &str) -> Option<&'a str>
{
    let zone = zone.trim_end_matches('.');
    let name = name.strip_suffix('.').unwrap_or(name);

    if name.len() <= zone.len() + 1
    {
        return None;
    }

    let split = name.len() - zone.len();
    if !name.is_char_boundary(split - 1) || !name.is_char_boundary(split)
    {
        return None;
    }

    let (head, tail) = name.split_at(split);
    if !tail.eq_ignore_ascii_case(zone) || !head.ends_with('.')
    {
        return None;
    }

    Some(&head[..head.len() - 1])
}

/// Appends the zone to `host` unless it is already there; always ends in a dot.
pub fn qualify_host(host: &str, zone: &str) -> String
{
    let trimmed = host.trim_end_matches('.');

    if strip_zone(trimmed, zone).is_some()
    {
        format!("{}.", trimmed)
    }
    else
    {
        format!("{}.{}", trimmed, zone)
    }
}
