//! Configuration handed in by the enclosing tool.
//!
//! The four settings map onto the `mdns.domain`, `mdns.iface`, `mdns.ip4` and
//! `mdns.ip6` flags:
//!
//! ```rust
//! use mdnscore::Config;
//!
//! let config = Config::default()
//!     .with_domain("local")
//!     .with_interface("eth0")
//!     .with_ipv6(false);
//!
//! assert_eq!(config.zone(), "local.");
//! ```

use crate::mdns_error::{ MdnsError, Result };

pub const DEFAULT_DOMAIN: &str = "local.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config
{
    /// Zone all names live in. A trailing dot is added when missing.
    pub domain: String,

    /// Restrict to one interface by name. `None` selects every interface that
    /// is up and multicast capable.
    pub interface: Option<String>,

    pub ipv4: bool,
    pub ipv6: bool
}

impl Default for Config
{
    fn default() -> Self
    {
        Config
        {
            domain: String::from(DEFAULT_DOMAIN),
            interface: None,
            ipv4: true,
            ipv6: true
        }
    }
}

impl Config
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_domain(mut self, domain: &str) -> Self
    {
        self.domain = domain.to_string();
        self
    }

    /// An empty name clears the restriction.
    pub fn with_interface(mut self, interface: &str) -> Self
    {
        self.interface = if interface.is_empty()
        {
            None
        }
        else
        {
            Some(interface.to_string())
        };
        self
    }

    pub fn with_ipv4(mut self, enabled: bool) -> Self
    {
        self.ipv4 = enabled;
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self
    {
        self.ipv6 = enabled;
        self
    }

    /// The domain with exactly one trailing dot and no leading dot.
    pub fn zone(&self) -> String
    {
        let trimmed = self.domain.trim_matches('.');
        format!("{}.", trimmed)
    }

    pub fn validate(&self) -> Result<()>
    {
        if self.domain.trim_matches('.').is_empty()
        {
            return Err(MdnsError::BadParameter(String::from("config: empty mdns.domain")));
        }

        if !self.ipv4 && !self.ipv6
        {
            return Err(MdnsError::BadParameter(String::from("config: both mdns.ip4 and mdns.ip6 are disabled")));
        }

        Ok(())
    }
}
