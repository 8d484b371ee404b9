use crate::dns::Message;
use crate::mdns_error::Result;
use crate::publisher::Publisher;

/// What the registrar, discovery and cache need from the listener: the zone,
/// a way to multicast a message and the queues inbound traffic arrives on.
pub trait Transport: Send + Sync
{
    fn zone(&self) -> &str;

    /// Serialises `message` once and writes it to every joined destination.
    fn send_all(&self, message: &Message) -> Result<()>;

    fn publisher(&self) -> &Publisher;

    fn close(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod memory
{
    use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
    use std::sync::atomic::{ AtomicBool, Ordering };
    use std::sync::{ Arc, Mutex, Weak };

    use super::Transport;
    use crate::dns::Message;
    use crate::listener::dispatch;
    use crate::mdns_error::{ MdnsError, Result };
    use crate::publisher::Publisher;

    /// A shared multicast segment. Every datagram sent by one endpoint is
    /// encoded, logged and delivered to all endpoints including the sender.
    pub struct Wire
    {
        endpoints: Mutex<Vec<Weak<MemoryTransport>>>,
        sent: Mutex<Vec<(SocketAddr, Message)>>
    }

    impl Wire
    {
        pub fn new() -> Arc<Wire>
        {
            Arc::new(Wire
            {
                endpoints: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new())
            })
        }

        pub fn endpoint(self: &Arc<Self>, zone: &str) -> Arc<MemoryTransport>
        {
            let mut endpoints = self.endpoints.lock().unwrap();
            let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, endpoints.len() as u8 + 1)), 5353);

            let endpoint = Arc::new(MemoryTransport
            {
                wire: self.clone(),
                zone: zone.to_string(),
                address,
                publisher: Publisher::new(),
                closed: AtomicBool::new(false)
            });

            endpoints.push(Arc::downgrade(&endpoint));
            endpoint
        }

        /// Every message written to the wire so far, with its sender.
        pub fn sent(&self) -> Vec<(SocketAddr, Message)>
        {
            self.sent.lock().unwrap().clone()
        }

        /// Delivers raw bytes as if they arrived from `from`.
        pub fn inject(&self, buffer: &[u8], from: SocketAddr)
        {
            let endpoints: Vec<Arc<MemoryTransport>> = self.endpoints.lock().unwrap().iter().filter_map(|endpoint| endpoint.upgrade()).collect();

            for endpoint in endpoints
            {
                if !endpoint.closed.load(Ordering::SeqCst)
                {
                    dispatch(&endpoint.publisher, buffer, from);
                }
            }
        }
    }

    pub struct MemoryTransport
    {
        wire: Arc<Wire>,
        zone: String,
        address: SocketAddr,
        publisher: Publisher,
        closed: AtomicBool
    }

    impl MemoryTransport
    {
        pub fn address(&self) -> SocketAddr
        {
            self.address
        }
    }

    impl Transport for MemoryTransport
    {
        fn zone(&self) -> &str
        {
            &self.zone
        }

        fn send_all(&self, message: &Message) -> Result<()>
        {
            if self.closed.load(Ordering::SeqCst)
            {
                return Err(MdnsError::OutOfOrder(String::from("send_all: transport closed")));
            }

            let buffer = message.to_bytes()?;
            self.wire.sent.lock().unwrap().push((self.address, Message::from(&buffer)?));
            self.wire.inject(&buffer, self.address);

            Ok(())
        }

        fn publisher(&self) -> &Publisher
        {
            &self.publisher
        }

        fn close(&self) -> Result<()>
        {
            if !self.closed.swap(true, Ordering::SeqCst)
            {
                self.publisher.close();
            }

            Ok(())
        }
    }
}
