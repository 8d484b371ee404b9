use std::io;
use std::net::{ Shutdown, SocketAddr };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use std::thread;

use log::{ debug, info, trace, warn };
use socket2::SockRef;

use crate::config::Config;
use crate::dns::Message;
use crate::hexdump::HexDump;
use crate::mdns_error::{ MdnsError, Result };
use crate::publisher::{ Payload, Publisher, Queue, Token };
use crate::socket::{ select_interfaces, Interface, IpType, MulticastSocket, READ_TIMEOUT };
use crate::transport::Transport;

/// Largest datagram a receive loop accepts.
pub const MAX_DATAGRAM: usize = 65536;

struct FamilySocket
{
    socket: MulticastSocket,
    send_lock: Mutex<()>
}

/// Owns the multicast sockets, runs one receive thread per address family
/// and publishes what arrives on the `Messages` and `Errors` queues.
pub struct Listener
{
    zone: String,
    sockets: Vec<Arc<FamilySocket>>,
    publisher: Arc<Publisher>,
    closed: Arc<AtomicBool>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>
}

impl Listener
{
    pub fn open(config: &Config) -> Result<Arc<Listener>>
    {
        config.validate()?;

        let interfaces = select_interfaces(config.interface.as_deref())?;
        let mut families: Vec<IpType> = Vec::new();
        if config.ipv4
        {
            families.push(IpType::V4);
        }
        if config.ipv6
        {
            families.push(IpType::V6);
        }

        let mut errors: Vec<MdnsError> = Vec::new();
        let sockets: Vec<Arc<FamilySocket>> = families
            .into_iter()
            .filter_map(|ip_type| MulticastSocket::join(ip_type, &interfaces, &mut errors))
            .map(|socket| Arc::new(FamilySocket { socket, send_lock: Mutex::new(()) }))
            .collect();

        for err in errors.iter()
        {
            warn!("{}", err);
        }

        if sockets.is_empty()
        {
            return Err(MdnsError::NoUsableInterface);
        }

        let listener = Arc::new(Listener
        {
            zone: config.zone(),
            sockets,
            publisher: Arc::new(Publisher::new()),
            closed: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new())
        });

        let mut threads = listener.threads.lock()?;
        for family in listener.sockets.iter()
        {
            let family = family.clone();
            let publisher = listener.publisher.clone();
            let closed = listener.closed.clone();

            let handle = thread::Builder::new()
                .name(format!("mdns-{}", family.socket.ip_type))
                .spawn(move || receive_loop(family, publisher, closed))
                .map_err(|err| MdnsError::io("open: spawn receiver", err))?;

            threads.push(handle);
        }
        drop(threads);

        for (ip_type, iface) in listener.interfaces()
        {
            info!("Listening for mDNS on {} {} in zone {}", iface.name, ip_type, listener.zone);
        }

        Ok(listener)
    }

    /// Every joined (family, interface) pair.
    pub fn interfaces(&self) -> Vec<(IpType, Interface)>
    {
        self.sockets
            .iter()
            .flat_map(|family| family.socket.interfaces.iter().map(move |iface| (family.socket.ip_type, iface.clone())))
            .collect()
    }

    pub fn subscribe<F>(&self, queue: Queue, handler: F) -> Result<Token>
    where
        F: Fn(&Payload) + Send + Sync + 'static
    {
        self.publisher.subscribe(queue, handler)
    }

    pub fn unsubscribe(&self, token: Token) -> Result<()>
    {
        self.publisher.unsubscribe(token)
    }
}

impl Transport for Listener
{
    fn zone(&self) -> &str
    {
        &self.zone
    }

    /// Writes to every joined destination and reports all failures together.
    fn send_all(&self, message: &Message) -> Result<()>
    {
        if self.closed.load(Ordering::SeqCst)
        {
            return Err(MdnsError::OutOfOrder(String::from("send_all: listener closed")));
        }

        let buffer = message.to_bytes()?;
        let mut errors: Vec<MdnsError> = Vec::new();

        for family in self.sockets.iter()
        {
            let _guard = family.send_lock.lock()?;

            for iface in family.socket.interfaces.iter()
            {
                if let Err(err) = family.socket.send_to_interface(&buffer, iface)
                {
                    errors.push(MdnsError::io(&format!("send_all: {} on {}", family.socket.ip_type, iface.name), err));
                }
            }
        }

        debug!("Sent {} bytes, {} failed destinations", buffer.len(), errors.len());

        MdnsError::compound(errors)
    }

    fn publisher(&self) -> &Publisher
    {
        &self.publisher
    }

    /// Stops the receive threads and closes the queues. Idempotent.
    fn close(&self) -> Result<()>
    {
        if self.closed.swap(true, Ordering::SeqCst)
        {
            return Ok(());
        }

        for family in self.sockets.iter()
        {
            // Wakes a blocked read on platforms that support it; the read
            // timeout covers the rest.
            let _ = SockRef::from(&family.socket.socket).shutdown(Shutdown::Both);
        }

        let threads: Vec<thread::JoinHandle<()>> = std::mem::take(&mut *self.threads.lock()?);
        for handle in threads
        {
            if handle.join().is_err()
            {
                warn!("Receive thread panicked");
            }
        }

        self.publisher.close();
        info!("Listener for zone {} closed", self.zone);

        Ok(())
    }
}

impl Drop for Listener
{
    fn drop(&mut self)
    {
        if let Err(err) = self.close()
        {
            warn!("{}", err);
        }
    }
}

fn receive_loop(family: Arc<FamilySocket>, publisher: Arc<Publisher>, closed: Arc<AtomicBool>)
{
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    let ip_type = family.socket.ip_type;

    while !closed.load(Ordering::SeqCst)
    {
        match family.socket.socket.recv_from(&mut buffer)
        {
            Ok((count, from)) =>
            {
                if closed.load(Ordering::SeqCst)
                {
                    break;
                }

                if count > 0
                {
                    dispatch(&publisher, &buffer[..count], from);
                }
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut => (),
            Err(err) =>
            {
                if closed.load(Ordering::SeqCst)
                {
                    break;
                }

                warn!("Failed to receive on {}: {}", ip_type, err);
                thread::sleep(READ_TIMEOUT);
            }
        }
    }

    debug!("Receive loop for {} stopped", ip_type);
}

fn validate(message: &Message) -> Result<()>
{
    if message.opcode() != 0
    {
        return Err(MdnsError::InvalidOpcode(message.opcode()));
    }

    if message.rcode() != 0
    {
        return Err(MdnsError::InvalidRcode(message.rcode()));
    }

    if message.is_truncated()
    {
        return Err(MdnsError::Truncated);
    }

    Ok(())
}

/// Decodes one datagram and publishes it, or the reason it was rejected.
pub(crate) fn dispatch(publisher: &Publisher, buffer: &[u8], from: SocketAddr)
{
    let result = Message::from(buffer).and_then(|message|
    {
        validate(&message)?;
        Ok(message)
    });

    match result
    {
        Ok(message) =>
        {
            trace!("Received {} bytes from {}", buffer.len(), from);
            publisher.emit(Queue::Messages, Payload::Message(Arc::new(message), from));
        },
        Err(err) =>
        {
            debug!("Rejected {} bytes from {}: {}", buffer.len(), from, err);
            trace!("\n{}", HexDump::new(buffer));
            publisher.emit(Queue::Errors, Payload::Error(Arc::new(err)));
        }
    }
}
