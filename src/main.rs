use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ ArgAction, Parser, Subcommand };
use log::error;

use mdnscore::{ Config, Context, LogSink, Mdns, Result, ServiceRecord };

#[derive(Parser)]
#[command(name = "mdns-tool", version, about = "Browse and publish mDNS services")]
struct Cli
{
    /// Zone to browse and publish in.
    #[arg(long = "mdns.domain", default_value = "local.")]
    domain: String,

    /// Restrict to one interface (all multicast interfaces when empty).
    #[arg(long = "mdns.iface", default_value = "")]
    iface: String,

    #[arg(long = "mdns.ip4", action = ArgAction::Set, default_value_t = true)]
    ip4: bool,

    #[arg(long = "mdns.ip6", action = ArgAction::Set, default_value_t = true)]
    ip6: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command
}

#[derive(Subcommand)]
enum Command
{
    /// List the service types on the link.
    Enumerate
    {
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64
    },
    /// List the instances of one service type.
    Lookup
    {
        service: String,

        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64
    },
    /// Publish a service until interrupted or the lifetime passes.
    Register
    {
        name: String,
        service: String,
        port: u16,

        #[arg(long)]
        host: String,

        #[arg(long)]
        txt: Vec<String>,

        #[arg(long)]
        addr: Vec<IpAddr>,

        /// Seconds to stay published; zero means until interrupted.
        #[arg(long, default_value_t = 0)]
        lifetime: u64
    },
    /// Log cache events until interrupted or the duration passes.
    Watch
    {
        /// Seconds to watch; zero means until interrupted.
        #[arg(long, default_value_t = 0)]
        duration: u64
    }
}

/// A context cancelled by ctrl-c.
fn interruptible() -> Result<Context>
{
    let ctx = Context::background();
    let cancel = ctx.clone();

    if let Err(err) = ctrlc::set_handler(move || cancel.cancel())
    {
        return Err(mdnscore::MdnsError::Internal(format!("ctrl-c handler: {}", err)));
    }

    Ok(ctx)
}

fn run(cli: Cli) -> Result<()>
{
    let config = Config::new()
        .with_domain(&cli.domain)
        .with_interface(&cli.iface)
        .with_ipv4(cli.ip4)
        .with_ipv6(cli.ip6);

    let mdns = Mdns::new(&config, Arc::new(LogSink))?;

    match cli.command
    {
        Command::Enumerate { timeout_ms } =>
        {
            for service in mdns.enumerate(&Context::with_timeout(Duration::from_millis(timeout_ms)))?
            {
                println!("{}", service);
            }
        },
        Command::Lookup { service, timeout_ms } =>
        {
            for record in mdns.lookup(&service, &Context::with_timeout(Duration::from_millis(timeout_ms)))?
            {
                println!("{}", record);
            }
        },
        Command::Register { name, service, port, host, txt, addr, lifetime } =>
        {
            let txt: Vec<&str> = txt.iter().map(String::as_str).collect();
            let record = ServiceRecord::new(&name, &service, port)
                .with_host(&host)
                .with_txt(&txt)
                .with_addrs(&addr);

            mdns.register(record, Duration::from_secs(lifetime), &interruptible()?)?;
        },
        Command::Watch { duration } =>
        {
            let ctx = interruptible()?;
            if duration == 0
            {
                ctx.wait_done();
            }
            else
            {
                ctx.wait(Duration::from_secs(duration));
            }
        }
    }

    mdns.close()
}

fn main() -> ExitCode
{
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str())).init();

    match run(cli)
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) =>
        {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
