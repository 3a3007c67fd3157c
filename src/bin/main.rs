use clap::{Parser, Subcommand};
use log::info;
use netspeed::config::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
use netspeed::measurements::render_round;
use netspeed::{Client, Config, Server};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "netspeed")]
#[command(about = "TCP and UDP bulk-transfer speed test", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in server mode
    Server {
        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// TCP port to listen on
        #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
        tcp_port: u16,

        /// UDP port to listen on
        #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
        udp_port: u16,
    },

    /// Run in client mode
    Client {
        /// Server address to connect to
        #[arg(default_value = "127.0.0.1")]
        server: String,

        /// Server TCP port
        #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
        tcp_port: u16,

        /// Server UDP port
        #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
        udp_port: u16,

        /// Bytes requested by every transfer
        #[arg(short, long)]
        size: u64,

        /// Number of concurrent TCP transfers
        #[arg(long = "tcp", default_value_t = 1)]
        tcp_connections: usize,

        /// Number of concurrent UDP transfers
        #[arg(long = "udp", default_value_t = 1)]
        udp_connections: usize,

        /// Silence in milliseconds that ends a UDP transfer
        #[arg(long, default_value_t = 1000)]
        idle_timeout_ms: u64,

        /// Number of rounds to run (0 = until interrupted)
        #[arg(short, long, default_value_t = 0)]
        rounds: u64,

        /// Output results as JSON lines
        #[arg(short = 'J', long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            bind,
            tcp_port,
            udp_port,
        } => {
            let mut config = Config::server(tcp_port, udp_port);
            if let Some(bind_addr) = bind {
                config = config.with_bind_addr(bind_addr);
            }

            let server = Server::bind(config).await?;
            let cancel_token = server.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel_token.cancel();
                }
            });

            server.run().await?;
        }

        Commands::Client {
            server,
            tcp_port,
            udp_port,
            size,
            tcp_connections,
            udp_connections,
            idle_timeout_ms,
            rounds,
            json,
        } => {
            let config = Config::client(server, tcp_port, udp_port)
                .with_requested_size(size)
                .with_tcp_connections(tcp_connections)
                .with_udp_connections(udp_connections)
                .with_idle_timeout(Duration::from_millis(idle_timeout_ms))
                .with_json(json);

            let client = Client::new(config)?;
            let cancel_token = client.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Client shutting down...");
                    cancel_token.cancel();
                }
            });

            let mut round = 0u64;
            loop {
                round += 1;
                let results = client.run().await?;
                println!("{}", render_round(&results, client.config().json)?);

                if client.cancellation_token().is_cancelled() || (rounds != 0 && round >= rounds)
                {
                    break;
                }
                println!("All transfers complete, ready for new tests...\n");
            }
        }
    }

    Ok(())
}
