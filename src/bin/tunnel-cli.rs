use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;

use http_tunnel::client::TunnelChannel;
use http_tunnel::config::{self, TunnelConfig};
use http_tunnel::protocol::{encode_frame, length_prefix, Endpoint, LENGTH_PREFIX_LEN};

#[derive(Parser)]
#[command(name = "tunnel-cli")]
#[command(about = "Send length-prefixed frames through a running HTTP tunnel", long_about = None)]
struct Cli {
    /// Destination behind the tunnel (host:port)
    destination: Endpoint,

    /// Frame payload; the length prefix is added automatically
    payload: String,

    /// Treat the payload as hex and print the reply as hex
    #[arg(long)]
    hex: bool,

    /// TOML file whose [client] section supplies defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tunnel endpoint (host:port)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Use TLS on the tunnel hop
    #[arg(long)]
    tls: bool,

    /// PEM file with trusted roots
    #[arg(long)]
    ca_file: Option<String>,

    /// Name to verify the server certificate against
    #[arg(long)]
    server_name: Option<String>,

    /// Accept any server certificate
    #[arg(long)]
    insecure: bool,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Send the frame this many times over the same connection
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut tunnel = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => {
            let mut config = TunnelConfig::default();
            config::apply_env_overrides(&mut config)?;
            config
        }
    };
    let client = &mut tunnel.client;
    if let Some(endpoint) = &cli.endpoint {
        client.endpoint = endpoint.clone();
    }
    if let Some(ca_file) = &cli.ca_file {
        client.ca_file = ca_file.clone();
    }
    if let Some(server_name) = &cli.server_name {
        client.server_name = server_name.clone();
    }
    client.tls |= cli.tls;
    client.insecure_skip_verify |= cli.insecure;

    let payload = payload_bytes(&cli.payload, cli.hex)?;
    let frame = encode_frame(&payload);
    let timeout = Duration::from_secs(cli.timeout_secs);

    let mut channel = TunnelChannel::connect(&tunnel.client, cli.destination.clone())?;
    for i in 0..cli.count {
        let start = Instant::now();
        let reply = channel.exchange(&frame, timeout)?;
        let size = length_prefix(&reply).unwrap_or_default();
        let body = reply.get(LENGTH_PREFIX_LEN..).unwrap_or_default();

        eprintln!(
            "[{}] {} bytes from {} via {} in {:?}",
            i + 1,
            size,
            cli.destination,
            tunnel.client.endpoint,
            start.elapsed()
        );
        if cli.hex {
            println!("{}", hex::encode(body));
        } else {
            println!("{}", String::from_utf8_lossy(body));
        }
    }
    channel.close();

    Ok(())
}

/// Payload bytes from the command line; hex input may contain whitespace.
fn payload_bytes(payload: &str, is_hex: bool) -> Result<Vec<u8>, String> {
    if !is_hex {
        return Ok(payload.as_bytes().to_vec());
    }
    let digits: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|e| format!("invalid hex payload {payload:?}: {e}"))
}
