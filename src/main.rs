//! Entry point for `rotline`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode. All socket work lives in the library; `main.rs` only owns process
//! setup (logging, argument parsing, exit codes).

use std::net::Ipv4Addr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rotline::builder::{DEFAULT_BACKLOG, DEFAULT_MAX_LINE, DEFAULT_PORT};
use rotline::{ClientBuilder, Rot13, ServerBuilder};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// ROT13 line server and client over a single-threaded reactor.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections and echo every line back transformed.
    Server {
        /// Local IPv4 address to bind.
        #[arg(short, long, default_value_t = Ipv4Addr::LOCALHOST)]
        address: Ipv4Addr,
        /// Port to listen on (0 picks a free one).
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Pending-connection queue length.
        #[arg(long, default_value_t = DEFAULT_BACKLOG)]
        backlog: i32,
        /// Bytes buffered without a newline before a forced flush.
        #[arg(long, default_value_t = DEFAULT_MAX_LINE)]
        max_line: usize,
    },
    /// Send lines to a server and print the replies.
    Client {
        /// Server IPv4 address.
        #[arg(short, long, default_value_t = Ipv4Addr::LOCALHOST)]
        address: Ipv4Addr,
        /// Server port.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Apply ROT13 to replies, recovering the original text.
        #[arg(short, long)]
        decode: bool,
        /// Lines to send.
        #[arg(required = true)]
        lines: Vec<String>,
    },
}

fn main() -> ExitCode {
    // Set RUST_LOG to control verbosity.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.mode {
        Mode::Server {
            address,
            port,
            backlog,
            max_line,
        } => run_server(address, port, backlog, max_line),
        Mode::Client {
            address,
            port,
            decode,
            lines,
        } => run_client(address, port, decode, lines),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "exiting");
            ExitCode::FAILURE
        }
    }
}

fn run_server(address: Ipv4Addr, port: u16, backlog: i32, max_line: usize) -> rotline::Result<()> {
    let mut server = ServerBuilder::new()
        .address(address)
        .port(port)
        .backlog(backlog)
        .max_line(max_line)
        .build()?;

    info!(local_addr = %server.local_addr(), "rotline server is running");
    server.run()
}

fn run_client(address: Ipv4Addr, port: u16, decode: bool, lines: Vec<String>) -> rotline::Result<()> {
    let mut builder = ClientBuilder::new().address(address).port(port);
    if decode {
        builder = builder.transform(Rot13);
    }

    for reply in builder.build().exchange(&lines)? {
        print!("{}", String::from_utf8_lossy(&reply));
    }
    Ok(())
}
