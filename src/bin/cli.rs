//! replikv CLI Client
//!
//! Command-line interface for talking to a replikv node.

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use replikv::protocol::{read_response, write_request, Request, Response, Status};
use replikv::transport;
use replikv::{CommandPayload, TransportKind};
use serde_json::Value;

/// replikv CLI
#[derive(Parser, Debug)]
#[command(name = "replikv-cli")]
#[command(about = "CLI for a replikv node")]
struct Args {
    /// Node address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    server: String,

    /// Stream layer the node listens on: tcp or udp
    #[arg(short, long, default_value = "tcp")]
    transport: String,

    /// Dial and read timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key to a JSON value (bare words are stored as strings)
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ask the node to persist a snapshot
    Snapshot,

    /// Ping the node
    Ping,
}

fn main() {
    let args = Args::parse();

    match run(&args) {
        Ok(response) => {
            print_response(&response);
            if response.status == Status::Error {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn run(args: &Args) -> replikv::Result<Response> {
    let kind: TransportKind = args.transport.parse()?;
    let timeout = Duration::from_secs(args.timeout);
    let request = build_request(&args.command)?;

    let mut conn = transport::dial(kind, &args.server, timeout)?;
    conn.set_read_timeout(Some(timeout))?;
    write_request(&mut conn, &request)?;
    read_response(&mut conn)
}

fn build_request(command: &Commands) -> replikv::Result<Request> {
    match command {
        Commands::Get { key } => Request::command(&CommandPayload::get(key.as_str())),
        Commands::Set { key, value } => {
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));
            Request::command(&CommandPayload::set(key.as_str(), value))
        }
        Commands::Del { key } => Request::command(&CommandPayload::delete(key.as_str())),
        Commands::Snapshot => Ok(Request::Snapshot),
        Commands::Ping => Ok(Request::Ping),
    }
}

fn print_response(response: &Response) {
    match response.status {
        Status::Ok => match &response.payload {
            Value::Null => println!("OK"),
            payload => println!(
                "{}",
                serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
            ),
        },
        Status::Ignored => println!("(ignored)"),
        Status::Error => match &response.payload {
            Value::String(message) => eprintln!("(error) {}", message),
            payload => eprintln!("(error) {}", payload),
        },
    }
}
