//! nalix-ctl — command-line interface for the Nalix daemon's introspection API.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9001;

fn print_usage() {
    println!("Usage: nalix-ctl [--port <port>] <command>");
    println!();
    println!("Daemon");
    println!("  status                          Opcode/connection/metric summary");
    println!("  opcodes                         List registered opcodes");
    println!();
    println!("Connections");
    println!("  connections                     List open connections");
    println!("  connections inspect <id>        Show detailed connection info");
    println!();
    println!("Options:\n  --port <port>                   API port (default: {DEFAULT_PORT})");
    println!();
    println!("Examples:");
    println!("  nalix-ctl status");
    println!("  nalix-ctl opcodes");
    println!("  nalix-ctl connections inspect 7");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining_refs.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["opcodes"] => cmd::status::cmd_opcodes(port).await,
        ["connections"] => cmd::status::cmd_connections(port).await,
        ["connections", "inspect", id] => cmd::status::cmd_connection_inspect(port, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
