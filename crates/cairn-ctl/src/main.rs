//! cairn-ctl — command-line OPC UA client for the Cairn toolkit.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_ENDPOINT: &str = "opc.tcp://localhost:4840/cairn";

fn print_usage() {
    println!("Usage: cairn-ctl [--endpoint <url>] [--user <name> --password <pw>] <command>");
    println!();
    println!("Discovery");
    println!("  endpoints                       List the server's endpoints");
    println!();
    println!("Attributes");
    println!("  read <node-id>                  Read a variable, e.g. read ns=0;i=2259");
    println!("  write <node-id> <type> <value>  Write a variable; type is one of");
    println!("                                  bool|int32|uint32|int64|double|string");
    println!();
    println!("Address space");
    println!("  browse [node-id]                List references (default: Objects folder)");
    println!();
    println!("Subscriptions");
    println!("  watch <node-id>                 Subscribe and print data changes");
    println!();
    println!("Options:");
    println!("  --endpoint <url>                Server endpoint (default: {DEFAULT_ENDPOINT})");
    println!("  --user <name> --password <pw>   Authenticate instead of anonymous");
    println!("  --json                          Machine-readable output");
    println!();
    println!("Examples:");
    println!("  cairn-ctl read ns=0;i=2259");
    println!("  cairn-ctl write ns=2;s=Demo.Counter int32 42");
    println!("  cairn-ctl --user user1 --password password1 browse ns=2;s=Demo");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut endpoint = DEFAULT_ENDPOINT.to_string();
    let mut user = None;
    let mut password = None;
    let mut json = false;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--endpoint" => {
                i += 1;
                endpoint = args
                    .get(i)
                    .context("--endpoint requires a value")?
                    .clone();
            }
            "--user" => {
                i += 1;
                user = Some(args.get(i).context("--user requires a value")?.clone());
            }
            "--password" => {
                i += 1;
                password = Some(args.get(i).context("--password requires a value")?.clone());
            }
            "--json" => json = true,
            _ => remaining.push(args[i].clone()),
        }
        i += 1;
    }

    let opts = cmd::Options {
        endpoint,
        user,
        password,
        json,
    };

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
    match remaining_refs.as_slice() {
        ["endpoints"] => cmd::endpoints::run(&opts).await,
        ["read", node] => cmd::attributes::read(&opts, node).await,
        ["write", node, ty, value] => cmd::attributes::write(&opts, node, ty, value).await,
        ["browse"] => cmd::browse::run(&opts, "i=85").await,
        ["browse", node] => cmd::browse::run(&opts, node).await,
        ["watch", node] => cmd::watch::run(&opts, node).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
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
