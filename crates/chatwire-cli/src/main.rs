//! chatwire: classify chat-platform URLs and replay capture scenarios.

use std::io::Write;
use std::path::PathBuf;

use chatwire_core::Platform;
use chatwire_network::EndpointTable;
use tracing_subscriber::EnvFilter;

mod replay;

/// The classification line printed by `classify`, or `None` when unmatched.
fn classify_line(host: &str, url: &str, method: &str) -> Option<String> {
    let platform = Platform::from_hostname(host);
    let c = EndpointTable::builtin().classify(platform, url, method)?;
    Some(match c.capture {
        Some(capture) => format!("{} {}", c.category, capture),
        None => c.category.to_string(),
    })
}

fn print_help() {
    println!("chatwire: chat-platform traffic capture tools");
    println!();
    println!("Usage: chatwire <command>");
    println!();
    println!("Commands:");
    println!("  classify <host> <url> [method]   Print the endpoint category of a request");
    println!("  replay <scenario.json> [--config <file>]");
    println!("                                   Replay a scenario, one JSON event per line");
    println!("  help                             Show this help message");
    println!();
    println!("Logs go to stderr; set RUST_LOG to adjust (default: info).");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Events own stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("classify") => {
            if args.len() < 4 {
                eprintln!("Usage: chatwire classify <host> <url> [method]");
                std::process::exit(1);
            }
            let method = args.get(4).map(String::as_str).unwrap_or("GET");
            match classify_line(&args[2], &args[3], method) {
                Some(line) => println!("{}", line),
                None => {
                    println!("unmatched");
                    std::process::exit(2);
                }
            }
        }
        Some("replay") => {
            if args.len() < 3 {
                eprintln!("Usage: chatwire replay <scenario.json> [--config <file>]");
                std::process::exit(1);
            }
            let mut scenario = replay::Scenario::load(&PathBuf::from(&args[2]))?;
            match (args.get(3).map(String::as_str), args.get(4)) {
                (None, _) => {}
                (Some("--config"), Some(path)) => {
                    scenario = scenario.with_config_file(&PathBuf::from(path));
                }
                _ => {
                    eprintln!("Usage: chatwire replay <scenario.json> [--config <file>]");
                    std::process::exit(1);
                }
            }
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let printed = replay::run(scenario, &mut out).await?;
            out.flush()?;
            tracing::info!("Replay finished: {} events", printed);
        }
        Some("--help") | Some("-h") | Some("help") | None => print_help(),
        Some(other) => {
            eprintln!("Unknown command: {}. Use 'chatwire help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
