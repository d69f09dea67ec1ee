use std::env;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            if let Err(e) = pension_planner::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Some(_) => match pension_planner::api::run_cli(&raw_args[1..]) {
            Ok(output) => println!("{output}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(2);
            }
        },
        None => {
            eprintln!("Usage: pension-planner <serve [port] | evaluate [flags] | solve [flags]>");
            std::process::exit(1);
        }
    }
}
