use clap::Parser;
use multiverse::server::{run, ServeArgs};

#[tokio::main]
async fn main() {
    let args = ServeArgs::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
