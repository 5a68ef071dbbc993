//! BeemFlow CLI - workflow orchestration runtime
//!
//! Run with: cargo run --bin flow -- <command>
//! Or after build: ./target/release/flow <command>

#[tokio::main]
async fn main() {
    // .env values feed config env overrides
    let _ = dotenvy::dotenv();

    beemflow::init_logging();

    if let Err(e) = beemflow::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
