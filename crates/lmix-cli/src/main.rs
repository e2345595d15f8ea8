#[tokio::main]
async fn main() {
    if let Err(err) = lmix_cli::run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
