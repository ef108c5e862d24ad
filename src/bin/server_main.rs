use bedrock_relay::{config, install_panic_hook, server};

#[tokio::main]
async fn main() {
    install_panic_hook();

    let settings = config::load();
    if let Err(e) = server::serve(settings).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
