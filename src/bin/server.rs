use clap::Parser;
use snapname::config::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    snapname::init();
    snapname::run_server(ServerArgs::parse()).await
}
