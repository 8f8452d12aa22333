use clap::Parser;
use snapname::config::WatchArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    snapname::init();
    snapname::run(WatchArgs::parse()).await
}
