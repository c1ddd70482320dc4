use clap::Parser;
use fvdedup::cli::SubCommandExtend;
use fvdedup::config::{Opts, SubCommand};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Inspect(config) => config.run(&opts).await,
        SubCommand::Encode(config) => config.run(&opts).await,
        SubCommand::Compare(config) => config.run(&opts).await,
        SubCommand::Scan(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    }
}
