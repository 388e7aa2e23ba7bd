use csv_visualizer::{Config, app, events};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    events::init_logging();

    let mut config = Config::from_env()?;

    // An explicit bind address on the command line wins over the environment
    let args: Vec<String> = env::args().collect();
    if args.len() >= 2 {
        config.bind_addr = args[1].clone();
    }

    app::run(config).await?;

    Ok(())
}
