use anyhow::Result;
use env_logger::Env;

use devdeck::cli;

fn main() -> Result<()> {
    let args = cli::parse();

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        builder.filter_level(level.into());
    }
    builder.init();

    cli::run(args)
}
