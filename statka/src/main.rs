//! Entrypoint of the statka binary

use dotenvy::dotenv;
use statka_clap_blocks::tokio::TokioIoConfig;

mod commands {
    pub mod serve;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "statka",
    version,
    about = "Buffers HTTP events per table and bulk-loads them into ClickHouse",
    long_about = r#"Buffers HTTP events per table and bulk-loads them into ClickHouse

There is no configuration file. Every setting is a flag or an environment variable, and a `.env`
file in the working directory is loaded into the environment first.

Examples:
    # Run the server against a local ClickHouse
    statka serve

    # Flush every 5 seconds and drop a table's rows after 5 failed flushes
    statka serve --flush-interval 5s --retry-max 5

    # Run with debug logging
    statka serve -vv

    # Run with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug statka serve
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioIoConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run the statka server
    Serve(commands::serve::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Serve(config)) => {
                if let Err(e) = config.logging_config.install_global_subscriber() {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
                if let Err(e) = commands::serve::command(config).await {
                    eprintln!("Serve command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct. Variables already set in the
/// environment take precedence.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // no .env file, the defaults apply
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
