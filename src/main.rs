use clap::Parser;
use podbench::app::{logger, App};
use podbench::cli::{Cli, Command};
use podbench::{product, serial};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("podbench: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> podbench::Result<()> {
    match command {
        Command::Run(opts) => {
            let app = App::from_options(opts)?;
            let logging = &app.config().config.logging;
            logger::init(&logging.level, logging.file.as_deref())?;
            app.run()
        }
        Command::ListPorts => {
            for port in serial::list_ports()? {
                println!("{port}");
            }
            Ok(())
        }
        Command::Steps { variant } => {
            let catalog = product::catalog(&variant)?;
            for (index, name) in catalog.names().enumerate() {
                println!("{:>2} {name}", index + 1);
            }
            Ok(())
        }
    }
}
