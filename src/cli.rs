use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "podbench", version, about = "Pod production test station")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Connect the bench and test pods as the jig closes.
    Run(RunOptions),
    /// List serial ports with their USB ids.
    ListPorts,
    /// Print the step catalog of a product variant.
    Steps {
        #[arg(long, default_value = "BASE")]
        variant: String,
    },
}

/// Options for the `run` command; `None` when not given on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Args)]
pub struct RunOptions {
    /// TOML config file (default: $PODBENCH_CONFIG, then ./podbench.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[arg(long, value_name = "PORT")]
    pub io_board_port: Option<String>,
    #[arg(long, value_name = "PORT")]
    pub mcu_port: Option<String>,
    #[arg(long, value_name = "PORT")]
    pub sbc_port: Option<String>,
    #[arg(long, value_name = "PORT")]
    pub voltmeter_port: Option<String>,
    /// Step to skip; repeat for several.
    #[arg(long = "skip", value_name = "STEP")]
    pub skip: Vec<String>,
    /// error, warn, info, debug or trace.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Append logs to this file as well.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
    /// Test a single pod, then exit.
    #[arg(long)]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("podbench").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn run_collects_options() {
        let command = parse(&[
            "run",
            "--mcu-port",
            "/dev/ttyUSB1",
            "--skip",
            "PRINT_LABEL",
            "--skip",
            "SEND_KEYS",
            "--once",
        ]);
        let Command::Run(opts) = command else {
            panic!("expected run");
        };
        assert_eq!(opts.mcu_port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(opts.skip, vec!["PRINT_LABEL", "SEND_KEYS"]);
        assert!(opts.once);
        assert_eq!(opts.io_board_port, None);
    }

    #[test]
    fn steps_defaults_to_base() {
        assert_eq!(
            parse(&["steps"]),
            Command::Steps {
                variant: "BASE".into()
            }
        );
    }

    #[test]
    fn list_ports_takes_no_arguments() {
        assert_eq!(parse(&["list-ports"]), Command::ListPorts);
        assert!(Cli::try_parse_from(["podbench", "list-ports", "--once"]).is_err());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["podbench", "run", "--baud", "9600"]).is_err());
    }
}
