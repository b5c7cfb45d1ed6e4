use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "meter-inspect", version, about = "Meter inspection station")]
pub struct Cli {
    /// Settings file (JSON); missing means defaults.
    #[arg(short, long, default_value = "meter-inspect.json")]
    pub config: PathBuf,

    /// SQLite database path; overrides the settings file and METER_INSPECT_DB.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Vision service base URL; overrides the settings file and METER_INSPECT_VISION_URL.
    #[arg(long)]
    pub vision_url: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive inspection console (default).
    Console,
    /// Meter catalog maintenance.
    Meters {
        #[command(subcommand)]
        action: MetersCommand,
    },
    /// Most recent inspection records.
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Pass/fail counters, overall and for today.
    Stats,
    /// Write the effective settings to the settings file.
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum MetersCommand {
    List,
    /// Load `[{"id", "model", "image"}]` entries from a JSON file.
    Import { file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_and_subcommands_parse() {
        let cli = Cli::parse_from([
            "meter-inspect",
            "--vision-url",
            "http://10.0.0.9:3000",
            "meters",
            "import",
            "catalog.json",
        ]);
        assert_eq!(cli.vision_url.as_deref(), Some("http://10.0.0.9:3000"));
        assert_eq!(cli.config, PathBuf::from("meter-inspect.json"));
        match cli.command {
            Some(Command::Meters {
                action: MetersCommand::Import { file },
            }) => assert_eq!(file, PathBuf::from("catalog.json")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_console() {
        let cli = Cli::parse_from(["meter-inspect"]);
        assert!(cli.command.is_none());
    }
}
