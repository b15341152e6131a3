use std::path::PathBuf;
use structopt::StructOpt;
use structopt::clap::ErrorKind;

/// Command-line options.
///
/// Examples:
/// - Run against a specific config file:
///   fsrsync --config_file /etc/fsrsync/config.json
/// - Sync every destination once and exit:
///   fsrsync --fullsync
#[derive(StructOpt, Debug)]
pub struct Opts {
    #[structopt(short = "v", long = "version")]
    pub version: bool,

    #[structopt(
        long = "config_file",
        default_value = "/etc/fsrsync/config.json",
        help = "Path to the configuration file"
    )]
    pub config_file: PathBuf,

    #[structopt(long = "fullsync", help = "Enable full sync mode")]
    pub fullsync: bool,

    #[structopt(
        long = "setup",
        help = "Write a template configuration file to the default location and exit"
    )]
    pub setup: bool,

    #[structopt(
        long = "setupfolder",
        help = "Write a template configuration file into the given directory and exit"
    )]
    pub setupfolder: Option<PathBuf>,
}

impl Opts {
    /// Parse CLI arguments. If parsing fails, print the error and the full
    /// help, then exit.
    pub fn from_args() -> Self {
        let app = Opts::clap();
        match app.get_matches_safe() {
            Ok(m) => Opts::from_clap(&m),
            Err(e) => {
                let kind = e.kind; // capture before we move/print
                eprintln!("{}", e);
                let mut app = Opts::clap();
                eprintln!();
                let _ = app.print_long_help();
                eprintln!();
                std::process::exit(match kind {
                    ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => 0,
                    _ => 2,
                });
            }
        }
    }
}
