use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "📦 Framed TCP file server and client", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML config file (CLI flags override its values)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server host to connect to (default: 127.0.0.1)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to connect to or listen on (default: 8888)
    #[arg(long, short = 'p', global = true)]
    pub port: Option<u16>,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a directory until Ctrl+C
    Serve {
        /// Directory to serve (created if missing)
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,

        /// Interface to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,

        /// Maximum concurrent sessions
        #[arg(long)]
        max_sessions: Option<usize>,
    },

    /// List files on the server
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show size and modification time of a remote file
    Info {
        name: String,
    },

    /// Download a file
    Get {
        /// Remote file name
        name: String,

        /// Local output path (default: the remote name)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Upload a file
    Put {
        /// Local file to send
        path: PathBuf,

        /// Name to store it under (default: the local file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Check the server is answering
    Ping,

    /// Ask the server to say goodbye
    Quit,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_global_flags() {
        let cli = Cli::try_parse_from(["ferry", "get", "a.bin", "-o", "/tmp/a", "-p", "9000"])
            .unwrap();
        assert_eq!(cli.port, Some(9000));
        match cli.command {
            Commands::Get { name, output } => {
                assert_eq!(name, "a.bin");
                assert_eq!(output, Some(PathBuf::from("/tmp/a")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
