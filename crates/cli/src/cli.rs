use crate::tracing::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bincache")]
#[command(about = "Install a prebuilt binary, reusing a local cache when it still works")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,

    #[arg(
        long,
        global = true,
        env = "BINCACHE_CACHE_DIR",
        help = "Cache directory (defaults to the per-user cache)"
    )]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Install a binary, building it with the given command on a cache miss")]
    Install(InstallArgs),
    #[command(about = "Cache maintenance")]
    Cache {
        #[command(subcommand)]
        subcommand: CacheCommands,
    },
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[arg(long, short = 'n', help = "Base name of the binary the build command produces")]
    pub name: String,

    #[arg(long, help = "Install under this file name instead")]
    pub rename: Option<String>,

    #[arg(long = "version", help = "Version to install", default_value = "latest")]
    pub tool_version: String,

    #[arg(
        long,
        short = 'f',
        env = "BINCACHE_FORCE",
        help = "Ignore the cache and always build"
    )]
    pub force: bool,

    #[arg(long, help = "Directory to install into", default_value = ".")]
    pub cwd: PathBuf,

    #[arg(long, value_name = "SECS", help = "Deadline for the installed binary's --version check")]
    pub timeout: Option<u64>,

    #[arg(
        last = true,
        required = true,
        num_args = 1..,
        help = "Build command; must write the binary to $BINCACHE_INSTALL_PATH"
    )]
    pub command: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    #[command(about = "Check cache integrity and reclaim unused space")]
    Verify,
    #[command(about = "Drop the cached binary")]
    Clear,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_defaults() {
        let cli = Cli::try_parse_from(["bincache", "install", "--name", "tool", "--", "make"]).unwrap();
        assert!(matches!(cli.level, LogLevel::Info));
        assert!(!cli.json);
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.name, "tool");
        assert_eq!(args.tool_version, "latest");
        assert!(!args.force);
        assert_eq!(args.cwd, PathBuf::from("."));
        assert_eq!(args.command, ["make"]);
    }

    #[test]
    fn install_with_everything() {
        let cli = Cli::try_parse_from([
            "bincache",
            "--json",
            "-l",
            "debug",
            "install",
            "-n",
            "tool",
            "--rename",
            "tool-2",
            "--version",
            "2.0.0",
            "--force",
            "--cwd",
            "/tmp/work",
            "--timeout",
            "3",
            "--cache-dir",
            "/tmp/cache",
            "--",
            "sh",
            "-c",
            "build --release",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.level, LogLevel::Debug));
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/cache")));
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.rename.as_deref(), Some("tool-2"));
        assert_eq!(args.tool_version, "2.0.0");
        assert!(args.force);
        assert_eq!(args.timeout, Some(3));
        assert_eq!(args.command, ["sh", "-c", "build --release"]);
    }

    #[test]
    fn install_requires_a_command() {
        assert!(Cli::try_parse_from(["bincache", "install", "--name", "tool"]).is_err());
    }

    #[test]
    fn cache_subcommands() {
        let cli = Cli::try_parse_from(["bincache", "cache", "verify"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                subcommand: CacheCommands::Verify
            }
        ));
        let cli = Cli::try_parse_from(["bincache", "cache", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                subcommand: CacheCommands::Clear
            }
        ));
    }
}
