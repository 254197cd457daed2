//! Command-line argument definitions
// (c) 2025 Ross Younger

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about, infer_subcommands(true))]
pub(crate) struct CliArgs {
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,

    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=replup=debug` in the
    /// environment. If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Debug"), display_order(0))]
    pub(crate) debug: bool,

    /// Quiet mode; reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub(crate) quiet: bool,

    /// Log to a file as well as the console
    #[arg(
        short('l'),
        long,
        action,
        value_name("FILE"),
        help_heading("Output"),
        display_order(0)
    )]
    pub(crate) log_file: Option<String>,

    /// Use an alternative configuration file
    ///
    /// By default, `replup.toml` in the working directory is read if it
    /// exists. `REPLUP_*` environment variables override either.
    #[arg(long, value_name("FILE"), help_heading("Configuration"))]
    pub(crate) config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

/// How to reach the device
#[derive(Debug, Args, Clone, Default)]
pub(crate) struct ConnectionArgs {
    /// Serial port to connect to (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, value_name("PORT"), help_heading("Connection"))]
    pub(crate) port: Option<String>,

    /// Serial baud rate
    #[arg(long, value_name("BAUD"), help_heading("Connection"))]
    pub(crate) baud: Option<u32>,

    /// Connect over Bluetooth LE (UART bridge) instead of serial
    #[arg(long, action, conflicts_with("port"), help_heading("Connection"))]
    pub(crate) ble: bool,

    /// Advertised-name prefix to search for when connecting over BLE
    #[arg(long, value_name("PREFIX"), help_heading("Connection"))]
    pub(crate) name_prefix: Option<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Upload files or directories to the device filesystem
    Upload(UploadArgs),
    /// Run a local script on the device without flashing it
    Run(RunArgs),
    /// Interrupt whatever the device is running (CTRL-C)
    Stop,
    /// Hard-reset the device
    Reset,
    /// Attach to the device and stream its output until interrupted
    Monitor,
}

#[derive(Debug, Args)]
pub(crate) struct UploadArgs {
    /// Files or directories to upload. Directories are walked
    /// recursively; their internal structure is kept unless --flatten is
    /// given.
    #[arg(value_name("PATH"), required(true))]
    pub(crate) sources: Vec<PathBuf>,

    /// Destination root on the device
    #[arg(long, value_name("DIR"), default_value("/"))]
    pub(crate) dest: String,

    /// Source bytes per write statement
    #[arg(long, value_name("BYTES"))]
    pub(crate) chunk_size: Option<usize>,

    /// Write statements combined into one execute call
    #[arg(long, value_name("N"))]
    pub(crate) batch_size: Option<usize>,

    /// Put every file directly in the destination root, dropping folders
    #[arg(long, action)]
    pub(crate) flatten: bool,

    /// Skip the post-write parse check
    #[arg(long, action)]
    pub(crate) no_verify: bool,

    /// Skip the filesystem sync at the end
    #[arg(long, action)]
    pub(crate) no_sync: bool,

    /// Hard-reset the device once the upload completes
    #[arg(long, action)]
    pub(crate) reset: bool,
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    /// Script file to run
    #[arg(value_name("FILE"), required_unless_present("code"))]
    pub(crate) file: Option<PathBuf>,

    /// Inline code to run instead of a file
    #[arg(short('e'), long, value_name("CODE"), conflicts_with("file"))]
    pub(crate) code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn upload_defaults() {
        let args = CliArgs::parse_from(["test", "--port", "/dev/ttyUSB0", "upload", "main.py"]);
        let Command::Upload(upload) = args.command else {
            panic!("expected upload");
        };
        assert_eq!(upload.dest, "/");
        assert!(!upload.flatten);
        assert!(!upload.reset);
        assert_eq!(args.connection.port.as_deref(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn ble_conflicts_with_port() {
        assert!(
            CliArgs::try_parse_from(["test", "--port", "COM3", "--ble", "monitor"]).is_err()
        );
    }

    #[test]
    fn run_requires_file_or_code() {
        assert!(CliArgs::try_parse_from(["test", "run"]).is_err());
        assert!(CliArgs::try_parse_from(["test", "run", "-e", "print(1)"]).is_ok());
        assert!(CliArgs::try_parse_from(["test", "run", "app.py"]).is_ok());
    }
}
