//! Main CLI dispatch
// (c) 2025 Ross Younger

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use human_repr::HumanCount as _;
use tracing::info;

use super::args::{CliArgs, Command, ConnectionArgs, RunArgs, UploadArgs};
use crate::client::Coordinator;
use crate::config::Config;
use crate::events::{EventSink, SessionEvent, TracingSink};
use crate::session::upload::{FolderLayout, SourceFile, UploadOptions};
use crate::transport::{Medium, TransportConfig};
use crate::util::setup_tracing;

/// Computes the trace level for a given set of arguments
fn trace_level(args: &CliArgs) -> &str {
    if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    }
}

/// Writes device output straight to stdout; used by `monitor`, where the
/// byte stream *is* the product.
#[derive(Debug, Clone, Copy, Default)]
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn event(&self, event: SessionEvent) {
        use std::io::Write as _;
        match event {
            SessionEvent::Log(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::Status(status) => tracing::debug!("{status:?}"),
            SessionEvent::Progress(_) => (),
        }
    }
}

/// Main CLI entrypoint
///
/// Call this from `main`. It reads argv.
/// # Return
/// true indicates success. An Error is a failure we have not logged.
#[tokio::main(flavor = "current_thread")]
pub async fn cli() -> anyhow::Result<bool> {
    let args = CliArgs::parse();
    let config = Config::load(args.config_file.as_deref())?;
    setup_tracing(trace_level(&args), args.log_file.as_deref())?;

    let transport = transport_config(&args.connection, &config)?;
    let sink: Arc<dyn EventSink> = match args.command {
        Command::Monitor => Arc::new(ConsoleSink),
        _ => Arc::new(TracingSink),
    };

    let mut coordinator = Coordinator::new(config.clone(), sink);
    coordinator.connect(&transport).await?;

    let result = dispatch(&args.command, &mut coordinator, &config).await;
    coordinator.close().await;
    result?;
    Ok(true)
}

async fn dispatch(
    command: &Command,
    coordinator: &mut Coordinator,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Upload(upload) => {
            let files = gather_sources(&upload.sources)?;
            anyhow::ensure!(!files.is_empty(), "nothing to upload");
            let options = upload_options(upload, config);

            // Ctrl-C requests a cooperative abort: the in-flight chunk
            // completes, then the upload stops with an error.
            let abort = coordinator.abort_flag();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    abort.trigger();
                }
            });
            let outcome = coordinator.upload_files(&files, options).await;
            watcher.abort();
            let outcome = outcome?;
            info!(
                "uploaded {} file(s), {}",
                outcome.files,
                outcome.bytes.human_count_bytes()
            );
        }
        Command::Run(run) => {
            let code = run_buffer(run)?;
            let _ = coordinator.run_code(&code).await?;
        }
        Command::Stop => coordinator.stop().await?,
        Command::Reset => {
            coordinator.reset().await?;
            info!("device reset");
        }
        Command::Monitor => {
            info!("attached; press Ctrl-C to detach");
            tokio::signal::ctrl_c().await?;
        }
    }
    Ok(())
}

fn transport_config(connection: &ConnectionArgs, config: &Config) -> anyhow::Result<TransportConfig> {
    if connection.ble || connection.name_prefix.is_some() {
        let name_prefix = connection
            .name_prefix
            .clone()
            .unwrap_or_else(|| config.name_prefix.clone());
        Ok(TransportConfig {
            medium: Medium::Ble {
                name_prefix,
                scan_timeout: Duration::from_millis(config.scan_timeout_ms),
                mtu: config.ble_mtu,
            },
            write_chunk: config.ble_chunk,
            pace: Duration::from_millis(config.ble_pace_ms),
        })
    } else if let Some(port) = &connection.port {
        Ok(TransportConfig {
            medium: Medium::Serial {
                port: port.clone(),
                baud: connection.baud.unwrap_or(config.baud),
            },
            write_chunk: config.serial_chunk,
            pace: Duration::from_millis(config.serial_pace_ms),
        })
    } else {
        anyhow::bail!("specify a device: --port <PORT> for serial, or --ble")
    }
}

fn upload_options(args: &UploadArgs, config: &Config) -> UploadOptions {
    let mut options = UploadOptions::from_config(config);
    if let Some(chunk_size) = args.chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    options.layout = if args.flatten {
        FolderLayout::Flatten
    } else {
        FolderLayout::Preserve
    };
    options.base_path = args.dest.clone();
    options.auto_reset = args.reset;
    options.sync_after_write = !args.no_sync;
    options.verify_after_write = !args.no_verify;
    options
}

fn run_buffer(args: &RunArgs) -> anyhow::Result<String> {
    match (&args.code, &args.file) {
        (Some(code), _) => Ok(code.clone()),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("could not read {}", file.display())),
        (None, None) => anyhow::bail!("run needs a FILE or -e CODE"), // unreachable via clap
    }
}

/// Expand the command-line source list into upload inputs.
///
/// A plain file contributes just its filename; a directory is walked
/// recursively and contributes paths relative to itself.
fn gather_sources(sources: &[PathBuf]) -> anyhow::Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for source in sources {
        let meta = std::fs::metadata(source)
            .with_context(|| format!("could not read {}", source.display()))?;
        if meta.is_dir() {
            walk(source, source, &mut files)?;
        } else {
            files.push(read_source(
                source,
                source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )?);
        }
    }
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SourceFile>) -> anyhow::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("could not list {}", dir.display()))?
        .collect::<Result<_, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::path);
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is under its root")
                .to_string_lossy()
                .into_owned();
            out.push(read_source(&path, rel)?);
        }
    }
    Ok(())
}

fn read_source(path: &Path, rel: String) -> anyhow::Result<SourceFile> {
    let contents =
        std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    Ok(SourceFile {
        path: rel,
        contents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transport_defaults_to_serial() {
        let connection = ConnectionArgs {
            port: Some("/dev/ttyACM0".into()),
            ..ConnectionArgs::default()
        };
        let config = Config::default();
        let transport = transport_config(&connection, &config).unwrap();
        assert_eq!(
            transport.medium,
            Medium::Serial {
                port: "/dev/ttyACM0".into(),
                baud: 115_200
            }
        );
        assert_eq!(transport.write_chunk, config.serial_chunk);
    }

    #[test]
    fn name_prefix_implies_ble() {
        let connection = ConnectionArgs {
            name_prefix: Some("MEBLOCK-".into()),
            ..ConnectionArgs::default()
        };
        let transport = transport_config(&connection, &Config::default()).unwrap();
        assert!(matches!(transport.medium, Medium::Ble { .. }));
    }

    #[test]
    fn no_device_is_an_error() {
        assert!(transport_config(&ConnectionArgs::default(), &Config::default()).is_err());
    }

    #[test]
    fn gather_sources_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib/util")).unwrap();
        std::fs::write(dir.path().join("main.py"), b"print(1)").unwrap();
        std::fs::write(dir.path().join("lib/util/helpers.py"), b"x=1").unwrap();
        let files = gather_sources(&[dir.path().to_path_buf()]).unwrap();
        let mut rels: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        rels.sort_unstable();
        assert_eq!(rels, vec!["lib/util/helpers.py", "main.py"]);
    }
}
