//! The OS backend behind the executor.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::{Child, ChildStdout, Stdio};
use std::time::UNIX_EPOCH;

use smol_str::SmolStr;

use crate::graph::Command;

/// A trait that abstracts over how the executor touches the outside
/// world.
///
/// All file and process operations in the executor are directed through
/// this trait, so a mock world can drive the executor entirely
/// in-memory. The default implementation is [`LocalWorld`].
///
/// Implementations run on the executor's worker threads and must be
/// thread-safe.
pub trait World: Send + Sync {
    /// Modification time of `path` in microseconds since the epoch, or
    /// `i64::MIN` when the file cannot be stat'd.
    fn mtime(&self, path: &Path) -> i64;

    /// Create a single directory. An already existing directory is
    /// success; the caller walks ancestors itself.
    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Run one pipeline command to completion. Returns the exit code of
    /// the first failing stage, or 0 when every stage succeeded.
    fn execute(&self, cmd: &Command) -> io::Result<i32>;
}

/// The default [`World`], backed by the local filesystem and local
/// processes.
pub struct LocalWorld;
pub static LOCAL_WORLD: LocalWorld = LocalWorld;

impl World for LocalWorld {
    fn mtime(&self, path: &Path) -> i64 {
        let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
            return i64::MIN;
        };
        match modified.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_micros() as i64,
            // Pre-epoch mtimes are as good as missing.
            Err(_) => i64::MIN,
        }
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        match std::fs::create_dir(path) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            other => other,
        }
    }

    fn execute(&self, cmd: &Command) -> io::Result<i32> {
        let Some(last) = cmd.stages.len().checked_sub(1) else {
            return Ok(0);
        };

        let mut children: Vec<Child> = Vec::with_capacity(cmd.stages.len());
        // Read end of the pipe feeding the next stage.
        let mut carried: Option<ChildStdout> = None;

        for (i, argv) in cmd.stages.iter().enumerate() {
            let Some((program, args)) = argv.split_first() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty pipeline stage",
                ));
            };

            let mut proc = std::process::Command::new(program.as_str());
            proc.args(args.iter().map(SmolStr::as_str));

            if let Some(upstream) = carried.take() {
                proc.stdin(upstream);
            } else if i == 0
                && let Some(input) = &cmd.input
            {
                proc.stdin(File::open(input.as_str())?);
            }

            if i < last {
                proc.stdout(Stdio::piped());
            } else if let Some(output) = &cmd.output {
                let mut opts = OpenOptions::new();
                opts.write(true).create(true).mode(0o644);
                if cmd.append {
                    opts.append(true);
                } else {
                    opts.truncate(true);
                }
                proc.stdout(opts.open(output.as_str())?);
            }

            let mut child = proc.spawn()?;
            if i < last {
                // Hand the read end to the next stage; dropping our
                // handle here would close it early.
                carried = child.stdout.take();
            }
            children.push(child);
        }

        let mut status = 0;
        for mut child in children {
            let exit = child.wait()?;
            if !exit.success() && status == 0 {
                status = exit.code().unwrap_or(-1);
            }
        }
        Ok(status)
    }
}
