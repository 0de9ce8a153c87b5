//! An in-memory [`World`] for driving the executor in tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hammer::World;
use hammer::graph::Command;

/// A mock world backed by a path-to-epoch map.
///
/// Commands are interpreted by convention instead of being spawned:
/// `touch <path>...` bumps the named files to the current epoch, `fail`
/// exits with status 1, and anything else is a successful no-op. A
/// command's output redirect is touched as well, mirroring what the
/// real process would leave behind. Every launched command line is
/// recorded in a log for assertions.
pub struct MockWorld {
    inner: Mutex<MockWorldInner>,
}

struct MockWorldInner {
    /// A counter standing in for the clock, in fake microseconds.
    /// Increases every time a file is touched.
    epoch: i64,
    files: HashMap<PathBuf, i64>,
    dirs: Vec<PathBuf>,
    exec_log: Vec<String>,
}

impl World for MockWorld {
    fn mtime(&self, path: &Path) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path).copied().unwrap_or(i64::MIN)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.dirs.push(path.to_owned());
        Ok(())
    }

    fn execute(&self, cmd: &Command) -> io::Result<i32> {
        let mut inner = self.inner.lock().unwrap();
        inner.exec_log.push(cmd.render());

        let mut status = 0;
        for stage in &cmd.stages {
            match stage.first().map(|s| s.as_str()) {
                Some("touch") => {
                    for path in &stage[1..] {
                        inner.touch(Path::new(path.as_str()));
                    }
                }
                Some("fail") => status = 1,
                _ => {}
            }
        }
        if let Some(output) = &cmd.output {
            inner.touch(Path::new(output.as_str()));
        }
        Ok(status)
    }
}

impl MockWorldInner {
    fn touch(&mut self, path: &Path) {
        self.epoch += 1;
        let epoch = self.epoch;
        *self.files.entry(path.to_owned()).or_default() = epoch;
    }
}

#[allow(unused)]
impl MockWorld {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockWorldInner {
                epoch: 0,
                files: HashMap::new(),
                dirs: Vec::new(),
                exec_log: Vec::new(),
            }),
        }
    }

    /// Set a file as existing, bumping its mtime to the current epoch.
    pub fn touch_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().unwrap();
        inner.touch(path.as_ref());
    }

    /// Remove a file from the mock filesystem.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(path.as_ref());
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.files.contains_key(path.as_ref())
    }

    /// Take and clear the execution log.
    pub fn take_log(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.exec_log)
    }

    /// Directories created through [`World::mkdir`], in call order.
    pub fn dirs(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.dirs.clone()
    }
}

impl Default for MockWorld {
    fn default() -> Self {
        Self::new()
    }
}
