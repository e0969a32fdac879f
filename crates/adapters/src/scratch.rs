// Per-invocation scratch directory
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Private temporary directory owned by one invocation.
///
/// Removed when dropped, so every exit path (success, error, timeout,
/// cancellation) cleans up.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new(tool: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("armory-{}-", tool))
            .tempdir()?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write one entry per line to `name` inside the directory
    pub fn write_lines<I, S>(&self, name: &str, lines: I) -> std::io::Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = self.dir.path().join(name);
        let mut file = std::fs::File::create(&path)?;
        for line in lines {
            writeln!(file, "{}", line.as_ref())?;
        }
        file.flush()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_written_and_removed_on_drop() {
        let scratch = ScratchDir::new("nuclei").unwrap();
        let list = scratch
            .write_lines("targets.txt", ["https://a.example.com", "https://b.example.com"])
            .unwrap();

        let content = std::fs::read_to_string(&list).unwrap();
        assert_eq!(content, "https://a.example.com\nhttps://b.example.com\n");

        let root = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!root.exists());
    }
}
