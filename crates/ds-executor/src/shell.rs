//! File helpers expressed as shell commands run through an [`ExecContext`].

use crate::sync;
use async_trait::async_trait;
use ds_common::{ExecContext, ProgressSink, Result, SnapshotError, Workspace};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Block size `du -s` reports in.
const DU_BLOCK_SIZE: u64 = 1024;

/// Upper bound on the quoted content in one command. A single argument may
/// not exceed 128 KiB on Linux.
const WRITE_CHUNK_BYTES: usize = 64 * 1024;

/// Quotes `value` for a POSIX shell so it is passed through as one word,
/// byte for byte.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Splits `content` at character boundaries into pieces whose quoted form
/// stays within `max_quoted` bytes. Empty content is one empty piece.
pub fn quoted_chunks(content: &str, max_quoted: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    // Both surrounding quotes
    let mut quoted = 2;
    for (i, c) in content.char_indices() {
        let cost = if c == '\'' { 4 } else { c.len_utf8() };
        if quoted + cost > max_quoted && i > start {
            chunks.push(&content[start..i]);
            start = i;
            quoted = 2;
        }
        quoted += cost;
    }
    chunks.push(&content[start..]);
    chunks
}

/// Bytes used by a directory, from the first field of `du -s` output.
pub fn parse_du_output(output: &str) -> Option<u64> {
    output
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
        .map(|blocks| blocks * DU_BLOCK_SIZE)
}

/// File count from `wc -l` output. Anything unparsable counts as zero.
pub fn parse_file_count(output: &str) -> u64 {
    output.trim().parse().unwrap_or_else(|_| {
        if !output.trim().is_empty() {
            warn!(%output, "Unparsable file count, assuming 0");
        }
        0
    })
}

/// [`Workspace`] implemented with ordinary shell tools inside an execution
/// context: `cat`, `printf`, `rm`, `du`, `find` and `rsync`.
#[derive(Clone)]
pub struct ShellWorkspace {
    ctx: Arc<dyn ExecContext>,
}

impl ShellWorkspace {
    pub fn new(ctx: Arc<dyn ExecContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Workspace for ShellWorkspace {
    async fn read_file(&self, path: &str) -> Result<String> {
        self.ctx
            .run(&format!("cat {} 2>/dev/null || true", quote(path)))
            .await
    }

    /// Writes to a sibling temp file, appending in bounded chunks, then
    /// renames it over `path`, so readers never see a half-written file.
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let tmp = quote(&format!("{path}.tmp"));
        let chunks = quoted_chunks(content, WRITE_CHUNK_BYTES);
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.into_iter().enumerate() {
            let redirect = if i == 0 { ">" } else { ">>" };
            let mut command = format!("printf '%s' {} {redirect} {tmp}", quote(chunk));
            if i == last {
                command.push_str(&format!(" && mv -f {tmp} {}", quote(path)));
            }
            self.ctx.run(&command).await?;
        }
        debug!(%path, bytes = content.len(), commands = last + 1, "Wrote file");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> Result<()> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(SnapshotError::Internal(format!(
                "refusing to remove `{path}`"
            )));
        }
        self.ctx.run(&format!("rm -rf {}", quote(path))).await?;
        Ok(())
    }

    async fn dir_size(&self, path: &str) -> Result<u64> {
        let command = format!("du -s {}", quote(path));
        let output = self.ctx.run(&command).await?;
        let size = parse_du_output(&output).ok_or_else(|| {
            SnapshotError::Internal(format!("unexpected output from `{command}`: {output:?}"))
        })?;
        debug!(%path, size, "Measured directory");
        Ok(size)
    }

    async fn file_count(&self, path: &str) -> Result<u64> {
        let output = self
            .ctx
            .run(&format!("find {} -type f 2>/dev/null | wc -l", quote(path)))
            .await?;
        Ok(parse_file_count(&output))
    }

    async fn sync(
        &self,
        source: &str,
        destination: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        sync::sync(self.ctx.as_ref(), source, destination, progress).await
    }

    async fn halt(&self) -> Result<()> {
        self.ctx.halt().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_and_special() {
        assert_eq!(quote("db.json"), "'db.json'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$HOME `x`"), "'$HOME `x`'");
    }

    #[test]
    fn test_quoted_chunks_respect_limit() {
        assert_eq!(quoted_chunks("", 16), vec![""]);
        assert_eq!(quoted_chunks("abc", 16), vec!["abc"]);

        let content = "it's ünïcode, 'quoted' and long enough to split";
        let chunks = quoted_chunks(content, 12);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), content);
        for chunk in &chunks {
            assert!(quote(chunk).len() <= 12, "{chunk:?} too long once quoted");
        }
    }

    #[test]
    fn test_parse_du_output_scales_blocks() {
        assert_eq!(parse_du_output("12\t/mnt/ds/abc\n"), Some(12 * 1024));
        assert_eq!(parse_du_output("0 /empty"), Some(0));
        assert_eq!(parse_du_output(""), None);
        assert_eq!(parse_du_output("du: cannot access"), None);
    }

    #[test]
    fn test_parse_file_count_defaults_to_zero() {
        assert_eq!(parse_file_count("42\n"), 42);
        assert_eq!(parse_file_count("   7"), 7);
        assert_eq!(parse_file_count(""), 0);
        assert_eq!(parse_file_count("find: not found"), 0);
    }
}
