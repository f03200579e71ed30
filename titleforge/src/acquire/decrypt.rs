//! External decrypt step.
//!
//! Content blobs come off the CDN encrypted. Decryption is delegated
//! to an external helper program through the [`Decryptor`] trait; the
//! trait seam keeps the coordinator testable with an in-process fake.
//!
//! The helper contract: given an encrypted blob and an output
//! directory, it populates the directory with the decrypted sections
//! (for manifests: a `Header.bin` plus the meta blob; for control
//! content: icons, region data, and `control.dat`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::cdn::BoxFuture;

/// Errors from the external decrypt step.
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("decrypt helper not configured")]
    NotConfigured,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("decrypt helper exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("decrypt produced no output in {0}")]
    EmptyOutput(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Decrypts an encrypted content blob into a directory of sections.
pub trait Decryptor: Send + Sync {
    /// Decrypt `blob` into `out_dir`, using `key` (lowercase 32-hex)
    /// when the blob needs a title key rather than console keys.
    fn decrypt<'a>(
        &'a self,
        blob: &'a Path,
        out_dir: &'a Path,
        key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), DecryptError>>;
}

/// Production decryptor shelling out to a helper binary.
///
/// Invocation shape: `<program> --plaintext [--titlekey <key>]
/// <blob> <out_dir>`.
pub struct CommandDecryptor {
    program: PathBuf,
}

impl CommandDecryptor {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl Decryptor for CommandDecryptor {
    fn decrypt<'a>(
        &'a self,
        blob: &'a Path,
        out_dir: &'a Path,
        key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), DecryptError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(out_dir)
                .await
                .map_err(|e| DecryptError::Io {
                    path: out_dir.to_path_buf(),
                    source: e,
                })?;

            let mut command = Command::new(&self.program);
            command.arg("--plaintext");
            if let Some(key) = key {
                command.arg("--titlekey").arg(key);
            }
            command
                .arg(blob)
                .arg(out_dir)
                .stdout(Stdio::null())
                .stderr(Stdio::piped());

            debug!(blob = %blob.display(), out = %out_dir.display(), "running decrypt helper");
            let output = command.output().await.map_err(|e| DecryptError::Spawn {
                program: self.program.display().to_string(),
                source: e,
            })?;

            if !output.status.success() {
                return Err(DecryptError::Failed {
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }

            let mut listing =
                tokio::fs::read_dir(out_dir)
                    .await
                    .map_err(|e| DecryptError::Io {
                        path: out_dir.to_path_buf(),
                        source: e,
                    })?;
            if listing
                .next_entry()
                .await
                .map_err(|e| DecryptError::Io {
                    path: out_dir.to_path_buf(),
                    source: e,
                })?
                .is_none()
            {
                return Err(DecryptError::EmptyOutput(out_dir.to_path_buf()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-process decryptor writing canned section files.
    ///
    /// Keyed by the blob's filename; each value is a list of
    /// (section filename, bytes) pairs to materialize in `out_dir`.
    #[derive(Default)]
    pub(crate) struct FakeDecryptor {
        pub sections: HashMap<String, Vec<(String, Vec<u8>)>>,
        /// Blob filenames for which decryption should fail.
        pub failing: Vec<String>,
    }

    impl Decryptor for FakeDecryptor {
        fn decrypt<'a>(
            &'a self,
            blob: &'a Path,
            out_dir: &'a Path,
            _key: Option<&'a str>,
        ) -> BoxFuture<'a, Result<(), DecryptError>> {
            Box::pin(async move {
                let name = blob
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.failing.contains(&name) {
                    return Err(DecryptError::Failed {
                        status: "exit status: 1".into(),
                        stderr: "simulated failure".into(),
                    });
                }
                let sections = self.sections.get(&name).cloned().unwrap_or_default();
                if sections.is_empty() {
                    return Err(DecryptError::EmptyOutput(out_dir.to_path_buf()));
                }
                tokio::fs::create_dir_all(out_dir)
                    .await
                    .map_err(|e| DecryptError::Io {
                        path: out_dir.to_path_buf(),
                        source: e,
                    })?;
                for (file, bytes) in sections {
                    tokio::fs::write(out_dir.join(&file), &bytes)
                        .await
                        .map_err(|e| DecryptError::Io {
                            path: out_dir.join(&file),
                            source: e,
                        })?;
                }
                Ok(())
            })
        }
    }
}
