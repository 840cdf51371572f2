use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::ledger::read_manifest;

pub const CONCAT_LIST_NAME: &str = "concat.txt";

#[derive(thiserror::Error, Debug)]
pub enum AssemblyError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("manifest {0} lists no segments")]
    EmptyManifest(PathBuf),
    #[error("ffmpeg exited with {0}")]
    Failed(std::process::ExitStatus),
}

/// Turns a finished manifest into a single media file inside `dir`.
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(&self, manifest: &Path, dir: &Path) -> Result<PathBuf, AssemblyError>;
}

pub struct FfmpegAssembler {
    binary: String,
    output_name: String,
}

impl FfmpegAssembler {
    pub fn new(binary: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            output_name: output_name.into(),
        }
    }
}

/// Builds an input list for ffmpeg's concat demuxer.
pub fn concat_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', "'\\''")))
        .collect()
}

pub async fn concat(binary: &str, list: &Path, output: &Path) -> Result<(), AssemblyError> {
    let mut child = tokio::process::Command::new(binary);

    child
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(list)
        .arg("-c")
        .arg("copy")
        .arg(output);

    let status = child.spawn()?.wait().await?;
    if !status.success() {
        return Err(AssemblyError::Failed(status));
    }

    Ok(())
}

#[async_trait]
impl Assembler for FfmpegAssembler {
    async fn assemble(&self, manifest: &Path, dir: &Path) -> Result<PathBuf, AssemblyError> {
        let names = match read_manifest(manifest).await {
            Ok(names) => names,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if names.is_empty() {
            return Err(AssemblyError::EmptyManifest(manifest.to_path_buf()));
        }

        let list = dir.join(CONCAT_LIST_NAME);
        let output = dir.join(&self.output_name);
        tokio::fs::write(&list, concat_list(&names)).await?;

        info!("Concatenating {} segments into {}", names.len(), output.display());
        let result = concat(&self.binary, &list, &output).await;
        if let Err(e) = tokio::fs::remove_file(&list).await {
            debug!("Could not remove {}: {}", list.display(), e);
        }

        result.map(|_| output)
    }
}
