use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::BrokerError;

/// Local directory receiving dry-run documents as `<prefix>_<name>.json`.
#[derive(Debug, Clone)]
pub struct DumpDir {
    root: Utf8PathBuf,
}

impl DumpDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, prefix: &str, name: &str) -> Utf8PathBuf {
        self.root
            .join(format!("{}_{}.json", sanitize(prefix), sanitize(name)))
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        prefix: &str,
        name: &str,
        value: &T,
    ) -> Result<Utf8PathBuf, BrokerError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| BrokerError::Serialization(err.to_string()))?;
        let path = self.path_for(prefix, name);
        write_bytes_atomic(&path, &content)?;
        tracing::debug!(%path, "dumped");
        Ok(path)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BrokerError> {
    let parent = path
        .parent()
        .ok_or_else(|| BrokerError::Filesystem(format!("invalid output path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| BrokerError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("ingest-broker")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BrokerError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| BrokerError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BrokerError::Filesystem(err.to_string()))?;
    Ok(())
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
