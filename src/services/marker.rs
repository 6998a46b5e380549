//! Marker files whose mere existence carries state.
//!
//! The pending network configuration is such a marker: while the volatile
//! config file exists, uncommitted settings exist.

use log::info;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs::{self, OpenOptions};

#[derive(Clone, Debug)]
pub struct MarkerFile {
    path: PathBuf,
    label: &'static str,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Create the marker if missing. Existing content is kept.
    pub async fn set(&self) -> io::Result<()> {
        if !self.exists().await {
            info!("Setting {} marker at: {:?}", self.label, self.path);
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map(|_| ())
    }

    /// Remove the marker. Returns whether it existed; NotFound is not an error.
    pub async fn clear(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared {} marker", self.label);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
