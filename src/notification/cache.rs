use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PulseError;
use crate::model::Notification;

/// JSON file holding the most recent notifications, newest first.
///
/// The cache is advisory: a missing or unreadable file yields an empty list.
#[derive(Debug, Clone)]
pub struct NotificationCache {
    path: PathBuf,
    limit: usize,
}

impl NotificationCache {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Vec<Notification> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No notification cache at {}", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read notification cache: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Notification>>(&content) {
            Ok(mut items) => {
                items.truncate(self.limit);
                debug!("Loaded {} cached notifications", items.len());
                items
            }
            Err(e) => {
                warn!("Failed to parse notification cache: {}", e);
                Vec::new()
            }
        }
    }

    /// Write `items` newest first, keeping at most `limit` of them.
    pub fn save<'a, I>(&self, items: I) -> Result<usize, PulseError>
    where
        I: IntoIterator<Item = &'a Notification>,
    {
        let mut items: Vec<&Notification> = items.into_iter().collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        items.truncate(self.limit);

        let content = serde_json::to_string_pretty(&items)?;
        fs::write(&self.path, content)?;
        Ok(items.len())
    }
}
