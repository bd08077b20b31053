use std::collections::HashSet;
use std::path::{Component, Path};

use super::aggregator::{ChangeEvent, Effect};
use crate::config::RemoteScanConfig;

/// Decides which raw filesystem changes are worth a library scan.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    ignore_folders: Vec<String>,
    valid_extensions: HashSet<String>,
    image_extensions: HashSet<String>,
}

/// Lowercase an extension and make sure it starts with a dot.
pub fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

impl EventFilter {
    pub fn new<I, V, M>(ignore_folders: I, valid_extensions: V, image_extensions: M) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        V: IntoIterator,
        V::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let to_set = |exts: Vec<String>| -> HashSet<String> {
            exts.into_iter().filter(|e| !e.is_empty()).collect()
        };

        Self {
            ignore_folders: ignore_folders.into_iter().map(Into::into).collect(),
            valid_extensions: to_set(
                valid_extensions
                    .into_iter()
                    .map(|e| normalize_extension(e.as_ref()))
                    .collect(),
            ),
            image_extensions: to_set(
                image_extensions
                    .into_iter()
                    .map(|e| normalize_extension(e.as_ref()))
                    .collect(),
            ),
        }
    }

    pub fn from_config(config: &RemoteScanConfig) -> Self {
        Self::new(
            config.ignore_folders.iter().cloned(),
            &config.valid_file_extensions,
            &config.image_file_extensions,
        )
    }

    /// True when the event should reach the monitor.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        let accepted = self.path_valid(&event.path)
            && (event.effect == Effect::Destroy
                || event.is_directory
                || self.extension_valid(&event.file_name));

        if !accepted {
            log::trace!(
                "Ignored {:?} for {} in {}",
                event.effect,
                event.file_name,
                event.path.display()
            );
        }
        accepted
    }

    /// No segment of `path` may equal an ignore token. Substrings of a
    /// segment do not count.
    pub fn path_valid(&self, path: &Path) -> bool {
        !path.components().any(|component| match component {
            Component::Normal(segment) => self
                .ignore_folders
                .iter()
                .any(|ignore| segment == ignore.as_str()),
            _ => false,
        })
    }

    fn extension_valid(&self, file_name: &str) -> bool {
        if self.valid_extensions.is_empty() {
            return true;
        }

        let Some(extension) = Path::new(file_name).extension() else {
            return false;
        };
        let extension = normalize_extension(&extension.to_string_lossy());
        self.valid_extensions.contains(&extension) || self.image_extensions.contains(&extension)
    }
}
