use std::path::{Path, PathBuf};

use anyhow::{Context, Result as Anyhow};
use tracing::{debug, error, info, warn};
use udev::Enumerator;

use crate::device::{EvdevSource, EventSource};

pub const DEFAULT_KEYWORDS: [&str; 2] = ["keyboard", "kbd"];

const INPUT_SUBSYSTEM: &str = "input";
const EVENT_NODE_PREFIX: &str = "event";

/// Produces the handles for one discovery cycle.
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Never fails: anything that goes wrong is logged and costs at most the affected devices.
    fn discover(&self) -> Vec<Box<dyn EventSource>>;
}

/// Which devices a detector hands out.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Every event node whose name contains one of these words, case-insensitively.
    Keywords(Vec<String>),
    /// Exactly these nodes, whatever their names.
    Paths(Vec<PathBuf>),
}

pub struct KeyboardUdevDetector {
    selection: Selection,
}

impl Default for Selection {
    fn default() -> Self {
        Self::Keywords(DEFAULT_KEYWORDS.iter().map(|word| word.to_string()).collect())
    }
}

impl KeyboardUdevDetector {
    pub fn new(selection: Selection) -> Self {
        let selection = match selection {
            Selection::Keywords(words) => {
                Selection::Keywords(words.iter().map(|word| word.to_lowercase()).collect())
            }
            paths => paths,
        };
        Self { selection }
    }

    /// Checks that udev can be queried at all.
    pub fn check_access() -> Anyhow<()> {
        Self::enumerate().map(|_| ())
    }

    /// All `/dev/input/event*` nodes known to udev, in event number order.
    pub fn enumerate() -> Anyhow<Vec<PathBuf>> {
        let mut enumerator =
            Enumerator::new().with_context(|| "Failed to create a udev enumerator")?;
        enumerator
            .match_subsystem(INPUT_SUBSYSTEM)
            .with_context(|| "Failed to add a subsystem filter to the udev enumerator")?;

        let mut nodes: Vec<PathBuf> = enumerator
            .scan_devices()
            .with_context(|| "Failed to scan udev devices")?
            .filter_map(|device| device.devnode().map(Path::to_path_buf))
            .filter(|node| event_number(node).is_some())
            .collect();
        nodes.sort_by_key(|node| event_number(node));

        Ok(nodes)
    }

    fn candidates(&self) -> Anyhow<Vec<PathBuf>> {
        match &self.selection {
            Selection::Keywords(_) => Self::enumerate(),
            Selection::Paths(paths) => Ok(paths.clone()),
        }
    }

    fn accepts(&self, name: &str) -> bool {
        match &self.selection {
            Selection::Keywords(words) => matches_keywords(name, words),
            Selection::Paths(_) => true,
        }
    }
}

impl DeviceRegistry for KeyboardUdevDetector {
    fn discover(&self) -> Vec<Box<dyn EventSource>> {
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to enumerate input devices: {e:#}");
                return vec![];
            }
        };

        let mut devices: Vec<Box<dyn EventSource>> = vec![];
        for path in candidates {
            let source = match EvdevSource::open(&path) {
                Ok(source) => source,
                Err(e) => {
                    warn!("Error accessing device at {}: {e}", path.display());
                    continue;
                }
            };

            if !self.accepts(source.name()) {
                debug!("Skipping {} at {}", source.name(), path.display());
                continue;
            }

            info!("Found keyboard: {} at {}", source.name(), path.display());
            devices.push(Box::new(source));
        }

        devices
    }
}

fn matches_keywords(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    keywords.iter().any(|word| name.contains(word.as_str()))
}

fn event_number(node: &Path) -> Option<u32> {
    node.file_name()?
        .to_str()?
        .strip_prefix(EVENT_NODE_PREFIX)?
        .parse()
        .ok()
}
