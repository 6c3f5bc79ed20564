//! Event sources.
//!
//! A run file holds a list of events, each with its tracker hits and the
//! truth particles that produced them:
//!
//! ```json
//! { "events": [ { "hits": [ ... ], "particles": [ ... ] } ] }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Deserialize;

use crate::Result;

/// A memory-mapped run file.
pub struct MappedFile {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFile {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// One simulated tracker hit as stored in a run file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawHit {
    pub position: [f64; 3],
    #[serde(default)]
    pub momentum: Option<[f64; 3]>,
    #[serde(default)]
    pub edep: f64,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub path_length: f64,
    pub cell_id: u64,
    /// Index into the event's particle list.
    #[serde(default)]
    pub particle: Option<u32>,
}

/// One truth particle as stored in a run file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawParticle {
    pub momentum: [f64; 3],
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub charge: f64,
    pub pdg: i32,
    #[serde(default)]
    pub vertex: [f64; 3],
    #[serde(default)]
    pub endpoint: [f64; 3],
}

/// Hits and particles of one event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub hits: Vec<RawHit>,
    #[serde(default)]
    pub particles: Vec<RawParticle>,
}

#[derive(Deserialize)]
struct RunFile {
    events: Vec<EventRecord>,
}

/// Supplies the events of one input file.
///
/// Sources are shared across conversion workers.
pub trait EventSource: Sync {
    /// Reads every event of `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    fn read_events(&self, path: &Path) -> Result<Vec<EventRecord>>;
}

/// Reads JSON run files through a memory map.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSource;

impl EventSource for JsonEventSource {
    fn read_events(&self, path: &Path) -> Result<Vec<EventRecord>> {
        let file = MappedFile::open(path)?;
        let run: RunFile = serde_json::from_slice(file.as_bytes())?;
        log::debug!("Read {} events from {}", run.events.len(), file.path().display());
        Ok(run.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_events() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"events": [
                {{"hits": [{{"position": [1.0, 2.0, 3.0], "time": 0.5, "cell_id": 42, "particle": 0}}],
                  "particles": [{{"momentum": [0.0, 1.0, 0.0], "pdg": 13, "charge": -1.0}}]}},
                {{}}
            ]}}"#
        )
        .unwrap();

        let events = JsonEventSource.read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].hits[0].cell_id, 42);
        assert_eq!(events[0].hits[0].particle, Some(0));
        assert!(events[0].hits[0].momentum.is_none());
        assert_eq!(events[0].particles[0].pdg, 13);
        assert!(events[1].hits.is_empty());
    }

    #[test]
    fn test_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"events\": [").unwrap();
        assert!(matches!(
            JsonEventSource.read_events(file.path()),
            Err(crate::Error::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = JsonEventSource
            .read_events(Path::new("/nonexistent/run.json"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
