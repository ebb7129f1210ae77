use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use crate::error::Result;

/// Read-only mapping of a whole model file. Owns every model byte; all
/// table views borrow from it.
#[derive(Debug)]
pub struct ModelMapping {
    mmap: memmap2::Mmap,
}

impl ModelMapping {
    /// Map `path` read-only. The descriptor is closed on return; the mapping
    /// stays valid without it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        // pre-fault first so kernels don't take soft faults mid-tape
        #[cfg(any(target_os = "windows", target_os = "linux"))]
        if let Ok(mmap) = try_mmap_populate(&file) {
            tracing::debug!("mmap: pre-faulted {} bytes of {}", mmap.len(), path.display());
            return Ok(Self { mmap });
        }

        // SAFETY: mapped read-only. Truncating the file underneath us can
        // still raise SIGBUS; every read is bounds-checked against the length
        // observed here.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        tracing::debug!("mmap: standard pages, {} bytes of {}", mmap.len(), path.display());
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Deref for ModelMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

#[cfg(any(target_os = "windows", target_os = "linux"))]
fn try_mmap_populate(file: &File) -> std::result::Result<memmap2::Mmap, std::io::Error> {
    unsafe { memmap2::MmapOptions::new().populate().map(file) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_maps_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1, 2, 3, 4, 5]).unwrap();
        tmp.flush().unwrap();

        let mapping = ModelMapping::open(tmp.path()).unwrap();
        assert_eq!(mapping.len(), 5);
        assert_eq!(&mapping[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ModelMapping::open(Path::new("/nonexistent/model.ndbn")).unwrap_err();
        assert!(matches!(err, crate::error::NodalError::Io(_)));
    }
}
