use std::{
    fmt::Debug,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use zip::{ZipArchive, result::ZipError};

use crate::{
    class::builder::minimal_runtime_classes,
    runtime::{Exception, VmResult},
};

/// Somewhere class-file bytes can be found, e.g. one class path entry.
pub trait ClassSource: Debug + Send + Sync {
    /// Bytes of the class with binary name `name`, `None` if this source does
    /// not have it.
    fn find_class(&self, name: &str) -> VmResult<Option<Vec<u8>>>;
}

/// A directory laid out by package, `pkg/Name.class`.
#[derive(Debug)]
pub struct DirectorySource {
    base_path: PathBuf,
}

impl DirectorySource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl ClassSource for DirectorySource {
    fn find_class(&self, name: &str) -> VmResult<Option<Vec<u8>>> {
        let path = self.base_path.join(format!("{name}.class"));
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}

/// A `.jar` (zip) archive.
#[derive(Debug)]
pub struct JarSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl JarSource {
    pub fn open(path: impl Into<PathBuf>) -> VmResult<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|err| io_error(&path, err))?;
        let archive = ZipArchive::new(file)
            .map_err(|err| Exception::Internal(format!("{}: {err}", path.display())))?;
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }
}

impl ClassSource for JarSource {
    fn find_class(&self, name: &str) -> VmResult<Option<Vec<u8>>> {
        let mut archive = self.archive.lock();
        let mut entry = match archive.by_name(&format!("{name}.class")) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => {
                return Err(Exception::Internal(format!(
                    "{}: {name}: {err}",
                    self.path.display()
                )));
            }
        };
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|err| io_error(&self.path, err))?;
        Ok(Some(content))
    }
}

/// Class files held in memory, keyed by binary name.
#[derive(Debug, Default)]
pub struct MemorySource {
    classes: DashMap<String, Arc<[u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloaded with the handful of `java/lang` types the core itself
    /// depends on: `Object`, `String`, `Class`, `Throwable`, `Cloneable` and
    /// `java/io/Serializable`.
    pub fn with_minimal_runtime() -> Self {
        let source = Self::new();
        for (name, bytes) in minimal_runtime_classes() {
            source.insert(name, bytes);
        }
        source
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.classes.insert(name.into(), bytes.into());
    }

    pub fn with_class(self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ClassSource for MemorySource {
    fn find_class(&self, name: &str) -> VmResult<Option<Vec<u8>>> {
        Ok(self.classes.get(name).map(|bytes| bytes.to_vec()))
    }
}

fn io_error(path: &Path, err: io::Error) -> Exception {
    Exception::Internal(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::class::builder::ClassBuilder;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("jvm-core-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_directory_source() {
        let dir = scratch_dir("dir");
        fs::create_dir_all(dir.join("pkg")).unwrap();
        let bytes = ClassBuilder::new("pkg/Base").build();
        fs::write(dir.join("pkg/Base.class"), &bytes).unwrap();

        let source = DirectorySource::new(&dir);
        assert_eq!(source.find_class("pkg/Base").unwrap(), Some(bytes));
        assert_eq!(source.find_class("pkg/Missing").unwrap(), None);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_jar_source() {
        let dir = scratch_dir("jar");
        let jar_path = dir.join("classes.jar");
        let bytes = ClassBuilder::new("pkg/Base").build();
        {
            let mut writer = zip::ZipWriter::new(File::create(&jar_path).unwrap());
            writer
                .start_file("pkg/Base.class", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(&bytes).unwrap();
            writer.finish().unwrap();
        }

        let source = JarSource::open(&jar_path).unwrap();
        assert_eq!(source.find_class("pkg/Base").unwrap(), Some(bytes));
        assert_eq!(source.find_class("pkg/Missing").unwrap(), None);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::with_minimal_runtime();
        assert!(source.find_class("java/lang/Object").unwrap().is_some());
        assert!(source.find_class("pkg/Base").unwrap().is_none());
    }
}
