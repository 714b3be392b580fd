//! Directory of named datasets, one file each

use crate::reader::{ReadOptions, Reader};
use crate::schema::{validate_name, Model};
use crate::writer::{WriteOptions, Writer};
use crate::{Result, TupleError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File extension of dataset files
pub const DATASET_EXTENSION: &str = "tpl";

/// Named datasets stored under one directory
pub struct DatasetDirectory {
    root: PathBuf,
    write_options: WriteOptions,
    read_options: ReadOptions,
    datasets: RwLock<HashMap<String, PathBuf>>,
}

impl DatasetDirectory {
    /// Open (creating if needed) a dataset directory with default options
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(root, WriteOptions::default(), ReadOptions::default())
    }

    /// Open a dataset directory with explicit writer and reader options
    pub fn with_options(
        root: impl AsRef<Path>,
        write_options: WriteOptions,
        read_options: ReadOptions,
    ) -> Result<Self> {
        write_options.validate()?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let directory = Self {
            root,
            write_options,
            read_options,
            datasets: RwLock::new(HashMap::new()),
        };
        directory.load_datasets()?;
        Ok(directory)
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start writing a new dataset
    pub fn create_dataset(&self, name: &str, model: Model) -> Result<Writer<BufWriter<File>>> {
        check_dataset_name(name)?;
        let mut datasets = self.datasets.write();
        if datasets.contains_key(name) {
            return Err(TupleError::Config(format!("Dataset {} already exists", name)));
        }

        let path = self.dataset_path(name);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let writer = Writer::create(model, BufWriter::new(file), self.write_options.clone())?;
        datasets.insert(name.to_string(), path);

        info!("Created dataset: {}", name);
        Ok(writer)
    }

    /// Open a closed dataset for reading
    pub fn open_dataset(&self, name: &str) -> Result<Reader> {
        let path = self
            .datasets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TupleError::Config(format!("Dataset {} not found", name)))?;
        Reader::open_path(path, self.read_options.clone())
    }

    /// Names of all datasets, sorted
    pub fn list_datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete a dataset and its file
    pub fn drop_dataset(&self, name: &str) -> Result<()> {
        let path = self
            .datasets
            .write()
            .remove(name)
            .ok_or_else(|| TupleError::Config(format!("Dataset {} not found", name)))?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        info!("Dropped dataset: {}", name);
        Ok(())
    }

    fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, DATASET_EXTENSION))
    }

    fn load_datasets(&self) -> Result<()> {
        let mut datasets = self.datasets.write();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(DATASET_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!("Skipping dataset file with non UTF-8 name: {}", path.display());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            datasets.insert(name, path);
        }
        if !datasets.is_empty() {
            info!("Loaded {} datasets from {}", datasets.len(), self.root.display());
        }
        Ok(())
    }
}

fn check_dataset_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(TupleError::Config(format!("Invalid dataset name: {}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entry, FieldSelection, PrimitiveKind, Value};
    use tempfile::TempDir;

    fn model() -> Model {
        Model::builder()
            .scalar("id", PrimitiveKind::UInt32)
            .field("name", crate::Field::Text)
            .build()
            .unwrap()
    }

    #[test]
    fn test_dataset_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = DatasetDirectory::open(temp_dir.path()).unwrap();

        let mut writer = dir.create_dataset("people", model()).unwrap();
        for (i, name) in ["ada", "grace"].iter().enumerate() {
            writer
                .fill(&Entry::new().with("id", i as u32).with("name", *name))
                .unwrap();
        }
        writer.close().unwrap();
        drop(writer);

        assert!(dir.create_dataset("people", model()).is_err());
        assert_eq!(dir.list_datasets(), vec!["people".to_string()]);

        let reader = dir.open_dataset("people").unwrap();
        assert_eq!(reader.row_count(), 2);
        let entry = reader.get_entry(1, &FieldSelection::All).unwrap();
        assert_eq!(entry.get("name"), Some(&Value::text("grace")));

        // reopening the directory finds the file again
        let reopened = DatasetDirectory::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.list_datasets(), vec!["people".to_string()]);

        reopened.drop_dataset("people").unwrap();
        assert!(reopened.list_datasets().is_empty());
        assert!(reopened.open_dataset("people").is_err());
        assert!(reopened.drop_dataset("people").is_err());
    }

    #[test]
    fn test_invalid_dataset_names() {
        let temp_dir = TempDir::new().unwrap();
        let dir = DatasetDirectory::open(temp_dir.path()).unwrap();
        assert!(dir.create_dataset("../escape", model()).is_err());
        assert!(dir.create_dataset("", model()).is_err());
        assert!(dir.create_dataset(".hidden", model()).is_err());
    }
}
