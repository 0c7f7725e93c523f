//! Filesystem-backed image-folder dataset.
//!
//! Layout: `<dir>/<split>/<class>/<image>`. Class directories are sorted by
//! name to assign label indices. When `<dir>/<split>` is absent the root
//! itself is treated as the split directory.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::common::error::{EvalError, EvalResult};

use super::domain::{Dataset, RawImage};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Clone, Debug)]
struct ImageSample {
    path: PathBuf,
    label: usize,
}

/// Lazily decoded image-folder dataset.
#[derive(Debug)]
pub struct ImageFolderDataset {
    name: String,
    root: PathBuf,
    class_names: Vec<String>,
    samples: Vec<ImageSample>,
}

impl ImageFolderDataset {
    pub fn open(name: &str, dir: &Path, split: &str) -> EvalResult<Self> {
        if !dir.is_dir() {
            return Err(EvalError::Dataset(format!(
                "dataset directory {} does not exist",
                dir.display()
            )));
        }
        let split_dir = dir.join(split);
        let root = if split_dir.is_dir() {
            split_dir
        } else {
            dir.to_path_buf()
        };
        info!(dataset = name, root = %root.display(), "loading dataset");

        let mut class_names = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(class) = entry.file_name().to_str() {
                    class_names.push(class.to_string());
                }
            }
        }
        class_names.sort();

        let mut samples = Vec::new();
        for (label, class) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root.join(class))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| is_image(p))
                .collect();
            paths.sort();
            debug!(class = %class, label, count = paths.len(), "class loaded");
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        info!(
            classes = class_names.len(),
            samples = samples.len(),
            "dataset ready"
        );
        Ok(Self {
            name: name.to_string(),
            root,
            class_names,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl Dataset for ImageFolderDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    fn label(&self, index: usize) -> usize {
        self.samples[index].label
    }

    fn load_image(&self, index: usize) -> EvalResult<RawImage> {
        let path = &self.samples[index].path;
        let decoded = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| EvalError::Image {
                path: path.clone(),
                source,
            })?;
        Ok(decoded.to_rgb8())
    }
}
