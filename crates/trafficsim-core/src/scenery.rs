//! シナリオディレクトリ
//!
//! `<name>.info`（説明文）と `<name>.xml`（シミュレータ設定）の組を
//! ファイル名の規約で1つのシナリオとして扱います。

use crate::error::{Result, SupervisorError};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const INFO_EXTENSION: &str = "info";
const XML_EXTENSION: &str = "xml";

/// シナリオの情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneryDescriptor {
    pub name: String,
    /// `.info` ファイルの内容
    pub info: String,
    pub xml_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SceneryDirectory {
    dir: PathBuf,
}

impl SceneryDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `.info` ファイルがあるシナリオ名の一覧（名前順）
    pub fn list_sceneries(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SupervisorError::SceneryDirNotFound(self.dir.clone()),
            _ => SupervisorError::Io(e),
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some(INFO_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();

        debug!(dir = %self.dir.display(), count = names.len(), "Listed sceneries");
        Ok(names)
    }

    /// `<name>.info` の内容
    pub fn get_info(&self, name: &str) -> Result<String> {
        let path = self.file_path(name, INFO_EXTENSION)?;
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SupervisorError::SceneryNotFound {
                name: name.to_string(),
                path: path.clone(),
            },
            _ => SupervisorError::Io(e),
        })
    }

    /// `<name>.xml` のパス（存在しなければエラー）
    pub fn xml_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.file_path(name, XML_EXTENSION)?;
        if !path.is_file() {
            return Err(SupervisorError::SceneryNotFound {
                name: name.to_string(),
                path,
            });
        }
        Ok(path)
    }

    pub fn descriptors(&self) -> Result<Vec<SceneryDescriptor>> {
        self.list_sceneries()?
            .into_iter()
            .map(|name| {
                let info = self.get_info(&name)?;
                let xml_path = self.file_path(&name, XML_EXTENSION)?;
                Ok(SceneryDescriptor {
                    name,
                    info,
                    xml_path,
                })
            })
            .collect()
    }

    fn file_path(&self, name: &str, extension: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, extension)))
    }
}

/// ディレクトリ外を指す名前を拒否する
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(SupervisorError::InvalidSceneryName(name.to_string()));
    }
    Ok(())
}
