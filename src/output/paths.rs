use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} '{value}' is not allowed: {reason}")]
    Rejected {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Resolves project-scoped paths that always stay under the storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_path(&self, project: &str) -> Result<PathBuf, PathError> {
        validate_name(project, "Project name")?;
        Ok(self.root.join(project))
    }

    /// `<root>/<project>/exports/<filename>`
    pub fn export_path(&self, project: &str, filename: &str) -> Result<PathBuf, PathError> {
        validate_name(filename, "Filename")?;
        Ok(self.project_path(project)?.join("exports").join(filename))
    }

    /// Create the project directory with its `exports/` and `jobs/` folders.
    pub fn ensure_project_dir(&self, project: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_path(project)?;
        std::fs::create_dir_all(path.join("exports"))?;
        std::fs::create_dir_all(path.join("jobs"))?;
        Ok(path)
    }

    /// Names of non-hidden directories under the root, sorted.
    pub fn list_projects(&self) -> std::io::Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Accept only a single, plain path component.
pub fn validate_name(name: &str, field: &'static str) -> Result<(), PathError> {
    let reject = |reason| {
        Err(PathError::Rejected {
            field,
            value: name.to_string(),
            reason,
        })
    };

    if name.trim().is_empty() {
        return Err(PathError::Empty { field });
    }
    if name.contains('\0') {
        return reject("contains a null byte");
    }
    if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
        return reject("absolute paths are not permitted");
    }
    if name.contains("..") {
        return reject("path traversal is not permitted");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("path separators are not permitted");
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => reject("must be a single path component"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_export_path_layout() {
        let resolver = PathResolver::new("/data/finnhub");
        let path = resolver.export_path("stocks", "quotes.json").unwrap();
        assert_eq!(path, PathBuf::from("/data/finnhub/stocks/exports/quotes.json"));
    }

    #[test]
    fn test_rejects_traversal_and_absolute() {
        let resolver = PathResolver::new("/data");
        for bad in ["..", "../etc", "a/../b", "/etc", "\\windows", "a/b", "nul\0byte", " ", "."] {
            assert!(resolver.project_path(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(resolver.export_path("ok", "../../passwd").is_err());
    }

    #[test]
    fn test_accepts_plain_names() {
        for good in ["default", "my-project_2", "quotes.csv"] {
            assert!(validate_name(good, "Name").is_ok(), "rejected {:?}", good);
        }
    }

    #[test]
    fn test_empty_name_error() {
        assert_eq!(
            validate_name("", "Project name"),
            Err(PathError::Empty {
                field: "Project name"
            })
        );
    }

    #[test]
    fn test_ensure_and_list_projects() {
        let tmp = TempDir::new().unwrap();
        let resolver = PathResolver::new(tmp.path());
        assert!(resolver.list_projects().unwrap().is_empty());

        let path = resolver.ensure_project_dir("beta").unwrap();
        assert!(path.join("exports").is_dir());
        assert!(path.join("jobs").is_dir());
        resolver.ensure_project_dir("alpha").unwrap();
        std::fs::create_dir(tmp.path().join(".hidden")).unwrap();
        std::fs::write(tmp.path().join("file.txt"), "x").unwrap();

        assert_eq!(resolver.list_projects().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_list_projects_missing_root() {
        let resolver = PathResolver::new("/nonexistent/mcp-finnhub-test-root");
        assert!(resolver.list_projects().unwrap().is_empty());
    }
}
