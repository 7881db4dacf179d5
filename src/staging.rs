use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A finished file in the working directory and where it should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub source: PathBuf,
    pub dest: PathBuf,
}

pub fn publish_artifacts(artifacts: &[Artifact], backup_root: &Path) -> Result<Vec<PathBuf>> {
    let mut published = Vec::new();
    let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut created: Vec<PathBuf> = Vec::new();
    for (idx, artifact) in artifacts.iter().enumerate() {
        let dest = &artifact.dest;
        if dest.exists() {
            let file_name = dest
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "artifact".to_string());
            let backup = backup_root.join(format!("{idx}-{file_name}"));
            fs::create_dir_all(backup_root)
                .with_context(|| format!("create {}", backup_root.display()))?;
            if let Err(err) = fs::rename(dest, &backup)
                .or_else(|_| fs::copy(dest, &backup).map(|_| ()))
                .with_context(|| format!("backup {}", dest.display()))
            {
                rollback_publish(&published, &backups, &created);
                return Err(err);
            }
            backups.push((dest.clone(), backup));
        } else {
            created.push(dest.clone());
        }

        if let Err(err) = publish_file(&artifact.source, dest) {
            rollback_publish(&published, &backups, &created);
            return Err(err);
        }
        tracing::debug!(source = %artifact.source.display(), dest = %dest.display(), "published");
        published.push(dest.clone());
    }
    Ok(published)
}

fn publish_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::copy(source, &tmp_path).with_context(|| format!("publish {}", dest.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

fn rollback_publish(published: &[PathBuf], backups: &[(PathBuf, PathBuf)], created: &[PathBuf]) {
    for path in published.iter().chain(created) {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }
    for (dest, backup) in backups {
        if let Some(parent) = dest.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::rename(backup, dest).or_else(|_| fs::copy(backup, dest).map(|_| ()));
    }
    tracing::warn!(rolled_back = published.len(), "artifact publish rolled back");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_into_nested_output_dir() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let source = work.path().join("report.pdf");
        fs::write(&source, b"%PDF").unwrap();
        let dest = out.path().join("a").join("report.pdf");
        let published = publish_artifacts(
            &[Artifact {
                source: source.clone(),
                dest: dest.clone(),
            }],
            &work.path().join("backup"),
        )
        .unwrap();
        assert_eq!(published, vec![dest.clone()]);
        assert_eq!(fs::read(&dest).unwrap(), b"%PDF");
        assert!(source.exists());
    }

    #[test]
    fn failure_rolls_back_and_restores_replaced_files() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first_source = work.path().join("one.dcm");
        fs::write(&first_source, b"new").unwrap();
        let first_dest = out.path().join("one.dcm");
        fs::write(&first_dest, b"old").unwrap();
        let second_dest = out.path().join("two.dcm");

        let result = publish_artifacts(
            &[
                Artifact {
                    source: first_source,
                    dest: first_dest.clone(),
                },
                Artifact {
                    source: work.path().join("missing.dcm"),
                    dest: second_dest.clone(),
                },
            ],
            &work.path().join("backup"),
        );
        assert!(result.is_err());
        assert_eq!(fs::read(&first_dest).unwrap(), b"old");
        assert!(!second_dest.exists());
    }
}
