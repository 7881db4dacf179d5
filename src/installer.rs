use crate::templates;
use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};

const README: &str = "\
sr-report
=========

Turns DICOM structured reports into filled documents, PDFs and DICOM objects.

Requirements on PATH (or listed in tool_search_paths):
  dsr2xml, pdf2dcm, img2dcm, storescu   DCMTK
  wkhtmltopdf                           flat (HTML/text) templates
  soffice                               docx templates (LibreOffice)
  pdftoppm                              dcm_images target (poppler)

Getting started:
  1. Edit config/report_config.json; template_path is relative to it.
  2. sr-report validate --config config/report_config.json
  3. sr-report generate study.dcm --config config/report_config.json

Targets: xml, template, pdf, dcm_pdf, dcm_images (default).
";

/// `sr-report-<version>-<os>-<arch>.tar.gz`
pub fn archive_name() -> String {
    format!(
        "sr-report-{}-{}-{}.tar.gz",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Build the bundle for `exe` inside `out_dir` and return the archive path.
pub fn create_installer(exe: &Path, out_dir: &Path) -> Result<PathBuf> {
    if !exe.is_file() {
        return Err(anyhow!("executable {} not found", exe.display()));
    }
    let exe_name = exe
        .file_name()
        .ok_or_else(|| anyhow!("executable path {} has no file name", exe.display()))?;
    let root = format!("sr-report-{}", env!("CARGO_PKG_VERSION"));

    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let archive_path = out_dir.join(archive_name());
    let tmp_path = out_dir.join(format!(".{}.tmp", archive_name()));
    let file =
        fs::File::create(&tmp_path).with_context(|| format!("create {}", tmp_path.display()))?;

    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    tar.append_path_with_name(exe, Path::new(&root).join("bin").join(exe_name))
        .with_context(|| format!("add {}", exe.display()))?;
    let entries = [
        (
            format!("{root}/config/{}", templates::REPORT_CONFIG_FILE),
            templates::REPORT_CONFIG_JSON,
        ),
        (
            format!("{root}/config/{}", templates::REPORT_TEMPLATE_FILE),
            templates::REPORT_TEMPLATE_HTML,
        ),
        (format!("{root}/README.txt"), README),
    ];
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        tar.append_data(&mut header, &name, contents.as_bytes())
            .with_context(|| format!("add {name}"))?;
    }
    tar.into_inner()
        .and_then(|gz| gz.finish())
        .with_context(|| format!("finish {}", tmp_path.display()))?;

    fs::rename(&tmp_path, &archive_path)
        .with_context(|| format!("publish {}", archive_path.display()))?;
    tracing::info!(archive = %archive_path.display(), "installer created");
    Ok(archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn bundle_contains_executable_samples_and_readme() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("sr-report");
        fs::write(&exe, b"\x7fELF fake").unwrap();
        let out = dir.path().join("dist");

        let archive = create_installer(&exe, &out).unwrap();
        assert_eq!(archive, out.join(archive_name()));

        let mut tar = tar::Archive::new(GzDecoder::new(fs::File::open(&archive).unwrap()));
        let mut found = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            if path.ends_with("report_config.json") {
                assert_eq!(contents, templates::REPORT_CONFIG_JSON);
            }
            found.push(path);
        }
        let root = format!("sr-report-{}", env!("CARGO_PKG_VERSION"));
        found.sort();
        assert_eq!(
            found,
            vec![
                format!("{root}/README.txt"),
                format!("{root}/bin/sr-report"),
                format!("{root}/config/report_config.json"),
                format!("{root}/config/report_template.html"),
            ]
        );
        assert!(fs::read_dir(&out)
            .unwrap()
            .all(|entry| !entry.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    }

    #[test]
    fn missing_executable_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_installer(&dir.path().join("absent"), dir.path()).is_err());
    }
}
