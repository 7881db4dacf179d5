//! Shared test infrastructure for integration tests.
//!
//! `Workspace` lays out a structured report, a configuration file and a
//! directory of fake collaborators that behave like the real converters
//! closely enough for the pipeline: each writes the file it was asked for.
#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MARKUP: &str = r#"<?xml version="1.0"?>
<report>
  <patient><name><last>Doe</last><first>Jane</first></name><id>P-100</id></patient>
  <text><concept><meaning>Finding</meaning></concept><value>Small nodule</value></text>
  <text><concept><meaning>Finding</meaning></concept><value>No effusion</value></text>
</report>
"#;

const FAKE_DSR2XML: &str = r#"for last; do :; done
cat > "$last" <<'XML'
__MARKUP__XML"#;

const FAKE_WKHTMLTOPDF: &str = r#"for arg; do src=$out; out=$arg; done
{ printf '%%PDF-1.4\n'; cat "$src"; } > "$out""#;

const FAKE_PDFTOPPM: &str = r#"for last; do :; done
printf 'jpeg one' > "$last-1.jpg"
printf 'jpeg two' > "$last-2.jpg""#;

const FAKE_DCM_WRITER: &str = r#"for last; do :; done
echo "DICM $*" > "$last""#;

const FAKE_STORESCU: &str = r#"echo "$*" >> "$FAKE_STORE_LOG""#;

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join("bin")).expect("create bin dir");
        fs::write(dir.path().join("study.dcm"), b"DICM structured report")
            .expect("write input");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input(&self) -> PathBuf {
        self.path().join("study.dcm")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.path().join("bin")
    }

    pub fn store_log(&self) -> PathBuf {
        self.path().join("store.log")
    }

    /// Install every fake collaborator into `bin/`.
    #[cfg(unix)]
    pub fn install_fake_tools(&self) {
        self.script("dsr2xml", &FAKE_DSR2XML.replace("__MARKUP__", MARKUP));
        self.script("wkhtmltopdf", FAKE_WKHTMLTOPDF);
        self.script("pdftoppm", FAKE_PDFTOPPM);
        self.script("pdf2dcm", FAKE_DCM_WRITER);
        self.script("img2dcm", FAKE_DCM_WRITER);
        self.script("storescu", FAKE_STORESCU);
    }

    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = self.bin_dir().join(name);
        fs::write(&path, format!("#!/bin/sh\nset -e\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }

    pub fn write_template(&self, body: &str) -> PathBuf {
        let path = self.path().join("template.html");
        fs::write(&path, body).expect("write template");
        path
    }

    /// Configuration using the fake tools, a relative template path and
    /// two rules over `MARKUP`.
    pub fn base_config(&self) -> Value {
        json!({
            "template_path": "template.html",
            "output_dir": self.out_dir(),
            "tool_search_paths": [self.bin_dir()],
            "rules": [
                {
                    "name": "$NAME$",
                    "concat_string": ", ",
                    "expressions": [
                        "string(/report/patient/name/last)",
                        "string(/report/patient/name/first)"
                    ]
                },
                {
                    "name": "$FINDINGS$",
                    "concat_string": "; ",
                    "expressions": ["//text[concept/meaning='Finding']/value/text()"]
                }
            ]
        })
    }

    pub fn write_config(&self, config: &Value) -> PathBuf {
        let path = self.path().join("config.json");
        fs::write(&path, serde_json::to_vec_pretty(config).expect("encode config"))
            .expect("write config");
        path
    }

    pub fn output_files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.out_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|entry| {
                entry
                    .expect("read dir entry")
                    .file_name()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }
}

pub fn sr_report() -> Command {
    let mut cmd = Command::cargo_bin("sr-report").expect("locate sr-report binary");
    cmd.env_remove("RUST_LOG");
    cmd
}
