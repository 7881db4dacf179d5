mod common;

use common::{sr_report, Workspace, MARKUP};
use serde_json::json;
use std::fs;

#[test]
fn dump_config_writes_samples_and_refuses_to_overwrite() {
    let workspace = Workspace::new();
    let out = workspace.path().join("samples");

    sr_report()
        .args(["dump-config", "--out-dir"])
        .arg(&out)
        .assert()
        .success();
    assert!(out.join("report_config.json").is_file());
    assert!(out.join("report_template.html").is_file());

    let assert = sr_report()
        .args(["dump-config", "--out-dir"])
        .arg(&out)
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("--force"), "{stderr}");

    sr_report()
        .args(["dump-config", "--force", "--out-dir"])
        .arg(&out)
        .assert()
        .success();

    sr_report()
        .arg("validate")
        .arg("--config")
        .arg(out.join("report_config.json"))
        .assert()
        .success();
}

#[test]
fn validate_lists_every_problem_and_fails() {
    let workspace = Workspace::new();
    let config = workspace.write_config(&json!({
        "template_path": "template.html",
        "rules": [
            {"name": "$A$", "concat_string": "", "expressions": ["//a"]},
            {"name": "$B$", "concat_string": " ", "expressions": []},
            {"name": "$C$", "concat_string": " ", "expressions": ["//c"]}
        ]
    }));
    let assert = sr_report()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("rule 1: concat_string is required"), "{stdout}");
    assert!(stdout.contains("rule 2: expressions"), "{stdout}");
    assert!(!stdout.contains("rule 3"), "{stdout}");
}

#[test]
fn generate_rejects_invalid_configuration_before_running_tools() {
    let workspace = Workspace::new();
    workspace.write_template("$NAME$");
    let mut config = workspace.base_config();
    config["rules"][0]["name"] = json!("");
    let config = workspace.write_config(&config);
    sr_report()
        .arg("generate")
        .arg(workspace.input())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
    assert!(workspace.output_files().is_empty());
}

#[test]
fn create_installer_writes_archive() {
    let workspace = Workspace::new();
    let out = workspace.path().join("dist");
    sr_report()
        .args(["create-installer", "--out-dir"])
        .arg(&out)
        .assert()
        .success();
    let archives: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(archives.len(), 1);
    assert!(archives[0].starts_with("sr-report-"));
    assert!(archives[0].ends_with(".tar.gz"));
}

#[cfg(unix)]
mod end_to_end {
    use super::*;

    #[test]
    fn template_target_fills_flat_template() {
        let workspace = Workspace::new();
        workspace.install_fake_tools();
        workspace.write_template("<p>$NAME$</p><p>$FINDINGS$</p>");
        let mut config = workspace.base_config();
        config["target"] = json!("template");
        let config = workspace.write_config(&config);

        sr_report()
            .arg("generate")
            .arg(workspace.input())
            .arg("--config")
            .arg(&config)
            .assert()
            .success();
        assert_eq!(workspace.output_files(), vec!["study.html"]);
        let filled = fs::read_to_string(workspace.out_dir().join("study.html")).unwrap();
        assert_eq!(filled, "<p>Doe, Jane</p><p>Small nodule; No effusion</p>");
        assert!(MARKUP.contains("Small nodule"));
    }

    #[test]
    fn target_override_stops_at_pdf() {
        let workspace = Workspace::new();
        workspace.install_fake_tools();
        workspace.write_template("<p>$NAME$</p>");
        let config = workspace.write_config(&workspace.base_config());

        sr_report()
            .arg("generate")
            .arg(workspace.input())
            .arg("--config")
            .arg(&config)
            .args(["--target", "pdf"])
            .assert()
            .success();
        assert_eq!(workspace.output_files(), vec!["study.pdf"]);
        let pdf = fs::read_to_string(workspace.out_dir().join("study.pdf")).unwrap();
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.contains("Doe, Jane"));
    }

    #[test]
    fn dcm_images_publishes_pages_and_transmits_them() {
        let workspace = Workspace::new();
        workspace.install_fake_tools();
        workspace.write_template("<p>$NAME$</p>");
        let mut config = workspace.base_config();
        config["output_file_name"] = json!("report");
        config["dcm_send_ip"] = json!("127.0.0.1");
        config["dcm_send_port"] = json!(11112);
        let config = workspace.write_config(&config);

        sr_report()
            .arg("generate")
            .arg(workspace.input())
            .arg("--config")
            .arg(&config)
            .env("FAKE_STORE_LOG", workspace.store_log())
            .assert()
            .success();
        assert_eq!(
            workspace.output_files(),
            vec!["report_001.dcm", "report_002.dcm"]
        );
        let first = fs::read_to_string(workspace.out_dir().join("report_001.dcm")).unwrap();
        assert!(first.contains("InstanceNumber=1"), "{first}");
        let log = fs::read_to_string(workspace.store_log()).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().all(|line| line.starts_with("127.0.0.1 11112 ")));
    }

    #[test]
    fn failing_transmission_leaves_output_dir_empty() {
        let workspace = Workspace::new();
        workspace.install_fake_tools();
        workspace.script("storescu", "echo 'association rejected' >&2; exit 1");
        workspace.write_template("<p>$NAME$</p>");
        let mut config = workspace.base_config();
        config["dcm_send_ip"] = json!("127.0.0.1");
        let config = workspace.write_config(&config);

        let assert = sr_report()
            .arg("generate")
            .arg(workspace.input())
            .arg("--config")
            .arg(&config)
            .assert()
            .failure();
        let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
        assert!(stderr.contains("association rejected"), "{stderr}");
        assert!(workspace.output_files().is_empty());
    }
}
