use std::collections::BTreeSet;
use std::fs::{self, File};

use anyhow::Result;
use everywhere_cli::api::ApiClient;
use everywhere_cli::archive::{ArchiveFormat, UploadSource};
use everywhere_cli::cli::{Command, FilesCommand, UploadArgs};
use everywhere_cli::config::Config;
use everywhere_cli::ui;
use httpmock::prelude::*;
use serde_json::json;
use walkdir::WalkDir;
use zip::ZipArchive;

fn project_tree() -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join("pkg/sub"))?;
    fs::write(dir.path().join("main.py"), "import pkg\n")?;
    fs::write(dir.path().join("pkg/__init__.py"), "")?;
    fs::write(dir.path().join("pkg/sub/util.py"), "def f():\n    return 1\n")?;
    Ok(dir)
}

#[test]
fn packed_directory_lists_back_the_walked_files() -> Result<()> {
    let project = project_tree()?;
    let source = UploadSource::prepare(project.path())?;
    assert_eq!(source.format(), ArchiveFormat::Zip);

    let walked: BTreeSet<String> = WalkDir::new(project.path())
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(project.path())
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    let archive = ZipArchive::new(File::open(source.path())?)?;
    let zipped: BTreeSet<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();

    assert_eq!(walked, zipped);
    Ok(())
}

#[test]
fn upload_command_sends_packed_archive() -> Result<()> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/sandbox/mybox/upload")
            .header("authorization", "Bearer abc123")
            .body_includes("name=\"archive\"; filename=\"everywhere-upload-")
            .body_includes("name=\"path\"\r\n\r\n/app")
            .body_includes("name=\"format\"\r\n\r\nzip");
        then.status(200)
            .json_body(json!({"msg": "uploaded", "data": null}));
    });

    let scratch = tempfile::tempdir()?;
    let mut config = Config::load_from(scratch.path().join("config.json"), server.base_url())?;
    config.set_credentials("abc123", "a@b.com")?;
    let project = project_tree()?;

    let command = Command::Files(FilesCommand::Upload(UploadArgs {
        sandbox: "mybox".into(),
        input: project.path().to_path_buf(),
        target: "/app".into(),
        format: None,
    }));
    let mut out = Vec::new();
    ui::dispatch(command, &mut config, &mut out)?;
    mock.assert();

    let printed = String::from_utf8(out)?;
    assert!(printed.contains("to mybox:/app as zip"));
    assert!(printed.contains("Archive uploaded and extracted successfully"));
    Ok(())
}

#[test]
fn explicit_format_overrides_detection() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/sandbox/mybox/upload")
            .body_includes("name=\"format\"\r\n\r\ntar.gz");
        then.status(200).json_body(json!({"msg": "ok", "data": null}));
    });
    let client = ApiClient::new(server.base_url(), Some("abc123".into()))?;
    let project = project_tree()?;

    let args = UploadArgs {
        sandbox: "mybox".into(),
        input: project.path().join("main.py"),
        target: "/".into(),
        format: Some("tar.gz".into()),
    };
    let mut out = Vec::new();
    ui::upload(&client, &args, &mut out)?;
    assert!(String::from_utf8(out)?.contains("as tar.gz"));
    Ok(())
}
