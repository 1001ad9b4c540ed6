use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use std::process::Command as StdCommand;
use tempfile::TempDir;

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("forktools").unwrap();
    cmd.current_dir(dir)
        .env("NO_COLOR", "1")
        .env("CLICOLOR", "0")
        .env_remove("FORKTOOLS_CONFIG");
    cmd
}

const LOCATIONS: &str = r#"
PROTOBUF_VERSION = "26.1"

REPOSITORY_LOCATIONS_SPEC = dict(
    bazel_compdb = dict(
        project_name = "bazel-compilation-database",
        use_category = ["build"],
    ),
    com_google_protobuf = dict(
        project_name = "Protocol Buffers",
        version = PROTOBUF_VERSION,
        urls = ["https://github.com/protocolbuffers/protobuf/releases/download/v{version}/protobuf-{version}.tar.gz"],
        use_category = ["dataplane_core", "controlplane"],
    ),
    com_github_luajit_luajit = dict(
        project_name = "LuaJIT",
        use_category = ["dataplane_ext"],
        extensions = ["envoy.filters.http.lua"],
    ),
)
"#;

fn envoy_tree(lua_enabled: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("bazel")).unwrap();
    fs::create_dir_all(root.join("source/extensions")).unwrap();
    fs::create_dir_all(root.join("contrib")).unwrap();

    fs::write(root.join("bazel/repository_locations.bzl"), LOCATIONS).unwrap();
    let lua = if lua_enabled {
        "    \"envoy.filters.http.lua\": \"//source/extensions/filters/http/lua:config\",\n"
    } else {
        ""
    };
    fs::write(
        root.join("source/extensions/extensions_build_config.bzl"),
        format!(
            "EXTENSIONS = {{\n    \"envoy.filters.http.router\": \"//source/extensions/filters/http/router:config\",\n{}}}\n",
            lua
        ),
    )
    .unwrap();
    fs::write(
        root.join("contrib/contrib_build_config.bzl"),
        "CONTRIB_EXTENSIONS = {\n}\n",
    )
    .unwrap();
    dir
}

#[test]
fn prune_deps_writes_trimmed_manifest() {
    let tree = envoy_tree(false);

    cmd(tree.path())
        .args(["prune-deps", "-o", "out.bzl"])
        .assert()
        .success()
        .stdout(contains("Original Size"))
        .stdout(contains("Wrote out.bzl"));

    let out = fs::read_to_string(tree.path().join("out.bzl")).unwrap();
    assert!(out.starts_with("PROTOBUF_VERSION = \"26.1\"\n\nREPOSITORY_LOCATIONS_SPEC = dict(\n"));
    assert!(out.contains("    com_google_protobuf = dict(\n"));
    assert!(out.contains("protobuf-26.1.tar.gz"));
    assert!(!out.contains("bazel_compdb"));
    assert!(!out.contains("luajit"));
}

#[test]
fn prune_deps_default_output_name() {
    let tree = envoy_tree(true);

    cmd(tree.path()).arg("prune-deps").assert().success();

    let out = fs::read_to_string(tree.path().join("repository_locations_envoy_1_29_4.bzl")).unwrap();
    assert!(out.contains("com_github_luajit_luajit"));
}

#[test]
fn prune_deps_check_reports_up_to_date_after_write() {
    let tree = envoy_tree(false);

    cmd(tree.path())
        .args(["prune-deps", "-o", "out.bzl"])
        .assert()
        .success();
    let written = fs::read_to_string(tree.path().join("out.bzl")).unwrap();

    cmd(tree.path())
        .args(["prune-deps", "-o", "out.bzl", "--check"])
        .assert()
        .success()
        .stdout(contains("is up to date"));

    fs::write(tree.path().join("out.bzl"), "stale\n").unwrap();
    cmd(tree.path())
        .args(["prune-deps", "-o", "out.bzl", "--check"])
        .assert()
        .success()
        .stdout(contains("-stale"))
        .stdout(contains("+REPOSITORY_LOCATIONS_SPEC = dict("));

    assert_eq!(fs::read_to_string(tree.path().join("out.bzl")).unwrap(), "stale\n");
    assert!(written.contains("com_google_protobuf"));
}

#[test]
fn prune_deps_uses_config_file() {
    let tree = envoy_tree(false);
    fs::write(
        tree.path().join("forktools.toml"),
        "[deps]\nenvoy_version = \"1_30_0\"\n",
    )
    .unwrap();

    cmd(tree.path()).arg("prune-deps").assert().success();

    assert!(tree
        .path()
        .join("repository_locations_envoy_1_30_0.bzl")
        .exists());
}

#[test]
fn prune_deps_missing_manifest_fails() {
    let dir = TempDir::new().unwrap();

    cmd(dir.path())
        .arg("prune-deps")
        .assert()
        .failure()
        .stderr(contains("repository_locations.bzl"));
}

#[test]
fn log_to_css_generates_html() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("scp.log"),
        "10:00 ul_id: N1 start\n10:01 ul_id: N2\n10:02 other\n10:03 ul_id: N3 done\n",
    )
    .unwrap();
    fs::write(dir.path().join("flow.svg"), "<svg><g id=\"N1\"/></svg>").unwrap();

    cmd(dir.path())
        .args(["log-to-css", "--logfile", "scp.log", "--svg", "flow.svg", "out.html"])
        .assert()
        .success()
        .stdout(contains("Done."));

    let html = fs::read_to_string(dir.path().join("out.html")).unwrap();
    assert!(html.contains("#N1 rect {"));
    assert!(html.contains("#N1---N2 path {"));
    assert!(html.contains("#N2---N3 text {"));
    assert!(!html.contains("N1---N3"));
    assert!(html.ends_with("<body><svg><g id=\"N1\"/></svg></body>\n</html>"));
}

#[test]
fn log_to_css_requires_svg() {
    let dir = TempDir::new().unwrap();

    cmd(dir.path())
        .args(["log-to-css", "--logfile", "scp.log", "out.html"])
        .assert()
        .failure()
        .stderr(contains("--svg"));
}

#[test]
fn changelog_top_requires_bottom() {
    let dir = TempDir::new().unwrap();

    cmd(dir.path())
        .args(["changelog", "--top", "envoy-v1.29.4-3"])
        .assert()
        .failure()
        .stderr(contains("--bottom"));
}

fn git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(["-c", "user.name=Dev", "-c", "user.email=dev@example.com"])
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_MERGE_AUTOEDIT", "no")
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn commit(dir: &Path, name: &str, subject: &str) {
    fs::write(dir.join(name), subject).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", subject]);
}

fn release_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    git(root, &["init", "-q"]);
    git(root, &["symbolic-ref", "HEAD", "refs/heads/release"]);

    commit(root, "README", "Initial import");
    git(root, &["tag", "envoy-v1.29.4-1"]);
    git(root, &["tag", "v1.29.4-1"]);

    git(root, &["checkout", "-q", "-b", "feature"]);
    commit(root, "tap.cc", "Add tap stats");
    git(root, &["checkout", "-q", "release"]);
    commit(root, "retry.cc", "Fix retry budget");
    git(
        root,
        &["merge", "-q", "--no-ff", "-m", "Merge branch 'feature' into release", "feature"],
    );
    git(root, &["tag", "envoy-v1.29.4-2"]);
    git(root, &["tag", "v1.29.4-2"]);

    fs::write(
        root.join("ruleset2.0-eric-envoy.yaml"),
        "properties:\n  - ENVOY_BUILDER_VERSION: \"2.7.0\"\n",
    )
    .unwrap();
    fs::write(
        root.join("Changelog-Envoy"),
        "old header 1\nold header 2\nold header 3\n\n1.29.4-1 (2.6.0) Built from \"sc_envoy\" repository (release) (commit: 0000000000)\n",
    )
    .unwrap();
    dir
}

#[test]
fn changelog_prepends_entry_for_latest_tags() {
    let repo = release_repo();

    cmd(repo.path())
        .arg("changelog")
        .assert()
        .success()
        .stdout(contains("From git logs..."))
        .stdout(contains("envoy-v1.29.4-2"))
        .stdout(contains("envoy-v1.29.4-1"))
        .stdout(contains("Changelog updated"));

    let changelog = fs::read_to_string(repo.path().join("Changelog-Envoy")).unwrap();
    let lines: Vec<&str> = changelog.lines().collect();
    assert!(lines[0].starts_with("This file contains local changes of Envoy"));
    assert_eq!(lines[3], "");
    assert!(lines[4].starts_with("1.29.4-2 (2.7.0) Built from \"sc_envoy\" repository (release)"));
    assert!(changelog.contains("Add tap stats"));
    assert!(changelog.contains("Fix retry budget"));
    assert!(!changelog.contains("Merge branch"));
    assert!(!changelog.contains("old header"));
    assert!(lines[lines.len() - 2].trim().is_empty());
    assert!(lines[lines.len() - 1].starts_with("1.29.4-1 (2.6.0)"));
}

#[test]
fn changelog_dry_run_leaves_file_alone() {
    let repo = release_repo();
    let before = fs::read_to_string(repo.path().join("Changelog-Envoy")).unwrap();

    cmd(repo.path())
        .args(["changelog", "-t", "envoy-v1.29.4-2", "-b", "envoy-v1.29.4-1", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("From Commandline Arguments..."))
        .stdout(contains("1.29.4-2 (2.7.0)"));

    let after = fs::read_to_string(repo.path().join("Changelog-Envoy")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn drcrash_without_tag_fails_with_hint() {
    let dir = TempDir::new().unwrap();

    cmd(dir.path())
        .args(["drcrash", "core", "--tag", ""])
        .assert()
        .failure()
        .stdout(contains("release branch"))
        .stderr(contains("No GIT tag found/available"));
}

#[test]
fn drcrash_modes_are_exclusive() {
    let dir = TempDir::new().unwrap();

    cmd(dir.path())
        .args(["drcrash", "core", "--stacktrace", "--debugger"])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}
