// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.


use std::path::Path;
use std::process::{Command, Output};

use lode_test_util::{ModuleSpec, TestDir, write_settings};

fn setup() -> TestDir {
    let dir = TestDir::new_empty();
    let repo = dir.mkdir("repo");
    write_settings(&dir.join("lodesettings.json"), &dir.join("cache"), &[("local", &repo)]).unwrap();
    ModuleSpec::new("acme#lib;1.0.0").jar().publish(&repo).unwrap();
    dir
}

fn lode(dir: &TestDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lode"))
        .current_dir(dir.as_ref())
        .env("LODE_HOME", dir.join("home"))
        .env_remove("RUST_LOG")
        .env_remove("LODE_OFFLINE")
        .env_remove("LODE_ERROR_POPUP")
        .args(args)
        .output()
        .unwrap()
}

fn settings_flag(dir: &TestDir) -> String {
    dir.join("lodesettings.json").display().to_string()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn write_project(dir: &TestDir, name: &str, spec: ModuleSpec) -> std::path::PathBuf {
    let location = dir.mkdir(name);
    spec.write_project(&location).unwrap();
    location
}

#[test]
fn resolve_and_retrieve() {
    let dir = setup();
    let app = write_project(&dir, "app", ModuleSpec::new("acme#app;0.1.0").dep("acme#lib", "1.0.0"));
    let settings = settings_flag(&dir);
    let out = lode(
        &dir,
        &["resolve", "app", "--settings", &settings, "--retrieve", "lib/[artifact].[ext]"],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("Resolved lode.json[*] in app"), "{text}");
    assert!(text.contains("acme#lib;1.0.0"), "{text}");
    assert!(text.contains("1 file(s) retrieved"), "{text}");
    assert!(Path::new(&app).join("lib/lib.jar").is_file());
}

#[test]
fn failures_are_reported() {
    let dir = setup();
    write_project(&dir, "app", ModuleSpec::new("acme#app;0.1.0").dep("acme#nowhere", "1.0.0"));
    write_project(&dir, "ok", ModuleSpec::new("acme#ok;0.1.0").dep("acme#lib", "1.0.0"));
    let settings = settings_flag(&dir);

    let out = lode(&dir, &["resolve", "app", "ok", "--settings", &settings]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("acme#nowhere;1.0.0"), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("Failed lode.json[*] in app"), "{text}");
    assert!(text.contains("Resolved lode.json[*] in ok"), "{text}");

    let out = lode(&dir, &["resolve", "app", "--settings", &settings, "--force-fail"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Some projects fail to be resolved"), "{}", stderr(&out));
}

#[test]
fn missing_settings() {
    let dir = setup();
    write_project(&dir, "app", ModuleSpec::new("acme#app;0.1.0"));
    let out = lode(&dir, &["resolve", "app", "--settings", "nope.json"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Settings file not found"), "{}", stderr(&out));
}

#[test]
fn workspace_projects_resolve_each_other() {
    let dir = setup();
    write_project(&dir, "core", ModuleSpec::new("acme#core;2.0.0").jar());
    write_project(&dir, "app", ModuleSpec::new("acme#app;0.1.0").dep("acme#core", "2.0.0"));
    let settings = settings_flag(&dir);

    let out = lode(&dir, &["resolve", "app", "--settings", &settings]);
    assert_eq!(out.status.code(), Some(1));

    let out = lode(&dir, &["resolve", "app", "core", "--in-workspace", "--settings", &settings]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("acme#core;2.0.0"), "{}", stdout(&out));
}
