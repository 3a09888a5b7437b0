//! Integration tests for cnbridge

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn cnbridge() -> Command {
        cargo_bin_cmd!("cnbridge")
    }

    #[test]
    fn help_displays() {
        cnbridge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Cloud Native Buildpacks"));
    }

    #[test]
    fn version_displays() {
        cnbridge()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cnbridge"));
    }

    #[test]
    fn supply_requires_four_args() {
        cnbridge()
            .args(["supply", "/tmp/app", "/tmp/cache"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"));
    }

    #[test]
    fn detect_requires_the_build_dir() {
        cnbridge()
            .arg("detect")
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"));
    }

    #[test]
    fn finalize_requires_five_args() {
        cnbridge()
            .args(["finalize", "/tmp/app", "/tmp/cache", "/tmp/deps", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"));
    }

    #[test]
    fn release_before_finalize_fails() {
        let temp = TempDir::new().unwrap();

        cnbridge()
            .args(["release", temp.path().to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("finalize must run before release"));
    }

    #[test]
    fn release_emits_process_types() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        std::fs::create_dir_all(app.join(".cloudfoundry")).unwrap();
        std::fs::write(
            app.join(".cloudfoundry/metadata.toml"),
            "[[processes]]\ntype = \"web\"\ncommand = \"npm start\"\n",
        )
        .unwrap();

        cnbridge()
            .args(["release", app.to_str().unwrap()])
            .assert()
            .success()
            .stdout("default_process_types:\n  web: npm start\n");

        assert!(!app.join(".cloudfoundry/metadata.toml").exists());
    }

    #[test]
    fn supply_reports_missing_buildpack_declaration() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        let deps = temp.path().join("deps");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::create_dir_all(deps.join("0")).unwrap();

        // An empty buildpack dir has no buildpack.toml to validate
        cnbridge()
            .env("BUILDPACK_DIR", temp.path().join("buildpack"))
            .env("SHIM_V3_ROOT", temp.path().join("v3"))
            .args([
                "supply",
                app.to_str().unwrap(),
                temp.path().join("cache").to_str().unwrap(),
                deps.to_str().unwrap(),
                "0",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("buildpack.toml"));
    }
}
