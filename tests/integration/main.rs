//! Integration tests for Stowaway

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn stowaway() -> Command {
        cargo_bin_cmd!("stowaway")
    }

    #[test]
    fn help_displays() {
        stowaway()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Rule-based build cache"));
    }

    #[test]
    fn version_displays() {
        stowaway()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stowaway"));
    }

    #[test]
    fn completions_generate() {
        stowaway()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stowaway"));
    }

    #[test]
    fn store_requires_bucket() {
        stowaway()
            .env_remove("STOWAWAY_BUCKET")
            .args(["store", "key", "path"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--bucket"));
    }
}

mod cache_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A project directory plus an isolated store and config
    struct Sandbox {
        root: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("project")).unwrap();
            Self { root }
        }

        fn project(&self) -> PathBuf {
            self.root.path().join("project")
        }

        fn store_root(&self) -> PathBuf {
            self.root.path().join("store")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("stowaway");
            cmd.current_dir(self.project())
                .env("STOWAWAY_STORE_ROOT", self.store_root())
                .env("STOWAWAY_CONFIG", self.root.path().join("config.toml"))
                .env_remove("STOWAWAY_BUCKET")
                .env_remove("RUST_LOG");
            cmd
        }

        fn object(&self, key: &str) -> PathBuf {
            self.store_root().join("ci").join(format!("{}.tar.gz", key))
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[cfg(unix)]
    fn fixture(project: &Path) {
        write(&project.join("tmp/foo/hoge.txt"), "This is foo!");
        fs::create_dir_all(project.join("tmp/foo/bar/baz")).unwrap();
        std::os::unix::fs::symlink("../../hoge.txt", project.join("tmp/foo/bar/baz/link")).unwrap();
        fs::create_dir_all(project.join("tmp/abc/def/ghe")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn store_then_restore_round_trip() {
        let sandbox = Sandbox::new();
        let project = sandbox.project();
        fixture(&project);

        sandbox
            .cmd()
            .args(["store", "fixture-v1", "tmp/foo", "tmp/abc/def", "--bucket", "ci"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Stored cache fixture-v1"));
        assert!(sandbox.object("fixture-v1").is_file());

        sandbox
            .cmd()
            .args(["store", "fixture-v1", "tmp/foo", "--bucket", "ci"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cache already exists"));

        fs::remove_dir_all(project.join("tmp")).unwrap();

        sandbox
            .cmd()
            .args(["restore", "fixture-v2", "fixture-", "--bucket", "ci"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fixture-v1.tar.gz"));

        assert_eq!(
            fs::read_to_string(project.join("tmp/foo/hoge.txt")).unwrap(),
            "This is foo!"
        );
        assert_eq!(
            fs::read_link(project.join("tmp/foo/bar/baz/link")).unwrap(),
            PathBuf::from("../../hoge.txt")
        );
        let ghe = project.join("tmp/abc/def/ghe");
        assert!(ghe.is_dir());
        assert_eq!(fs::read_dir(ghe).unwrap().count(), 0);
    }

    #[test]
    fn restore_miss_succeeds() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["restore", "absent-key", "--bucket", "ci"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache found"));
    }

    #[test]
    fn checksum_key_is_resolved_from_working_directory() {
        let sandbox = Sandbox::new();
        let project = sandbox.project();
        write(&project.join("Cargo.lock"), "This is foo!");
        write(&project.join("target/out.txt"), "built");

        sandbox
            .cmd()
            .args(["key", r#"deps-{{ checksum "Cargo.lock" }}"#])
            .assert()
            .success()
            .stdout("deps-da610129b94e1b3da45836e40e8e78ec\n");

        sandbox
            .cmd()
            .args(["store", r#"deps-{{ checksum "Cargo.lock" }}"#, "target", "--bucket", "ci"])
            .assert()
            .success();
        assert!(sandbox.object("deps-da610129b94e1b3da45836e40e8e78ec").is_file());

        sandbox
            .cmd()
            .args(["list", "deps-", "--bucket", "ci", "--format", "plain"])
            .assert()
            .success()
            .stdout("deps-da610129b94e1b3da45836e40e8e78ec.tar.gz\n");
    }

    #[test]
    fn environment_lookup_in_key() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .env("CI_BRANCH", "main")
            .env_remove("UNSET_FOR_TEST")
            .args(["key", "build-{{ .Environment.CI_BRANCH }}-{{ .Environment.UNSET_FOR_TEST }}"])
            .assert()
            .success()
            .stdout("build-main-\n");
    }

    #[test]
    fn bad_template_fails_before_upload() {
        let sandbox = Sandbox::new();
        write(&sandbox.project().join("target/out.txt"), "built");

        sandbox
            .cmd()
            .args(["store", r#"deps-{{ checksum "missing.lock" }}"#, "target", "--bucket", "ci"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache key"));
        assert!(!sandbox.store_root().join("ci").exists());
    }

    #[test]
    fn missing_path_fails() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["store", "k", "does-not-exist", "--bucket", "ci"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Archive error"));
    }

    #[test]
    fn invalid_bucket_is_rejected() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["restore", "k", "--bucket", "../escape"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid bucket name"));
    }

    #[test]
    fn list_empty_bucket() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["list", "--bucket", "ci", "--format", "json"])
            .assert()
            .success()
            .stdout("[]\n");
    }

    #[test]
    fn config_init_then_show() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(sandbox.root.path().join("config.toml").is_file());

        sandbox
            .cmd()
            .args(["config", "set", "archive.compression_level", "9"])
            .assert()
            .success();

        sandbox
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("compression_level = 9"));
    }

    #[test]
    fn config_path_honours_override() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let sandbox = Sandbox::new();
        write(
            &sandbox.root.path().join("config.toml"),
            "[archive]\ncompression_level = 99\n",
        );
        sandbox
            .cmd()
            .args(["key", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}
