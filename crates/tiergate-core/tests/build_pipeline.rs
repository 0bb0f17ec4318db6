use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;

use tiergate_core::fsutil::sha256_hex;
use tiergate_core::{
    BuildDriver, BuildReport, BuildRequest, BuildStatus, BuildStep, Credentials, FailureCategory,
    Project, ProbeFailure, SourceType, StaticProbe,
};

const PLATFORM: &str = "test-x86_64";

const BOUNDARIES: &str = r#"
[[feature]]
id = "sso"
tier = "enterprise"
module_prefix = "enterprise/sso"

[[feature]]
id = "reports"
tier = "enterprise"
module_prefix = "enterprise/reports"
severity = "warning"
"#;

const COMMUNITY_MANIFEST: &str = r#"
tier = "community"

[dependencies]
react = "^18.2.0"

[licenses]
react = "MIT"
"#;

const ENTERPRISE_MANIFEST: &str = r#"
tier = "enterprise"

[dependencies]
react = "^18.2.0"
"@enterprise/ui-kit" = "2.1.0"

[licenses]
react = "MIT"
"#;

/// Compiler: concatenate the community sources, plus enterprise sources on
/// enterprise builds.
const COMPILE_SCRIPT: &str = r#"cat src/core/*.ext > "$TIERGATE_OUT_DIR/bundle.js" && if [ "$TIERGATE_TIER" = enterprise ]; then cat src/enterprise/sso/*.ext >> "$TIERGATE_OUT_DIR/bundle.js"; fi"#;

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

struct Fixture {
    dir: tempfile::TempDir,
    registry: String,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = format!("http://127.0.0.1:{}/", closed_port());
        let root = dir.path();

        write(
            root,
            "tiergate.toml",
            &format!(
                r#"
[project]
community_root = "src"

[tiers.community]
manifest = "manifests/community.toml"
sources = [
  {{ type = "registry", priority = 1, locator = "{registry}" }},
  {{ type = "vendored", priority = 2, locator = "vendor/community" }},
]

[tiers.enterprise]
manifest = "manifests/enterprise.toml"
sources = [
  {{ type = "registry", priority = 1, locator = "{registry}", requires_auth = true, auth_env = "TIERGATE_TEST_TOKEN" }},
  {{ type = "vendored", priority = 2, locator = "vendor/community" }},
]

[licenses]
proprietary_whitelist = ["@enterprise/ui-kit"]

[toolchain.install]
program = "sh"
args = ["-c", "test -f package.json"]

[toolchain.compile]
program = "sh"
args = ["-c", {script:?}]

[validation]
probe_timeout_secs = 2
"#,
                script = COMPILE_SCRIPT,
            ),
        );
        write(root, "feature-boundaries.toml", BOUNDARIES);
        write(root, "manifests/community.toml", COMMUNITY_MANIFEST);
        write(root, "manifests/enterprise.toml", ENTERPRISE_MANIFEST);

        let tarball = b"react-18.2.0 tarball bytes";
        write(root, "vendor/community/react-18.2.0.tgz", "react-18.2.0 tarball bytes");
        write(
            root,
            "vendor/community/checksums.json",
            &format!(r#"{{ "react-18.2.0.tgz": "{}" }}"#, sha256_hex(tarball)),
        );

        write(root, "src/core/App.ext", "import { Button } from 'core/Button';\nexport const App = 1;\n");
        write(root, "src/enterprise/sso/Login.ext", "export const Login = 'enterprise/sso';\n");

        Self { dir, registry }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn project(&self) -> Project {
        Project::open(self.root(), None).unwrap()
    }

    fn request(&self, tier: &str) -> BuildRequest {
        BuildRequest {
            platform: Some(PLATFORM.to_string()),
            ..BuildRequest::for_tier(tier)
        }
    }

    fn final_dir(&self, tier: &str) -> PathBuf {
        self.root().join("dist").join(format!("{tier}-{PLATFORM}"))
    }
}

fn dashboard_with_prohibited_import() -> String {
    let mut lines: Vec<String> = (1..=11).map(|i| format!("// line {i}")).collect();
    lines.push("import { Login } from 'enterprise/sso/Login';".to_string());
    lines.push("export const Dashboard = Login;".to_string());
    lines.join("\n")
}

#[tokio::test]
async fn community_build_falls_back_to_vendored_and_succeeds() {
    let fx = Fixture::new();
    let project = fx.project();
    let outcome = BuildDriver::new(&project)
        .with_credentials(Credentials::new())
        .build(&fx.request("community"))
        .await
        .unwrap();

    let report: &BuildReport = &outcome.report;
    assert_eq!(report.status, BuildStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.source.as_deref(), Some("vendored"));
    assert_eq!(report.source_attempts.len(), 2);
    assert!(!report.source_attempts[0].available);
    assert!(matches!(
        report.source_attempts[0].failure,
        Some(ProbeFailure::Unreachable { .. })
    ));

    let final_dir = fx.final_dir("community");
    assert_eq!(outcome.artifact.path, final_dir.join("bundle.js"));
    assert!(final_dir.join("bom.json").is_file());
    assert!(fx
        .root()
        .join(".tiergate/externals/community-test-x86_64.json")
        .is_file());
    assert_eq!(
        std::fs::read_dir(&final_dir).unwrap().count(),
        2,
        "only the bundle and its bill of materials are promoted"
    );
    assert!(!fx.root().join("dist/community-test-x86_64.partial").exists());
    assert!(fx.root().join("package.json").is_file());

    let bundle = std::fs::read_to_string(&outcome.artifact.path).unwrap();
    assert!(!bundle.contains("enterprise/sso"));
    assert!(report.validation.values().all(|c| c.passed));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["tier"], "community");
    assert_eq!(json["artifact"]["sha256"], outcome.artifact.sha256);
    assert_eq!(json["metadata"]["platform"], PLATFORM);
}

#[tokio::test]
async fn highest_priority_available_source_is_used() {
    let fx = Fixture::new();
    let project = fx.project();
    let probe = StaticProbe::new()
        .available(&fx.registry)
        .available("vendor/community");
    let outcome = BuildDriver::new(&project)
        .with_probe(&probe)
        .build(&fx.request("community"))
        .await
        .unwrap();
    assert_eq!(outcome.report.source.as_deref(), Some("registry"));
    assert_eq!(outcome.report.source_attempts.len(), 1);
}

#[tokio::test]
async fn prohibited_import_fails_with_validation_exit_and_recovers_after_revert() {
    let fx = Fixture::new();
    let project = fx.project();
    write(fx.root(), "src/core/Dashboard.ext", &dashboard_with_prohibited_import());

    let failure = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap_err();
    assert_eq!(failure.exit_code(), 2);
    assert_eq!(failure.step, BuildStep::Compiled);
    assert_eq!(failure.report.failure_category, Some(FailureCategory::Validation));
    assert_eq!(failure.report.failed_step.as_deref(), Some("compiled"));
    assert_eq!(failure.report.violations.len(), 1);
    let violation = &failure.report.violations[0];
    assert_eq!(violation.file_path, "core/Dashboard.ext");
    assert_eq!(violation.line_number, 12);
    assert!(failure.report.render_human().contains("core/Dashboard.ext:12"));
    assert!(!fx.final_dir("community").exists());

    write(fx.root(), "src/core/Dashboard.ext", "export const Dashboard = 1;\n");
    let outcome = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap();
    assert_eq!(outcome.report.exit_code(), 0);
}

#[tokio::test]
async fn enterprise_build_may_reference_restricted_modules() {
    let fx = Fixture::new();
    let project = fx.project();
    write(fx.root(), "src/core/Dashboard.ext", &dashboard_with_prohibited_import());

    let outcome = BuildDriver::new(&project)
        .with_credentials(Credentials::new())
        .build(&fx.request("enterprise"))
        .await
        .unwrap();
    assert_eq!(outcome.report.source.as_deref(), Some("vendored"));
    assert!(matches!(
        outcome.report.source_attempts[0].failure,
        Some(ProbeFailure::CredentialsMissing { ref env }) if env == "TIERGATE_TEST_TOKEN"
    ));
    let bundle = std::fs::read_to_string(&outcome.artifact.path).unwrap();
    assert!(bundle.contains("enterprise/sso"));
    assert!(outcome.report.validation["imports"].message.contains("advisory"));
}

#[tokio::test]
async fn rebuild_of_same_inputs_is_hash_identical_and_source_change_is_not() {
    let fx = Fixture::new();
    let project = fx.project();
    let request = BuildRequest {
        revision: Some("rev-a".to_string()),
        ..fx.request("community")
    };

    let first = BuildDriver::new(&project).build(&request).await.unwrap();
    let second = BuildDriver::new(&project).build(&request).await.unwrap();
    assert_eq!(first.artifact.sha256, second.artifact.sha256);
    assert!(second.report.validation["determinism"]
        .message
        .contains("matches the recorded build"));

    let ledger = std::fs::read_to_string(fx.root().join(".tiergate/determinism.json")).unwrap();
    assert!(ledger.contains("rev-a/community/test-x86_64"));

    write(fx.root(), "src/core/App.ext", "import { Button } from 'core/Button';\nexport const App = 2;\n");
    let changed = BuildDriver::new(&project)
        .build(&BuildRequest {
            revision: Some("rev-b".to_string()),
            ..fx.request("community")
        })
        .await
        .unwrap();
    assert_ne!(changed.artifact.sha256, first.artifact.sha256);
}

#[tokio::test]
async fn drifted_rebuild_of_recorded_revision_fails_community() {
    let fx = Fixture::new();
    let project = fx.project();
    let request = BuildRequest {
        revision: Some("rev-a".to_string()),
        ..fx.request("community")
    };
    BuildDriver::new(&project).build(&request).await.unwrap();

    write(fx.root(), "src/core/App.ext", "export const App = 'drift';\n");
    let failure = BuildDriver::new(&project).build(&request).await.unwrap_err();
    assert_eq!(failure.exit_code(), 2);
    assert_eq!(failure.step, BuildStep::Validated);
    assert!(!failure.report.validation["determinism"].passed);
    assert!(fx.root().join("dist/community-test-x86_64.partial").exists());
}

fn git(root: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn uncommitted_edit_builds_as_dirty_revision_without_touching_the_ledger() {
    let fx = Fixture::new();
    let root = fx.root();
    if !git(root, &["init", "-q"]) {
        return;
    }
    assert!(git(root, &["config", "user.name", "test-user"]));
    assert!(git(root, &["config", "user.email", "test@example.com"]));
    assert!(git(root, &["add", "-A"]));
    assert!(git(root, &["commit", "-q", "-m", "initial"]));

    let project = fx.project();
    let clean = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap();
    let sha = clean.artifact.source_revision.clone();
    assert_eq!(sha.len(), 40);
    assert!(clean.report.validation["determinism"]
        .message
        .contains("first build recorded"));

    write(root, "src/core/App.ext", "export const App = 'edited';\n");
    let edited = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap();
    assert_eq!(edited.artifact.source_revision, format!("{sha}-dirty"));
    assert_ne!(edited.artifact.sha256, clean.artifact.sha256);
    assert!(edited.report.validation["determinism"]
        .message
        .contains("uncommitted changes"));

    let ledger = std::fs::read_to_string(root.join(".tiergate/determinism.json")).unwrap();
    assert!(ledger.contains(&format!("{sha}/community/{PLATFORM}")));
    assert!(!ledger.contains("-dirty"));

    // Reverting the edit gets the committed revision, and its recorded hash, back.
    write(root, "src/core/App.ext", "import { Button } from 'core/Button';\nexport const App = 1;\n");
    let reverted = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap();
    assert_eq!(reverted.artifact.source_revision, sha);
    assert_eq!(reverted.artifact.sha256, clean.artifact.sha256);
}

#[tokio::test]
async fn exhausted_sources_are_a_dependency_error_naming_each_source() {
    let fx = Fixture::new();
    write(
        fx.root(),
        "vendor/community/react-18.2.0.tgz",
        "tampered bytes",
    );
    let project = fx.project();
    let failure = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap_err();

    assert_eq!(failure.exit_code(), 4);
    assert_eq!(failure.step, BuildStep::DependenciesResolved);
    let attempts = &failure.report.source_attempts;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].source_type, SourceType::Registry);
    assert!(matches!(
        attempts[1].failure,
        Some(ProbeFailure::ChecksumMismatch { .. })
    ));
    let error = failure.report.error.clone().unwrap();
    assert!(error.contains(&fx.registry));
    assert!(error.contains("vendor/community"));
}

#[tokio::test]
async fn community_cdn_override_is_a_configuration_error() {
    let fx = Fixture::new();
    let project = fx.project();
    let failure = BuildDriver::new(&project)
        .build(&BuildRequest {
            source: Some("cdn".to_string()),
            ..fx.request("community")
        })
        .await
        .unwrap_err();
    assert_eq!(failure.exit_code(), 3);
}

#[tokio::test]
async fn invalid_tier_is_a_configuration_error_at_selection() {
    let fx = Fixture::new();
    let project = fx.project();
    let failure = BuildDriver::new(&project)
        .build(&fx.request("premium"))
        .await
        .unwrap_err();
    assert_eq!(failure.exit_code(), 3);
    assert_eq!(failure.step, BuildStep::TierSelected);
    assert_eq!(failure.report.tier, None);
}

#[tokio::test]
async fn env_tier_applies_without_flag() {
    let fx = Fixture::new();
    let project = fx.project();
    let outcome = BuildDriver::new(&project)
        .with_credentials(Credentials::new())
        .build(&BuildRequest {
            env_tier: Some("enterprise".to_string()),
            platform: Some(PLATFORM.to_string()),
            ..BuildRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome.artifact.tier.as_str(), "enterprise");
}

#[tokio::test]
async fn proprietary_dependency_in_community_manifest_is_a_configuration_error() {
    let fx = Fixture::new();
    write(
        fx.root(),
        "manifests/community.toml",
        "[dependencies]\nreact = \"^18.2.0\"\n\"@enterprise/ui-kit\" = \"2.1.0\"\n\n[licenses]\nreact = \"MIT\"\n",
    );
    let project = fx.project();
    let failure = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap_err();
    assert_eq!(failure.exit_code(), 3);
    assert_eq!(failure.step, BuildStep::ManifestLoaded);
}

#[tokio::test]
async fn compiler_failure_keeps_stderr_verbatim() {
    let fx = Fixture::new();
    let config = std::fs::read_to_string(fx.root().join("tiergate.toml")).unwrap();
    let start = config.find("[toolchain.compile]").unwrap();
    let end = config.find("[validation]").unwrap();
    let broken = format!(
        "{}[toolchain.compile]\nprogram = \"sh\"\nargs = [\"-c\", \"echo 'cannot resolve enterprise/sso' >&2; exit 3\"]\n\n{}",
        &config[..start],
        &config[end..]
    );
    write(fx.root(), "tiergate.toml", &broken);

    let project = fx.project();
    let failure = BuildDriver::new(&project)
        .build(&fx.request("community"))
        .await
        .unwrap_err();
    assert_eq!(failure.exit_code(), 1);
    assert_eq!(failure.step, BuildStep::Compiled);
    assert!(failure
        .report
        .error
        .as_deref()
        .unwrap()
        .contains("cannot resolve enterprise/sso"));
}
