//! CI workflow template rendering.
//!
//! The rendered workflow runs one job per tier, each a matrix over platforms
//! with `fail-fast: false`. Only the enterprise job references secrets, and
//! it is skipped for pull requests from forks. A final gate job requires
//! every leg that ran to succeed.

use tiergate_core::toolchain::Placeholders;
use tiergate_core::{EngineConfig, TierName};

use crate::matrix::{secrets_for, MatrixSpec};

const HEADER: &str = r#"# Generated by `tiergate matrix workflow`.
name: {name}

on:
  push:
    branches: [main]
  pull_request:

jobs:
"#;

const TIER_JOB: &str = r#"  {tier}:
    name: {tier} (${{ matrix.platform }})
{condition}    runs-on: ${{ matrix.os }}
    strategy:
      fail-fast: false
      matrix:
        include:
{include}    env:
      TIER: {tier}
{secrets}    steps:
      - uses: actions/checkout@v4
      - name: Build
        run: tiergate build --json --tier {tier} --platform ${{ matrix.platform }} > report-{tier}-${{ matrix.platform }}.json
      - name: Upload report
        if: always()
        uses: actions/upload-artifact@v4
        with:
          name: report-{tier}-${{ matrix.platform }}
          path: report-{tier}-${{ matrix.platform }}.json

"#;

const FORK_CONDITION: &str =
    "    if: github.event_name != 'pull_request' || github.event.pull_request.head.repo.fork == false\n";

const GATE_JOB: &str = r#"  release-gate:
    needs: [{needs}]
    if: always()
    runs-on: ubuntu-latest
    steps:
      - name: Require every leg to pass
        run: |
{checks}"#;

/// GitHub-hosted runner label for a `<os>-<arch>` platform string.
pub fn runner_for(platform: &str) -> &'static str {
    match platform.split('-').next() {
        Some("macos") => "macos-latest",
        Some("windows") => "windows-latest",
        _ => "ubuntu-latest",
    }
}

/// Render the workflow for `spec`.
pub fn render_workflow(name: &str, spec: &MatrixSpec, config: &EngineConfig) -> String {
    let mut tiers: Vec<TierName> = spec.tiers.clone();
    tiers.sort();
    tiers.dedup();

    let mut include = String::new();
    for platform in &spec.platforms {
        include.push_str(&format!(
            "          - platform: {platform}\n            os: {}\n",
            runner_for(platform)
        ));
    }

    let mut out = Placeholders::new().set("name", name).expand(HEADER);
    for tier in &tiers {
        let mut secrets = String::new();
        for secret in secrets_for(config, *tier) {
            secrets.push_str(&format!("      {secret}: ${{{{ secrets.{secret} }}}}\n"));
        }
        let condition = match tier {
            TierName::Community => "",
            TierName::Enterprise => FORK_CONDITION,
        };
        out.push_str(
            &Placeholders::new()
                .set("tier", tier.as_str())
                .set("condition", condition)
                .set("include", include.as_str())
                .set("secrets", secrets)
                .expand(TIER_JOB),
        );
    }

    let needs = tiers.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ");
    let mut checks = String::new();
    for tier in &tiers {
        let check = format!("test \"${{{{ needs.{tier}.result }}}}\" = \"success\"");
        match tier {
            TierName::Community => {
                checks.push_str(&format!("          {check}\n"));
            }
            TierName::Enterprise => {
                checks.push_str(
                    "          if [ \"${{ github.event_name }}\" != \"pull_request\" ] || [ \"${{ github.event.pull_request.head.repo.fork }}\" != \"true\" ]; then\n",
                );
                checks.push_str(&format!("            {check}\n"));
                checks.push_str("          fi\n");
            }
        }
    }
    out.push_str(
        &Placeholders::new()
            .set("needs", needs)
            .set("checks", checks)
            .expand(GATE_JOB),
    );
    out
}
