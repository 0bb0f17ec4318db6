//! Ordered-fallback source resolution with bounded probes.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::{
    DependencySource, ProbeFailure, ProbeOutcome, SourceAttempt, SourceProbe, SourceSelection,
    SourceType,
};
use crate::error::{Result, TiergateError};
use crate::obs;
use crate::tier::BuildTier;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The source chosen for this build, plus the record of everything tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSource {
    pub source: DependencySource,
    pub attempts: Vec<SourceAttempt>,
}

/// Walks a tier's sources in priority order and returns the first available one.
pub struct SourceResolver<'a> {
    probe: &'a dyn SourceProbe,
    timeout: Duration,
}

impl<'a> SourceResolver<'a> {
    pub fn new(probe: &'a dyn SourceProbe) -> Self {
        Self {
            probe,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the dependency source for `tier`.
    ///
    /// Each source is probed at most once and every probe is bounded by the
    /// configured timeout; a timed-out probe counts as unavailable and
    /// resolution moves on to the next source.
    pub async fn resolve(
        &self,
        tier: &BuildTier,
        sources: &[DependencySource],
        selection: SourceSelection,
    ) -> Result<ResolvedSource> {
        if tier.is_community() && selection == SourceSelection::Only(SourceType::Cdn) {
            return Err(TiergateError::config(
                "the cdn source is not available to the community tier",
            ));
        }

        let mut ordered: Vec<&DependencySource> = sources.iter().collect();
        ordered.sort_by_key(|s| s.priority);

        let mut attempts = Vec::with_capacity(ordered.len());
        for source in ordered {
            if let Some(reason) = exclusion_reason(tier, source, selection) {
                attempts.push(SourceAttempt::failed(
                    source.source_type,
                    &source.locator,
                    ProbeFailure::Excluded { reason },
                ));
                continue;
            }

            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.timeout, self.probe.probe(source)).await
            {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::Unavailable(ProbeFailure::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                ProbeOutcome::Available => {
                    obs::emit_source_probed(source.source_type, &source.locator, true, elapsed_ms);
                    attempts.push(
                        SourceAttempt::available(source.source_type, &source.locator)
                            .with_elapsed(elapsed_ms),
                    );
                    info!(
                        tier = %tier,
                        source = %source.source_type,
                        locator = %source.locator,
                        "dependency source resolved"
                    );
                    return Ok(ResolvedSource {
                        source: source.clone(),
                        attempts,
                    });
                }
                ProbeOutcome::Unavailable(failure) => {
                    obs::emit_source_probed(source.source_type, &source.locator, false, elapsed_ms);
                    warn!(
                        source = %source.source_type,
                        locator = %source.locator,
                        reason = %failure,
                        "dependency source unavailable, falling back"
                    );
                    attempts.push(
                        SourceAttempt::failed(source.source_type, &source.locator, failure)
                            .with_elapsed(elapsed_ms),
                    );
                }
            }
        }

        Err(TiergateError::Dependency {
            tier: tier.name(),
            attempts,
        })
    }
}

fn exclusion_reason(
    tier: &BuildTier,
    source: &DependencySource,
    selection: SourceSelection,
) -> Option<String> {
    if tier.is_community() && source.source_type == SourceType::Cdn {
        return Some("cdn sources are not permitted for the community tier".to_string());
    }
    if tier.is_community() && source.requires_auth {
        return Some("community sources must not require credentials".to_string());
    }
    if !selection.admits(source.source_type) {
        return Some(format!("source override selects {selection}"));
    }
    None
}
