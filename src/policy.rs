//! Per-request security policy pipeline.
//!
//! An ordered list of checks runs once per request against an Active
//! session. Binding mismatches and idle timeouts are routine security
//! events, not faults: the pipeline recovers by destroying the session and
//! starting a fresh one, and reports the restart as an explicit outcome.
//! Only backend failures surface as errors.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SecurityConfig;
use crate::crypto::{generate_csrf_token, hash_binding_signal};
use crate::session::Session;
use crate::SessionError;

/// Security bookkeeping stored inside the session under a reserved key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMetadata {
    /// When the session was first touched. Immutable afterwards.
    pub created_at: DateTime<Utc>,
    /// Last request seen. Monotonically non-decreasing.
    pub last_activity: DateTime<Utc>,
    /// When the session ID was last rotated.
    pub last_regenerated: DateTime<Utc>,
    /// SHA-256 of the client binding signal, when binding is enabled.
    pub binding_hash: Option<String>,
    /// Per-session CSRF token.
    pub csrf_token: String,
}

/// Request-scoped inputs to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Opaque, stable per-client signal (user agent, channel binding, ...).
    /// Only its hash is ever stored.
    pub binding_signal: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_binding_signal(mut self, signal: impl Into<String>) -> Self {
        self.binding_signal = Some(signal.into());
        self
    }
}

/// Why the pipeline replaced the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The client binding signal no longer matches: hijack suspicion.
    BindingMismatch,
    /// The session sat idle past the configured timeout.
    IdleTimeout,
}

/// Overall result of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The session passed every check and its metadata was refreshed.
    Continue,
    /// The session was destroyed and a fresh one started in its place.
    Restarted(RestartReason),
}

/// Verdict of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Continue,
    Restart(RestartReason),
}

/// One security check evaluated against an Active session.
///
/// Checks run in pipeline order and may assume earlier checks already
/// normalized state. A check mutates metadata through the session; it never
/// destroys the session itself, it reports `Restart` and the pipeline does.
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, SessionError>;
}

/// Destroys sessions whose stored binding hash no longer matches the
/// request's binding signal.
pub struct BindingCheck;

#[async_trait]
impl PolicyCheck for BindingCheck {
    fn name(&self) -> &'static str {
        "binding"
    }

    async fn evaluate(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        _now: DateTime<Utc>,
    ) -> Result<CheckOutcome, SessionError> {
        let Some(metadata) = session.security_metadata()? else {
            return Ok(CheckOutcome::Continue);
        };
        let Some(expected) = metadata.binding_hash else {
            return Ok(CheckOutcome::Continue);
        };
        let Some(signal) = ctx.binding_signal.as_deref() else {
            return Ok(CheckOutcome::Continue);
        };

        if hash_binding_signal(signal) != expected {
            log::warn!(target: "vestibule::policy", "msg=\"binding signal mismatch, treating as hijack\" name=\"{}\"", session.name());
            return Ok(CheckOutcome::Restart(RestartReason::BindingMismatch));
        }

        Ok(CheckOutcome::Continue)
    }
}

/// Destroys sessions idle past the configured timeout.
pub struct IdleTimeoutCheck {
    pub idle_timeout: Duration,
}

#[async_trait]
impl PolicyCheck for IdleTimeoutCheck {
    fn name(&self) -> &'static str {
        "idle_timeout"
    }

    async fn evaluate(
        &self,
        session: &mut Session,
        _ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, SessionError> {
        let Some(metadata) = session.security_metadata()? else {
            return Ok(CheckOutcome::Continue);
        };

        if now - metadata.last_activity > self.idle_timeout {
            log::info!(target: "vestibule::policy", "msg=\"session idle past timeout\" name=\"{}\"", session.name());
            return Ok(CheckOutcome::Restart(RestartReason::IdleTimeout));
        }

        Ok(CheckOutcome::Continue)
    }
}

/// Initializes metadata on first touch; afterwards stamps activity and
/// rotates the session ID on schedule.
pub struct TouchCheck {
    pub regeneration_interval: Option<Duration>,
    pub bind_client_signal: bool,
}

#[async_trait]
impl PolicyCheck for TouchCheck {
    fn name(&self) -> &'static str {
        "touch"
    }

    async fn evaluate(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, SessionError> {
        let Some(mut metadata) = session.security_metadata()? else {
            let metadata = fresh_metadata(ctx, now, self.bind_client_signal);
            session.store_security_metadata(&metadata).await?;
            return Ok(CheckOutcome::Continue);
        };

        // Monotonic: a skewed clock never moves activity backwards
        metadata.last_activity = metadata.last_activity.max(now);

        if let Some(interval) = self.regeneration_interval {
            if now - metadata.last_regenerated > interval {
                let new_id = session.regenerate_id(true).await?;
                metadata.last_regenerated = now;
                log::info!(target: "vestibule::policy", "msg=\"session id rotated\" name=\"{}\" id_prefix=\"{}...\"", session.name(), new_id.chars().take(8).collect::<String>());
            }
        }

        // All metadata mutations from this run land in one backend write
        session.store_security_metadata(&metadata).await?;
        Ok(CheckOutcome::Continue)
    }
}

fn fresh_metadata(
    ctx: &RequestContext,
    now: DateTime<Utc>,
    bind_client_signal: bool,
) -> SecurityMetadata {
    let binding_hash = if bind_client_signal {
        ctx.binding_signal.as_deref().map(hash_binding_signal)
    } else {
        None
    };

    SecurityMetadata {
        created_at: now,
        last_activity: now,
        last_regenerated: now,
        binding_hash,
        csrf_token: generate_csrf_token(),
    }
}

/// The ordered list of checks run once per request.
pub struct PolicyPipeline {
    checks: Vec<Box<dyn PolicyCheck>>,
    bind_client_signal: bool,
}

impl PolicyPipeline {
    /// An empty pipeline. Useful as a base for custom check lists.
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            bind_client_signal: false,
        }
    }

    /// Builds the standard pipeline from configuration: binding, idle
    /// timeout, then touch/rotation. Disabled checks are simply absent.
    pub fn from_config(security: &SecurityConfig) -> Self {
        let mut pipeline = Self::new();
        pipeline.bind_client_signal = security.bind_client_signal;

        if security.bind_client_signal {
            pipeline.push(BindingCheck);
        }
        if let Some(idle_timeout) = security.idle_timeout {
            pipeline.push(IdleTimeoutCheck { idle_timeout });
        }
        pipeline.push(TouchCheck {
            regeneration_interval: security.regeneration_interval,
            bind_client_signal: security.bind_client_signal,
        });

        pipeline
    }

    /// Appends a check to the pipeline.
    pub fn push(&mut self, check: impl PolicyCheck + 'static) {
        self.checks.push(Box::new(check));
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs the pipeline at the current time.
    pub async fn run(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
    ) -> Result<PolicyOutcome, SessionError> {
        self.run_at(session, ctx, Utc::now()).await
    }

    /// Runs the pipeline at an explicit instant.
    ///
    /// On the first `Restart` verdict the session is destroyed, restarted
    /// fresh, and given initialized metadata; remaining checks are skipped.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotStarted`] when the session is not Active; backend
    /// faults from any check propagate unchanged, never folded into a
    /// restart.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, err))]
    pub async fn run_at(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<PolicyOutcome, SessionError> {
        if !session.is_started() {
            return Err(SessionError::NotStarted);
        }

        for check in &self.checks {
            match check.evaluate(session, ctx, now).await? {
                CheckOutcome::Continue => {}
                CheckOutcome::Restart(reason) => {
                    log::info!(target: "vestibule::policy", "msg=\"restarting session\" check=\"{}\" reason={reason:?}", check.name());
                    session.destroy().await?;
                    session.start().await?;
                    let metadata = fresh_metadata(ctx, now, self.bind_client_signal);
                    session.store_security_metadata(&metadata).await?;
                    return Ok(PolicyOutcome::Restarted(reason));
                }
            }
        }

        Ok(PolicyOutcome::Continue)
    }
}

impl Default for PolicyPipeline {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}
