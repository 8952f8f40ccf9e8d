//! diagnostics — structured pipeline events.
//!
//! Purpose
//! -------
//! Record what each pipeline stage did (fits started and finished, patches
//! skipped, grid scans and refinements) as typed [`PipelineEvent`] values
//! instead of printing. Every stage result carries its own [`EventLog`].
//!
//! Key behaviors
//! -------------
//! - [`EventLog::record`] appends an event and, when a sink is installed,
//!   forwards it immediately to the caller's callback.
//! - Logs are merged with [`EventLog::absorb`] when a later stage consumes an
//!   earlier one, so the final result holds the full history in order.
//! - [`PipelineEvent`] implements `Display` for one-line human summaries.
//!
//! Conventions
//! -----------
//! - The library never writes to stdout/stderr on its own; forwarding to a
//!   terminal or a logger is the sink's job.
use std::{fmt, sync::Arc};

/// Callback receiving each event as it is recorded.
pub type EventSink = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// One thing that happened inside a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Masked entries were dropped before fitting.
    MaskApplied { n_masked: usize, n_total: usize },

    /// A spectral-likelihood fit is about to run.
    FitStarted { patch: Option<usize>, n_params: usize, n_samples: usize },

    /// A spectral-likelihood fit returned.
    FitFinished {
        patch: Option<usize>,
        status: String,
        converged: bool,
        iterations: usize,
        chi2: f64,
        grad_norm: Option<f64>,
    },

    /// Nothing to fit in a patch; its outputs are UNSEEN.
    PatchSkipped { patch: usize, reason: &'static str },

    /// Post-separation noise spectrum computed.
    NoiseComputed { lmin: usize, lmax: usize, sandwich: bool },

    /// Residual terms computed from foreground spectra.
    ResidualsComputed { n_ell: usize, n_params: usize },

    /// A grid scan located its minimum and the bracket for refinement.
    GridScanned { target: &'static str, argmin_index: usize, start: f64, bracket: (f64, f64) },

    /// A bounded 1-D refinement finished.
    Refined { target: &'static str, start: f64, result: f64, objective: f64, kept_start: bool },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::MaskApplied { n_masked, n_total } => {
                write!(f, "mask: {n_masked} of {n_total} samples excluded")
            }
            PipelineEvent::FitStarted { patch, n_params, n_samples } => match patch {
                Some(p) => write!(f, "fit[{p}]: {n_params} parameters on {n_samples} samples"),
                None => write!(f, "fit: {n_params} parameters on {n_samples} samples"),
            },
            PipelineEvent::FitFinished { patch, status, iterations, chi2, .. } => {
                let tag = patch.map(|p| format!("[{p}]")).unwrap_or_default();
                write!(f, "fit{tag}: {status} after {iterations} iterations, chi2 = {chi2:.6e}")
            }
            PipelineEvent::PatchSkipped { patch, reason } => {
                write!(f, "patch {patch} skipped: {reason}")
            }
            PipelineEvent::NoiseComputed { lmin, lmax, sandwich } => {
                let form = if *sandwich { "sandwich" } else { "inverse" };
                write!(f, "noise: ell {lmin}..={lmax} ({form} form)")
            }
            PipelineEvent::ResidualsComputed { n_ell, n_params } => {
                write!(f, "residuals: {n_ell} multipoles, {n_params} parameters")
            }
            PipelineEvent::GridScanned { target, argmin_index, start, bracket } => write!(
                f,
                "{target}: grid minimum at index {argmin_index} ({start:.4e}), bracket [{:.4e}, {:.4e}]",
                bracket.0, bracket.1
            ),
            PipelineEvent::Refined { target, start, result, objective, kept_start } => {
                let note = if *kept_start { " (grid start kept)" } else { "" };
                write!(f, "{target}: {start:.4e} -> {result:.6e}, objective {objective:.6e}{note}")
            }
        }
    }
}

/// Ordered events of one or more stages, with an optional live sink.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Vec<PipelineEvent>,
    sink: Option<EventSink>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that forwards every recorded event to `sink`.
    pub fn with_sink(sink: EventSink) -> Self {
        Self { events: Vec::new(), sink: Some(sink) }
    }

    pub fn sink(&self) -> Option<&EventSink> {
        self.sink.as_ref()
    }

    /// Append `event`, forwarding it to the sink first.
    pub fn record(&mut self, event: PipelineEvent) {
        if let Some(sink) = &self.sink {
            sink(&event);
        }
        self.events.push(event);
    }

    /// Append already-forwarded events from another log, keeping this
    /// log's sink.
    pub fn absorb(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("events", &self.events)
            .field("sink", &self.sink.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
