//! Reporting channel: error and warning accumulation, a push error handler,
//! and progress observers that may cancel a run.
//!
//! Processing code records problems through a [`Reporter`]. Callers can poll
//! it afterwards (`error_occurred`, `error_messages`, `clear_error_messages`)
//! or install an [`ErrorHandler`] that is called synchronously for every
//! error as it is recorded. Every message is also forwarded to the `log`
//! facade.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, ErrorKind, Result};

/// One recorded error or warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Component that raised the message, e.g. `ReductionProcessor`
    pub source: String,
    /// Operation within the component, e.g. `run_processing`
    pub method: String,
    /// [`ErrorKind::Warning`] for warnings
    pub kind: ErrorKind,
    pub text: String,
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{} [{}]: {}", self.source, self.method, self.kind, self.text)
    }
}

/// Push-style error callback
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, message: &LogMessage);
}

impl<F> ErrorHandler for F
where
    F: Fn(&LogMessage) + Send + Sync,
{
    fn handle_error(&self, message: &LogMessage) {
        self(message)
    }
}

#[derive(Default)]
struct ReportLog {
    errors: Vec<LogMessage>,
    warnings: Vec<LogMessage>,
}

/// Cloneable handle to a shared error/warning accumulator
#[derive(Clone, Default)]
pub struct Reporter {
    log: Arc<Mutex<ReportLog>>,
    handler: Arc<RwLock<Option<Arc<dyn ErrorHandler>>>>,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let log = self.lock();
        f.debug_struct("Reporter")
            .field("errors", &log.errors.len())
            .field("warnings", &log.warnings.len())
            .finish()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReportLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        let mut slot = self.handler.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(handler);
    }

    pub fn clear_error_handler(&self) {
        let mut slot = self.handler.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    /// Record an error and invoke the installed handler
    pub fn error(&self, source: &str, method: &str, kind: ErrorKind, text: impl Into<String>) {
        let message = LogMessage {
            source: source.to_string(),
            method: method.to_string(),
            kind,
            text: text.into(),
        };
        log::error!("{}", message);
        self.lock().errors.push(message.clone());
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler.handle_error(&message);
        }
    }

    /// Record `error` with its own kind and message
    pub fn report(&self, source: &str, method: &str, error: &Error) {
        self.error(source, method, error.kind(), error.to_string());
    }

    pub fn warning(&self, source: &str, method: &str, text: impl Into<String>) {
        let message = LogMessage {
            source: source.to_string(),
            method: method.to_string(),
            kind: ErrorKind::Warning,
            text: text.into(),
        };
        log::warn!("{}", message);
        self.lock().warnings.push(message);
    }

    pub fn error_occurred(&self) -> bool {
        !self.lock().errors.is_empty()
    }

    pub fn warning_occurred(&self) -> bool {
        !self.lock().warnings.is_empty()
    }

    pub fn error_messages(&self) -> Vec<LogMessage> {
        self.lock().errors.clone()
    }

    pub fn warning_messages(&self) -> Vec<LogMessage> {
        self.lock().warnings.clone()
    }

    pub fn clear_error_messages(&self) {
        self.lock().errors.clear();
    }

    pub fn clear_warning_messages(&self) {
        self.lock().warnings.clear();
    }
}

/// What [`check_log`] does with recorded errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogPolicy {
    /// Drain and report; recorded errors do not fail the caller
    #[default]
    Report,
    /// Drain and report, then fail if any error was recorded
    Escalate,
}

/// Messages drained by [`check_log`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedLog {
    pub errors: Vec<LogMessage>,
    pub warnings: Vec<LogMessage>,
}

/// Drain errors then warnings from the reporter and clear both lists
pub fn check_log(reporter: &Reporter, policy: LogPolicy) -> Result<DrainedLog> {
    let drained = {
        let mut log = reporter.lock();
        DrainedLog {
            errors: std::mem::take(&mut log.errors),
            warnings: std::mem::take(&mut log.warnings),
        }
    };
    if !drained.errors.is_empty() {
        log::info!("{} error(s) recorded", drained.errors.len());
    }
    if !drained.warnings.is_empty() {
        log::info!("{} warning(s) recorded", drained.warnings.len());
    }
    if policy == LogPolicy::Escalate {
        if let Some(first) = drained.errors.first() {
            return Err(Error::Processing(format!(
                "{} error(s) recorded, first: {}",
                drained.errors.len(),
                first
            )));
        }
    }
    Ok(drained)
}

/// Progress callback. Returning `false` asks the running stage to stop.
pub trait Observer: Send + Sync {
    fn on_progress(&self, subject: &str, percent: f32) -> bool;
}

impl<F> Observer for F
where
    F: Fn(&str, f32) -> bool + Send + Sync,
{
    fn on_progress(&self, subject: &str, percent: f32) -> bool {
        self(subject, percent)
    }
}

struct ProgressState {
    last: f32,
    aborted: bool,
}

/// Fans progress out to observers with monotone percentages in `[0, 100]`.
///
/// A tracker made by [`ProgressTracker::sub_range`] shares its parent's
/// observers and state but maps its own `0..100` onto a slice of the
/// parent's range, so nested stages can report without knowing where they
/// sit in the whole run.
pub struct ProgressTracker {
    subject: String,
    observers: Vec<Arc<dyn Observer>>,
    state: Arc<Mutex<ProgressState>>,
    range: (f32, f32),
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("subject", &self.subject)
            .field("observers", &self.observers.len())
            .field("range", &self.range)
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(subject: impl Into<String>, observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            subject: subject.into(),
            observers,
            state: Arc::new(Mutex::new(ProgressState {
                last: 0.0,
                aborted: false,
            })),
            range: (0.0, 100.0),
        }
    }

    fn absolute(&self, percent: f32) -> f32 {
        let (start, end) = self.range;
        start + (end - start) * percent.clamp(0.0, 100.0) / 100.0
    }

    /// Tracker whose `0..100` covers `[start, end]` percent of this one
    pub fn sub_range(&self, start: f32, end: f32) -> ProgressTracker {
        let (start, end) = (start.clamp(0.0, 100.0), end.clamp(0.0, 100.0));
        ProgressTracker {
            subject: self.subject.clone(),
            observers: self.observers.clone(),
            state: Arc::clone(&self.state),
            range: (self.absolute(start), self.absolute(end.max(start))),
        }
    }

    /// Tracker with no observers
    pub fn silent(subject: impl Into<String>) -> Self {
        Self::new(subject, Vec::new())
    }

    /// Report `percent`; lower values than already reported are raised.
    /// Fails with [`Error::Aborted`] once any observer has returned `false`.
    pub fn report(&self, percent: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.aborted {
            return Err(Error::Aborted);
        }
        let percent = self.absolute(percent).max(state.last);
        state.last = percent;
        let mut keep_going = true;
        for observer in &self.observers {
            keep_going &= observer.on_progress(&self.subject, percent);
        }
        if !keep_going {
            state.aborted = true;
            log::info!("{}: aborted by observer at {:.1}%", self.subject, percent);
            return Err(Error::Aborted);
        }
        Ok(())
    }

    /// Report progress `fraction` (0..1) of a step spanning `[start, end]` percent
    pub fn report_step(&self, start: f32, end: f32, fraction: f32) -> Result<()> {
        self.report(start + (end - start) * fraction.clamp(0.0, 1.0))
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().map(|s| s.aborted).unwrap_or(true)
    }

    pub fn finish(&self) -> Result<()> {
        self.report(100.0)
    }
}
