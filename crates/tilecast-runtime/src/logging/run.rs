use core::fmt::Display;

use super::profile::CycleProfile;
use crate::config::ProfilingConfig;
use crate::config::logger::{Logger, ProfilingLogLevel};

/// Collects the modeled cycle charges of one run and renders them as a
/// summary table when the run retires.
///
/// Inert unless the profiling logger is enabled, so charging work from the
/// server loop costs one branch.
#[derive(Debug, Default)]
pub struct RunLogger {
    kind: RunLoggerKind,
    profile: CycleProfile,
}

#[derive(Debug, Default)]
enum RunLoggerKind {
    Activated(Logger),
    #[default]
    Disabled,
}

impl RunLogger {
    /// Open the sinks the profiling config enables.
    pub fn new(config: &ProfilingConfig) -> Self {
        let kind = match config.logger.level {
            ProfilingLogLevel::Disabled => RunLoggerKind::Disabled,
            ProfilingLogLevel::Full => RunLoggerKind::Activated(Logger::new(&config.logger)),
        };

        Self {
            kind,
            profile: CycleProfile::default(),
        }
    }

    /// Whether any profiling sink is active.
    pub fn is_active(&self) -> bool {
        match &self.kind {
            RunLoggerKind::Activated(logger) => logger.is_active(),
            RunLoggerKind::Disabled => false,
        }
    }

    /// Charge modeled cycles to the named kind of work.
    pub fn register<N: Display>(&mut self, name: N, cycles: f64) {
        if !self.is_active() {
            return;
        }
        self.profile.update(&name.to_string(), cycles);
    }

    /// Write one free-form line to the profiling sinks.
    pub fn log<S: Display>(&mut self, msg: &S) {
        if let RunLoggerKind::Activated(logger) = &mut self.kind {
            logger.log(msg);
        }
    }

    /// Render the accumulated table and reset it for the next run.
    pub fn summary(&mut self) {
        let mut profile = CycleProfile::default();
        core::mem::swap(&mut self.profile, &mut profile);

        if let RunLoggerKind::Activated(logger) = &mut self.kind
            && !profile.is_empty()
        {
            logger.log(&profile);
        }
    }
}
