//! The warning sink (spec.md §4.2, §6).
//!
//! Grounded on the teacher's [`InferContext`], which accumulates diagnostics
//! for one inference region behind a `RefCell` so deeply nested `match`
//! calls can emit without threading `&mut` everywhere. We keep that shape but
//! drop the teacher's `Db`/`File`/rule-suppression machinery, which belongs
//! to a multi-file incremental checker this crate explicitly is not
//! (spec.md §5: single-threaded, synchronous, no incremental database).

use std::cell::RefCell;
use std::rc::Rc;

use crate::span::Span;

/// One emitted diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub location: Option<Span>,
    pub message: String,
}

/// A warning sink carrying a contextual message prefix and an enable flag.
///
/// Cloning a `WarnSink` is cheap: the collected diagnostics live behind a
/// shared `Rc<RefCell<_>>`, so every sink derived from the same root via
/// [`WarnSink::at`] or [`WarnSink::on`] writes into the same buffer.
#[derive(Clone)]
pub struct WarnSink {
    prefix: String,
    enabled: bool,
    location: Option<Span>,
    diagnostics: Rc<RefCell<Vec<Warning>>>,
}

impl WarnSink {
    #[must_use]
    pub fn new(location: Option<Span>) -> Self {
        Self {
            prefix: String::new(),
            enabled: true,
            location,
            diagnostics: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Emits `msg`, prefixed by this sink's accumulated context, unless the
    /// sink is disabled.
    pub fn warn(&self, msg: &str) {
        if !self.enabled {
            return;
        }
        let message = if self.prefix.is_empty() {
            msg.to_string()
        } else {
            format!("{}: {msg}", self.prefix)
        };
        tracing::debug!(location = ?self.location, %message, "analyser warning");
        self.diagnostics.borrow_mut().push(Warning {
            location: self.location,
            message,
        });
    }

    /// Returns a derived sink with `extra` prepended to the context prefix,
    /// forcibly enabled.
    #[must_use]
    pub fn at(&self, extra: &str) -> Self {
        let prefix = if self.prefix.is_empty() {
            extra.to_string()
        } else {
            format!("{extra}, {}", self.prefix)
        };
        Self {
            prefix,
            enabled: true,
            location: self.location,
            diagnostics: Rc::clone(&self.diagnostics),
        }
    }

    /// Returns a derived sink, forcibly enabled, context unchanged.
    #[must_use]
    pub fn on(&self) -> Self {
        Self {
            enabled: true,
            ..self.clone()
        }
    }

    /// Returns a derived sink pinned to `location`.
    #[must_use]
    pub fn at_location(&self, location: Span) -> Self {
        Self {
            location: Some(location),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Drains every warning emitted through this sink (and its derivatives)
    /// so far. Intended for the driver, once analysis of a scope completes.
    pub fn take_warnings(&self) -> Vec<Warning> {
        std::mem::take(&mut self.diagnostics.borrow_mut())
    }
}

/// A disabled sentinel, used in hot internal paths (e.g. structural array-
/// element matching) where warnings from intermediate matches would be
/// noise. Matches spec.md's process-wide `NO_WARN`.
#[must_use]
pub fn no_warn() -> WarnSink {
    WarnSink {
        prefix: String::new(),
        enabled: false,
        location: None,
        diagnostics: Rc::new(RefCell::new(Vec::new())),
    }
}
