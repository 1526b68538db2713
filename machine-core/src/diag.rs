//! Diagnostics context.
//!
//! Chips receive an explicit `Diagnostics` handle at construction instead
//! of writing to global state. Messages forward through the `log` facade,
//! so the host decides where they end up.

/// Verbosity threshold for component diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Off,
    Info,
    Debug,
    Trace,
}

/// Per-component diagnostics context.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    component: &'static str,
    level: DebugLevel,
}

impl Diagnostics {
    #[must_use]
    pub fn new(component: &'static str, level: DebugLevel) -> Self {
        Self { component, level }
    }

    /// Context for a sub-component, inheriting the verbosity level.
    #[must_use]
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            component,
            level: self.level,
        }
    }

    #[must_use]
    pub fn level(&self) -> DebugLevel {
        self.level
    }

    pub fn set_level(&mut self, level: DebugLevel) {
        self.level = level;
    }

    pub fn info(&self, msg: &str) {
        if self.level >= DebugLevel::Info {
            log::info!("[{}] {msg}", self.component);
        }
    }

    pub fn debug(&self, msg: &str) {
        if self.level >= DebugLevel::Debug {
            log::debug!("[{}] {msg}", self.component);
        }
    }

    pub fn trace(&self, msg: &str) {
        if self.level >= DebugLevel::Trace {
            log::trace!("[{}] {msg}", self.component);
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new("machine", DebugLevel::Off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_level() {
        let mut diag = Diagnostics::new("c64", DebugLevel::Debug);
        diag.set_level(DebugLevel::Trace);
        let child = diag.child("vic");
        assert_eq!(child.level(), DebugLevel::Trace);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(DebugLevel::Trace > DebugLevel::Debug);
        assert!(DebugLevel::Debug > DebugLevel::Info);
        assert!(DebugLevel::Info > DebugLevel::Off);
    }
}
