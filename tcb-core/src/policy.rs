//! Runtime rule store
//!
//! Holds the active [`FilterRuleSet`] as an immutable snapshot. Readers load
//! the snapshot without locking; `apply` builds a replacement and swaps it in.
//! A classification that already loaded a snapshot keeps using it.

use crate::config::FilterSettings;
use crate::error::CompileError;
use crate::filter::{compile_host, compile_mime, parse_ports, FilterRuleSet};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Result of one apply call
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The snapshot now active
    pub rules: Arc<FilterRuleSet>,
    /// Patterns that failed to compile; the previous pattern was kept for each
    pub errors: Vec<CompileError>,
}

impl ApplyOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
pub struct RuleStore {
    current: ArcSwap<FilterRuleSet>,
    /// Serializes writers
    apply_lock: Mutex<()>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// Create a store holding the permissive default rule set
    pub fn new() -> Self {
        Self::with_rules(FilterRuleSet::default())
    }

    pub fn with_rules(rules: FilterRuleSet) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(rules)),
            apply_lock: Mutex::new(()),
        }
    }

    /// Current rule snapshot
    pub fn snapshot(&self) -> Arc<FilterRuleSet> {
        self.current.load_full()
    }

    /// Compile `settings` into a new snapshot and make it current.
    ///
    /// Host and MIME patterns fall back to the previously active pattern when
    /// they fail to compile. Ports are always replaced.
    pub fn apply(&self, settings: &FilterSettings) -> ApplyOutcome {
        let _guard = self
            .apply_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = self.current.load_full();
        let mut errors = Vec::new();

        let host_pattern = match compile_host(&settings.host_allow) {
            Ok(re) => re,
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
                previous.host_pattern().clone()
            }
        };

        let mime_pattern = match compile_mime(&settings.mime_allow) {
            Ok(re) => re,
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
                previous.mime_pattern().clone()
            }
        };

        let rules = Arc::new(FilterRuleSet::new(
            host_pattern,
            parse_ports(&settings.port_allow),
            mime_pattern,
            settings.only_matches,
        ));

        self.current.store(rules.clone());
        info!("Filters applied: {}", rules);

        ApplyOutcome { rules, errors }
    }
}
