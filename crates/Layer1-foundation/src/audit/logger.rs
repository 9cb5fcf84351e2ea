//! Audit Log - in-memory, append-only record of security-relevant events

use super::types::{AuditEntry, AuditEvent, AuditQuery};
use crate::security::SecurityMode;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Audit log settings
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Entries retained; the oldest are dropped beyond this
    pub capacity: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

struct AuditState {
    entries: VecDeque<AuditEntry>,
    next_sequence: u64,
}

/// Append-only audit log owned by one controller
///
/// ```ignore
/// let audit = AuditLog::new(SecurityMode::Strict);
/// audit.record(AuditEvent::CommandBlocked, Some("web"), json!({"command": "rm -rf /"}));
/// let last = audit.recent(10);
/// ```
pub struct AuditLog {
    state: Mutex<AuditState>,
    mode: SecurityMode,
    config: AuditLogConfig,
}

impl AuditLog {
    pub fn new(mode: SecurityMode) -> Self {
        Self::with_config(mode, AuditLogConfig::default())
    }

    pub fn with_config(mode: SecurityMode, config: AuditLogConfig) -> Self {
        Self {
            state: Mutex::new(AuditState {
                entries: VecDeque::with_capacity(config.capacity.min(1024)),
                next_sequence: 1,
            }),
            mode,
            config,
        }
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.mode
    }

    /// Append an entry and mirror it to the tracing output
    pub fn record(&self, event: AuditEvent, resource: Option<&str>, details: Value) -> u64 {
        let mut state = self.state.lock();

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let entry = AuditEntry {
            sequence,
            timestamp: Utc::now(),
            event,
            resource: resource.map(str::to_string),
            details,
            security_mode: self.mode,
        };

        if event.is_security() {
            warn!(
                target: "harbor::audit",
                event = event.as_str(),
                resource = entry.resource.as_deref().unwrap_or("-"),
                details = %entry.details,
                "Security event"
            );
        } else {
            info!(
                target: "harbor::audit",
                event = event.as_str(),
                resource = entry.resource.as_deref().unwrap_or("-"),
                "Audit event"
            );
        }

        if self.config.capacity > 0 && state.entries.len() >= self.config.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry);

        sequence
    }

    /// Last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let state = self.state.lock();
        let skip = state.entries.len().saturating_sub(n);
        state.entries.iter().skip(skip).cloned().collect()
    }

    /// Matching entries, newest last, truncated to the query limit from the end
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let state = self.state.lock();
        let mut matched: Vec<AuditEntry> = state
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of security events currently retained
    pub fn security_event_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.event.is_security())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_and_recent() {
        let audit = AuditLog::new(SecurityMode::Strict);
        audit.record(AuditEvent::ResourceCreated, Some("a"), json!({}));
        audit.record(AuditEvent::StateChanged, Some("a"), json!({"to": "running"}));
        audit.record(AuditEvent::CommandBlocked, Some("a"), json!({"command": "rm -rf /"}));

        let recent = audit.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, AuditEvent::StateChanged);
        assert_eq!(recent[1].event, AuditEvent::CommandBlocked);
        assert_eq!(recent[1].security_mode, SecurityMode::Strict);
        assert!(recent[0].sequence < recent[1].sequence);
        assert_eq!(audit.security_event_count(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let audit = AuditLog::with_config(SecurityMode::Moderate, AuditLogConfig { capacity: 3 });
        for i in 0..5 {
            audit.record(AuditEvent::StateChanged, None, json!({ "i": i }));
        }
        let all = audit.recent(10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].details["i"], 2);
        assert_eq!(all[0].sequence, 3);
    }

    #[test]
    fn test_query() {
        let audit = AuditLog::new(SecurityMode::Moderate);
        audit.record(AuditEvent::ResourceCreated, Some("a"), json!({}));
        audit.record(AuditEvent::SecurityViolation, Some("b"), json!({}));
        audit.record(AuditEvent::CommandBlocked, Some("a"), json!({}));

        let for_a = audit.query(&AuditQuery::new().with_resource("a"));
        assert_eq!(for_a.len(), 2);

        let risky = audit.query(&AuditQuery::new().with_min_risk(7));
        assert_eq!(risky.len(), 2);

        let last = audit.query(&AuditQuery::new().with_limit(1));
        assert_eq!(last[0].event, AuditEvent::CommandBlocked);
    }
}
