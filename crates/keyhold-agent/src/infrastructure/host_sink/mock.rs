//! In-memory [`PolicySink`] that records every call.
//!
//! Backs the `preview` command (show what the host would be sent without
//! connecting to one) and integration tests that need to inject failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use keyhold_core::{Category, Propagation, Rule};

use crate::application::commit_policies::{PolicySink, SinkError};

/// A [`PolicySink`] that keeps every accepted call in memory.
///
/// Failure injection is per call kind: while a fail flag is set the matching
/// calls return [`SinkError::Rejected`] and are not recorded.
#[derive(Debug, Default)]
pub struct RecordingSink {
    installs: Mutex<Vec<(Category, Vec<Rule>)>>,
    default_modes: Mutex<Vec<Propagation>>,
    fail_installs: AtomicBool,
    fail_default_mode: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent install calls fail (`true`) or succeed (`false`).
    pub fn set_fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent default-mode calls fail (`true`) or succeed (`false`).
    pub fn set_fail_default_mode(&self, fail: bool) {
        self.fail_default_mode.store(fail, Ordering::SeqCst);
    }

    /// Every accepted install, oldest first.
    pub fn installs(&self) -> Vec<(Category, Vec<Rule>)> {
        lock(&self.installs).clone()
    }

    /// Number of accepted installs across both categories.
    pub fn install_count(&self) -> usize {
        lock(&self.installs).len()
    }

    /// The list the host would currently hold for `category`, if any install
    /// for it has been accepted.
    pub fn installed(&self, category: Category) -> Option<Vec<Rule>> {
        lock(&self.installs)
            .iter()
            .rev()
            .find(|(c, _)| *c == category)
            .map(|(_, rules)| rules.clone())
    }

    /// The default mode the host would currently use, if one was set.
    pub fn default_mode(&self) -> Option<Propagation> {
        lock(&self.default_modes).last().copied()
    }

    /// Every accepted default-mode call, oldest first.
    pub fn default_modes(&self) -> Vec<Propagation> {
        lock(&self.default_modes).clone()
    }

    fn record_install(&self, category: Category, rules: Vec<Rule>) -> Result<(), SinkError> {
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected(format!("{category} install refused")));
        }
        lock(&self.installs).push((category, rules));
        Ok(())
    }
}

#[async_trait]
impl PolicySink for RecordingSink {
    async fn install_keyboard_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError> {
        self.record_install(Category::Keyboard, rules)
    }

    async fn install_pointer_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError> {
        self.record_install(Category::Pointer, rules)
    }

    async fn set_default_propagation_mode(&self, mode: Propagation) -> Result<(), SinkError> {
        if self.fail_default_mode.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("default mode refused".to_string()));
        }
        lock(&self.default_modes).push(mode);
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhold_core::{KeyId, Modifiers};

    fn rule(c: char) -> Rule {
        Rule::keydown(Propagation::Propagate, KeyId::Char(c), Modifiers::NONE)
    }

    #[tokio::test]
    async fn test_recording_sink_tracks_latest_install_per_category() {
        // Arrange
        let sink = RecordingSink::new();

        // Act
        sink.install_keyboard_policy(vec![rule('a')]).await.unwrap();
        sink.install_pointer_policy(Vec::new()).await.unwrap();
        sink.install_keyboard_policy(vec![rule('a'), rule('b')]).await.unwrap();

        // Assert
        assert_eq!(sink.install_count(), 3);
        assert_eq!(sink.installed(Category::Keyboard), Some(vec![rule('a'), rule('b')]));
        assert_eq!(sink.installed(Category::Pointer), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_recording_sink_failure_is_not_recorded() {
        let sink = RecordingSink::new();
        sink.set_fail_installs(true);

        let result = sink.install_keyboard_policy(vec![rule('a')]).await;

        assert!(matches!(result, Err(SinkError::Rejected(_))));
        assert_eq!(sink.install_count(), 0);
        assert_eq!(sink.installed(Category::Keyboard), None);
    }

    #[tokio::test]
    async fn test_recording_sink_default_mode() {
        let sink = RecordingSink::new();
        assert_eq!(sink.default_mode(), None);

        sink.set_default_propagation_mode(Propagation::Suppress).await.unwrap();
        sink.set_fail_default_mode(true);
        let refused = sink.set_default_propagation_mode(Propagation::Propagate).await;

        assert!(refused.is_err());
        assert_eq!(sink.default_modes(), vec![Propagation::Suppress]);
    }
}
