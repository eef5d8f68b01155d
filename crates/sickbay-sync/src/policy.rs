//! Per-view reconciliation policy: how each signal is absorbed.

use crate::bus::Signal;

/// What a view does when a signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
  /// Mark the view dirty; the next reconcile pass reloads it from the store.
  FullRefetch,
  /// Keep the loaded data and apply the changed row in place.
  RetainAndPatch,
}

/// A static `signal -> strategy` table, fixed when the view is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
  rules: Vec<(Signal, Strategy)>,
}

impl ReconcilePolicy {
  pub fn new() -> Self { Self::default() }

  /// Add a rule. A later rule for the same signal replaces the earlier one.
  pub fn on(mut self, signal: Signal, strategy: Strategy) -> Self {
    match self.rules.iter_mut().find(|(s, _)| *s == signal) {
      Some(rule) => rule.1 = strategy,
      None => self.rules.push((signal, strategy)),
    }
    self
  }

  pub fn refetch_on(self, signal: Signal) -> Self { self.on(signal, Strategy::FullRefetch) }

  pub fn patch_on(self, signal: Signal) -> Self { self.on(signal, Strategy::RetainAndPatch) }

  pub fn strategy(&self, signal: Signal) -> Option<Strategy> {
    self.rules.iter().find(|(s, _)| *s == signal).map(|(_, strategy)| *strategy)
  }

  /// Signals to subscribe on the bus.
  pub fn refetch_signals(&self) -> impl Iterator<Item = Signal> + '_ {
    self.signals_with(Strategy::FullRefetch)
  }

  /// Signals to register with the feed's patch registry.
  pub fn patch_signals(&self) -> impl Iterator<Item = Signal> + '_ {
    self.signals_with(Strategy::RetainAndPatch)
  }

  fn signals_with(&self, strategy: Strategy) -> impl Iterator<Item = Signal> + '_ {
    self
      .rules
      .iter()
      .filter(move |(_, s)| *s == strategy)
      .map(|(signal, _)| *signal)
  }
}
