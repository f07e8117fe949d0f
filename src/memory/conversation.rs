//! Ordered exchange history and the trimming rules applied to it.
//!
//! A conversation only ever grows at the tail and shrinks at the head: every
//! selection here returns a contiguous suffix in chronological order.

use serde::{Deserialize, Serialize};

use crate::memory::record::{DateRange, Exchange};

/// Share of the context window a stored conversation may occupy.
pub const DEFAULT_WINDOW_TRIM_RATIO: f64 = 0.8;

/// Chronologically ordered exchanges for one model identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    exchanges: Vec<Exchange>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exchanges(exchanges: Vec<Exchange>) -> Self {
        Self { exchanges }
    }

    /// Append an exchange at the tail.
    pub fn push(&mut self, exchange: Exchange) {
        self.exchanges.push(exchange);
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn into_exchanges(self) -> Vec<Exchange> {
        self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Sum of stored token counts.
    pub fn total_tokens(&self) -> u64 {
        self.exchanges.iter().map(Exchange::token_count).sum()
    }

    /// The most recent `count` exchanges.
    pub fn recent(&self, count: usize) -> &[Exchange] {
        let start = self.exchanges.len().saturating_sub(count);
        &self.exchanges[start..]
    }

    /// Timestamps of the oldest and newest exchange.
    pub fn date_range(&self) -> Option<DateRange> {
        Some(DateRange {
            start: self.exchanges.first()?.timestamp,
            end: self.exchanges.last()?.timestamp,
        })
    }

    /// Most recent exchanges whose stored token counts fit `budget`.
    pub fn trim_to_budget(&self, budget: u64) -> &[Exchange] {
        trim_to_budget(&self.exchanges, budget)
    }

    /// Drop the oldest exchanges while the stored total exceeds
    /// `context_window * ratio`, always keeping the newest one.
    ///
    /// Returns the number of exchanges removed.
    pub fn trim_to_window(&mut self, context_window: u64, ratio: f64) -> usize {
        let limit = (context_window as f64 * ratio) as u64;
        let mut total = self.total_tokens();
        let mut removed = 0;

        while self.exchanges.len() - removed > 1 && total > limit {
            total -= self.exchanges[removed].token_count();
            removed += 1;
        }

        if removed > 0 {
            self.exchanges.drain(..removed);
        }
        removed
    }
}

impl From<Vec<Exchange>> for Conversation {
    fn from(exchanges: Vec<Exchange>) -> Self {
        Self::from_exchanges(exchanges)
    }
}

/// Greedy recency-biased selection.
///
/// Walks from the newest exchange backward, keeping exchanges while the
/// running `cost` stays within `budget`, and stops at the first one that would
/// overflow. The newest exchange is kept even when it alone exceeds a non-zero
/// budget. A zero budget selects nothing.
pub fn select_recent<F>(exchanges: &[Exchange], budget: u64, mut cost: F) -> &[Exchange]
where
    F: FnMut(&Exchange) -> u64,
{
    if budget == 0 {
        return &[];
    }

    let mut total: u64 = 0;
    let mut start = exchanges.len();
    for (index, exchange) in exchanges.iter().enumerate().rev() {
        let next = total.saturating_add(cost(exchange));
        if next > budget && start < exchanges.len() {
            break;
        }
        total = next;
        start = index;
        if total > budget {
            break;
        }
    }

    &exchanges[start..]
}

/// Greedy selection by stored token counts.
pub fn trim_to_budget(exchanges: &[Exchange], budget: u64) -> &[Exchange] {
    select_recent(exchanges, budget, Exchange::token_count)
}

/// Greedy selection with a floor on the number of exchanges returned.
///
/// When the budget admits fewer than `minimum_exchanges`, the most recent
/// `minimum_exchanges` are returned regardless of cost.
pub fn select_within_budget<F>(
    exchanges: &[Exchange],
    budget: u64,
    minimum_exchanges: usize,
    cost: F,
) -> &[Exchange]
where
    F: FnMut(&Exchange) -> u64,
{
    let selected = select_recent(exchanges, budget, cost);
    if selected.len() >= minimum_exchanges {
        return selected;
    }
    let start = exchanges.len().saturating_sub(minimum_exchanges);
    &exchanges[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn exchanges(costs: &[u64]) -> Vec<Exchange> {
        let base = Utc::now();
        costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| {
                Exchange::with_tokens(format!("q{}", i), cost / 2, format!("a{}", i), cost - cost / 2)
                    .at(base + Duration::seconds(i as i64))
            })
            .collect()
    }

    fn contents(selected: &[Exchange]) -> Vec<String> {
        selected.iter().map(|e| e.user.content.clone()).collect()
    }

    #[test]
    fn test_trim_to_budget_keeps_recent_suffix() {
        let all = exchanges(&[500, 500, 500, 500, 500]);
        let selected = trim_to_budget(&all, 1200);
        assert_eq!(contents(selected), vec!["q3", "q4"]);
    }

    #[test]
    fn test_trim_to_budget_stops_at_first_overflow() {
        // The oldest exchange would fit on its own, but the walk stops at q1.
        let all = exchanges(&[10, 900, 100]);
        let selected = trim_to_budget(&all, 500);
        assert_eq!(contents(selected), vec!["q2"]);
    }

    #[test]
    fn test_trim_to_budget_keeps_newest_when_oversized() {
        let all = exchanges(&[10, 5000]);
        let selected = trim_to_budget(&all, 100);
        assert_eq!(contents(selected), vec!["q1"]);
    }

    #[test]
    fn test_trim_to_budget_zero_and_empty() {
        let all = exchanges(&[10, 10]);
        assert!(trim_to_budget(&all, 0).is_empty());
        assert!(trim_to_budget(&[], 1000).is_empty());
    }

    #[test]
    fn test_trim_to_budget_everything_fits() {
        let all = exchanges(&[100, 200, 300]);
        assert_eq!(trim_to_budget(&all, 600).len(), 3);
    }

    #[test]
    fn test_minimum_exchanges_override() {
        let all = exchanges(&[500, 500, 500, 500]);
        let selected = select_within_budget(&all, 600, 3, Exchange::token_count);
        assert_eq!(contents(selected), vec!["q1", "q2", "q3"]);

        let capped = select_within_budget(&all, 600, 10, Exchange::token_count);
        assert_eq!(capped.len(), 4);
    }

    #[test]
    fn test_trim_to_window_drops_oldest() {
        let mut conversation = Conversation::from_exchanges(exchanges(&[400, 400, 400]));
        // Limit 1000 * 0.8 = 800
        let removed = conversation.trim_to_window(1000, DEFAULT_WINDOW_TRIM_RATIO);
        assert_eq!(removed, 1);
        assert_eq!(contents(conversation.exchanges()), vec!["q1", "q2"]);
    }

    #[test]
    fn test_trim_to_window_never_empties() {
        let mut conversation = Conversation::from_exchanges(exchanges(&[5000, 9000]));
        let removed = conversation.trim_to_window(1000, DEFAULT_WINDOW_TRIM_RATIO);
        assert_eq!(removed, 1);
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.exchanges()[0].user.content, "q1");
    }

    #[test]
    fn test_recent_and_date_range() {
        let conversation = Conversation::from_exchanges(exchanges(&[1, 2, 3]));
        assert_eq!(contents(conversation.recent(2)), vec!["q1", "q2"]);
        assert_eq!(conversation.recent(10).len(), 3);

        let range = conversation.date_range().expect("range");
        assert!(range.start < range.end);
        assert!(Conversation::new().date_range().is_none());
    }
}
