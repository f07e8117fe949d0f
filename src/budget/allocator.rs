//! Adaptive context-budget allocation.
//!
//! Splits a context window into named buckets. Fixed buckets take a constant
//! share per interaction mode; `response_generation` grows and
//! `conversation_memory` shrinks linearly with query complexity. Total
//! allocation always stays below the window so estimation error has headroom.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::complexity::{ComplexityAnalyzer, InteractionMode};

/// Minimum share of the window `response_generation` keeps when memory
/// reclaims tokens from it.
pub const RESPONSE_FLOOR_PCT: f64 = 10.0;

/// Share of the window `reserved` is reset to when memory reclaims tokens from
/// `response_generation`.
pub const RESERVED_FLOOR_PCT: f64 = 2.0;

/// Named share of the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    SystemPrompt,
    ToolDefinitions,
    ConversationMemory,
    ResponseGeneration,
    SafetyMargin,
    Reserved,
}

impl Bucket {
    /// All buckets in reporting order.
    pub const ALL: [Bucket; 6] = [
        Bucket::SystemPrompt,
        Bucket::ToolDefinitions,
        Bucket::ConversationMemory,
        Bucket::ResponseGeneration,
        Bucket::SafetyMargin,
        Bucket::Reserved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::SystemPrompt => "system_prompt",
            Bucket::ToolDefinitions => "tool_definitions",
            Bucket::ConversationMemory => "conversation_memory",
            Bucket::ResponseGeneration => "response_generation",
            Bucket::SafetyMargin => "safety_margin",
            Bucket::Reserved => "reserved",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage profile for one interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetProfile {
    pub system_prompt_pct: f64,
    pub tool_definitions_pct: f64,
    pub safety_margin_pct: f64,
    pub reserved_pct: f64,
    /// `response_generation` share at complexity 0 and 1
    pub response_range: (f64, f64),
    /// `conversation_memory` share at complexity 0 and 1
    pub memory_range: (f64, f64),
}

impl BudgetProfile {
    /// Plain conversation: almost no fixed overhead, most of the window for
    /// history.
    pub fn chat() -> Self {
        Self {
            system_prompt_pct: 0.6,
            tool_definitions_pct: 0.0,
            safety_margin_pct: 5.0,
            reserved_pct: 0.4,
            response_range: (12.0, 22.0),
            memory_range: (50.0, 38.0),
        }
    }

    /// Tool calling: room for tool schemas and a longer system prompt.
    pub fn tools() -> Self {
        Self {
            system_prompt_pct: 3.0,
            tool_definitions_pct: 6.0,
            safety_margin_pct: 5.0,
            reserved_pct: 0.0,
            response_range: (16.0, 26.0),
            memory_range: (55.0, 45.0),
        }
    }

    pub fn for_mode(mode: InteractionMode) -> Self {
        match mode {
            InteractionMode::Chat => Self::chat(),
            InteractionMode::Tools => Self::tools(),
        }
    }

    /// Response share for a complexity score.
    pub fn response_pct(&self, complexity: f64) -> f64 {
        let (low, high) = self.response_range;
        low + clamp_unit(complexity) * (high - low)
    }

    /// Memory share for a complexity score.
    pub fn memory_pct(&self, complexity: f64) -> f64 {
        let (high, low) = self.memory_range;
        high - clamp_unit(complexity) * (high - low)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Absolute tokens per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub system_prompt: u64,
    pub tool_definitions: u64,
    pub conversation_memory: u64,
    pub response_generation: u64,
    pub safety_margin: u64,
    pub reserved: u64,
}

impl BudgetAllocation {
    /// Sum of all buckets.
    pub fn total(&self) -> u64 {
        self.iter()
            .fold(0u64, |total, (_, tokens)| total.saturating_add(tokens))
    }

    /// Tokens in one bucket.
    pub fn get(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::SystemPrompt => self.system_prompt,
            Bucket::ToolDefinitions => self.tool_definitions,
            Bucket::ConversationMemory => self.conversation_memory,
            Bucket::ResponseGeneration => self.response_generation,
            Bucket::SafetyMargin => self.safety_margin,
            Bucket::Reserved => self.reserved,
        }
    }

    /// Buckets with their token counts in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, u64)> + '_ {
        Bucket::ALL.iter().map(move |&bucket| (bucket, self.get(bucket)))
    }

    /// Shrink the allocation until it fits `context_window`.
    ///
    /// Takes from `response_generation` down to its 10% floor first, then from
    /// `reserved`, then from `conversation_memory` down to `minimum_memory`.
    /// Returns the overflow that could not be reclaimed.
    pub fn fit_to_window(&mut self, context_window: u64, minimum_memory: u64) -> u64 {
        let mut excess = self.total().saturating_sub(context_window);
        if excess == 0 {
            return 0;
        }

        let response_floor = response_floor(context_window);
        let take = excess.min(self.response_generation.saturating_sub(response_floor));
        self.response_generation -= take;
        excess -= take;

        let take = excess.min(self.reserved);
        self.reserved -= take;
        excess -= take;

        let take = excess.min(self.conversation_memory.saturating_sub(minimum_memory));
        self.conversation_memory -= take;
        excess -= take;

        excess
    }
}

fn tokens_for(context_window: u64, pct: f64) -> u64 {
    (context_window as f64 * pct / 100.0).floor() as u64
}

fn response_floor(context_window: u64) -> u64 {
    tokens_for(context_window, RESPONSE_FLOOR_PCT)
}

/// Maps a context window, mode and query to a bucket allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetAllocator {
    analyzer: ComplexityAnalyzer,
}

impl BudgetAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.analyzer
    }

    /// Score `query` and allocate the window accordingly.
    pub fn allocate(
        &self,
        context_window: u64,
        mode: InteractionMode,
        query: &str,
        minimum_memory: u64,
    ) -> BudgetAllocation {
        let complexity = self.analyzer.analyze(query, mode);
        self.allocate_with_complexity(context_window, mode, complexity, minimum_memory)
    }

    /// Allocate the window for an already computed complexity score.
    ///
    /// When `minimum_memory` exceeds the memory share, the shortfall is taken
    /// from `reserved` first. If `reserved` cannot cover it, `reserved` is reset
    /// to 2% of the window and the rest comes from `response_generation` down
    /// to 10% of the window. `conversation_memory` is then set to
    /// `minimum_memory` even if that overcommits the window.
    pub fn allocate_with_complexity(
        &self,
        context_window: u64,
        mode: InteractionMode,
        complexity: f64,
        minimum_memory: u64,
    ) -> BudgetAllocation {
        let profile = BudgetProfile::for_mode(mode);
        let response_pct = profile.response_pct(complexity);
        let memory_pct = profile.memory_pct(complexity);

        let mut allocation = BudgetAllocation {
            system_prompt: tokens_for(context_window, profile.system_prompt_pct),
            tool_definitions: tokens_for(context_window, profile.tool_definitions_pct),
            conversation_memory: tokens_for(context_window, memory_pct),
            response_generation: tokens_for(context_window, response_pct),
            safety_margin: tokens_for(context_window, profile.safety_margin_pct),
            reserved: tokens_for(context_window, profile.reserved_pct),
        };

        if minimum_memory > allocation.conversation_memory {
            let mut shortage = minimum_memory - allocation.conversation_memory;

            if allocation.reserved >= shortage {
                allocation.reserved -= shortage;
                shortage = 0;
            } else {
                shortage -= allocation.reserved;
                allocation.reserved = tokens_for(context_window, RESERVED_FLOOR_PCT);

                let available = allocation
                    .response_generation
                    .saturating_sub(response_floor(context_window));
                let take = shortage.min(available);
                allocation.response_generation -= take;
                shortage -= take;
            }

            if shortage > 0 {
                debug!(
                    shortage,
                    minimum_memory, "Minimum memory overcommits the context window"
                );
            }
            allocation.conversation_memory = minimum_memory;
        }

        debug!(
            context_window,
            mode = %mode,
            complexity,
            response_pct,
            memory_pct,
            total = allocation.total(),
            "Allocated context budget"
        );

        allocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_profile_at_minimum_complexity() {
        let allocator = BudgetAllocator::new();
        let allocation = allocator.allocate_with_complexity(32768, InteractionMode::Chat, 0.0, 0);
        assert_eq!(allocation.system_prompt, 196);
        assert_eq!(allocation.tool_definitions, 0);
        assert_eq!(allocation.conversation_memory, 16384);
        assert_eq!(allocation.response_generation, 3932);
        assert_eq!(allocation.safety_margin, 1638);
        assert_eq!(allocation.reserved, 131);
        assert_eq!(allocation.total(), 22281);
    }

    #[test]
    fn test_tools_profile_at_maximum_complexity() {
        let allocator = BudgetAllocator::new();
        let allocation = allocator.allocate_with_complexity(32768, InteractionMode::Tools, 1.0, 0);
        assert_eq!(allocation.system_prompt, 983);
        assert_eq!(allocation.tool_definitions, 1966);
        assert_eq!(allocation.conversation_memory, 14745);
        assert_eq!(allocation.response_generation, 8519);
        assert_eq!(allocation.safety_margin, 1638);
        assert_eq!(allocation.reserved, 0);
        assert!(allocation.total() < 32768);
    }

    #[test]
    fn test_simple_query_favors_memory() {
        let allocator = BudgetAllocator::new();
        let allocation = allocator.allocate(32768, InteractionMode::Chat, "hi", 0);
        let memory_pct = allocation.conversation_memory as f64 / 32768.0 * 100.0;
        let response_pct = allocation.response_generation as f64 / 32768.0 * 100.0;
        assert!(memory_pct > 49.0 && memory_pct <= 50.0);
        assert!(response_pct >= 12.0 && response_pct < 13.0);
        assert!(allocation.total() < 32768);
    }

    #[test]
    fn test_complexity_moves_response_and_memory_inversely() {
        let allocator = BudgetAllocator::new();
        let low = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, 0.2, 0);
        let high = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, 0.8, 0);
        assert!(high.response_generation > low.response_generation);
        assert!(high.conversation_memory < low.conversation_memory);
    }

    #[test]
    fn test_out_of_range_complexity_is_clamped() {
        let allocator = BudgetAllocator::new();
        let over = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, 3.0, 0);
        let one = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, 1.0, 0);
        assert_eq!(over, one);
        let nan = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, f64::NAN, 0);
        let zero = allocator.allocate_with_complexity(10_000, InteractionMode::Chat, 0.0, 0);
        assert_eq!(nan, zero);
    }

    #[test]
    fn test_minimum_memory_from_reserved() {
        let allocator = BudgetAllocator::new();
        let allocation =
            allocator.allocate_with_complexity(32768, InteractionMode::Chat, 0.0, 16_400);
        assert_eq!(allocation.conversation_memory, 16_400);
        assert_eq!(allocation.reserved, 115);
        assert_eq!(allocation.response_generation, 3932);
    }

    #[test]
    fn test_minimum_memory_from_response() {
        let allocator = BudgetAllocator::new();
        let allocation =
            allocator.allocate_with_complexity(32768, InteractionMode::Chat, 0.0, 20_000);
        assert_eq!(allocation.conversation_memory, 20_000);
        assert_eq!(allocation.reserved, 655);
        assert_eq!(allocation.response_generation, 3276);
    }

    #[test]
    fn test_minimum_memory_larger_than_window() {
        let allocator = BudgetAllocator::new();
        let allocation = allocator.allocate_with_complexity(1000, InteractionMode::Tools, 0.5, 5000);
        assert_eq!(allocation.conversation_memory, 5000);
        assert_eq!(allocation.response_generation, 100);
        assert_eq!(allocation.reserved, 20);
        assert!(allocation.total() > 1000);
    }

    #[test]
    fn test_zero_window_allocates_nothing() {
        let allocator = BudgetAllocator::new();
        let allocation = allocator.allocate(0, InteractionMode::Chat, "hello", 0);
        assert_eq!(allocation.total(), 0);
    }

    #[test]
    fn test_fit_to_window_order() {
        let mut allocation = BudgetAllocation {
            system_prompt: 100,
            tool_definitions: 0,
            conversation_memory: 700,
            response_generation: 250,
            safety_margin: 50,
            reserved: 20,
        };
        // Total 1120, window 1000: response 250 -> 130 covers the excess
        assert_eq!(allocation.fit_to_window(1000, 0), 0);
        assert_eq!(allocation.response_generation, 130);
        assert_eq!(allocation.total(), 1000);

        let mut allocation = BudgetAllocation {
            system_prompt: 100,
            tool_definitions: 0,
            conversation_memory: 900,
            response_generation: 150,
            safety_margin: 50,
            reserved: 20,
        };
        // Total 1220: response -50, reserved -20, memory -150
        assert_eq!(allocation.fit_to_window(1000, 600), 0);
        assert_eq!(allocation.response_generation, 100);
        assert_eq!(allocation.reserved, 0);
        assert_eq!(allocation.conversation_memory, 750);

        let mut allocation = BudgetAllocation {
            conversation_memory: 2000,
            ..BudgetAllocation::default()
        };
        assert_eq!(allocation.fit_to_window(1000, 1500), 500);
        assert_eq!(allocation.conversation_memory, 1500);
    }

    #[test]
    fn test_bucket_iteration_order() {
        let allocation = BudgetAllocation {
            system_prompt: 1,
            tool_definitions: 2,
            conversation_memory: 3,
            response_generation: 4,
            safety_margin: 5,
            reserved: 6,
        };
        let names: Vec<_> = allocation.iter().map(|(b, _)| b.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "system_prompt",
                "tool_definitions",
                "conversation_memory",
                "response_generation",
                "safety_margin",
                "reserved"
            ]
        );
        assert_eq!(allocation.total(), 21);
    }

    #[test]
    fn test_allocation_serializes_bucket_names() {
        let allocation = BudgetAllocation::default();
        let value = serde_json::to_value(allocation).expect("serialize");
        assert!(value.get("conversation_memory").is_some());
        assert!(value.get("response_generation").is_some());
    }
}
