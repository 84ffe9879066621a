//! Tiered, token-budgeted history compression
//!
//! Entries are bucketed by their distance from the current iteration:
//! the immediate window is kept verbatim, the recent window collapses to
//! one summary line per iteration, and everything older contributes to a
//! single milestone line. Compression must never block progress: any
//! internal failure returns the input unchanged.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::config::CompressionConfig;

use super::tokens::estimate_tokens;

/// Kind of a history entry, detected from its text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// An AI plan / thought
    Plan,
    /// A user reply
    UserResponse,
    /// A tool or step result
    Result,
}

/// One parsed history entry
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    /// Iteration the entry belongs to (0 when unlabelled)
    pub iteration: u32,
    /// Detected kind
    pub kind: EntryKind,
    /// Original text
    pub text: String,
    /// Estimated token count
    pub tokens: usize,
    /// Position in the input sequence
    pub index: usize,
}

fn iteration_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"迭代\s*(\d+)").unwrap(),
            Regex::new(r"第(\d+)轮").unwrap(),
            Regex::new(r"(?i)Round\s+(\d+)").unwrap(),
            Regex::new(r"(?i)Iteration\s+(\d+)").unwrap(),
        ]
    })
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:工具|tool)[:：]?\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

/// Content patterns that mark a history entry as a milestone
const MILESTONE_PATTERNS: [&str; 7] = [
    "文件创建成功",
    "项目初始化",
    "重大修改完成",
    "任务阶段完成",
    "用户交互完成",
    "taskComplete",
    "专家任务执行完成",
];

/// Parse one raw entry into its `(iteration, kind, tokens)` projection
pub fn parse_entry(text: &str, index: usize) -> ParsedEntry {
    let iteration = iteration_patterns()
        .iter()
        .find_map(|re| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
        .unwrap_or(0);

    let lower = text.to_lowercase();
    let kind = if text.contains("AI计划") || lower.contains("plan") {
        EntryKind::Plan
    } else if text.contains("用户回复") || lower.contains("user") {
        EntryKind::UserResponse
    } else {
        EntryKind::Result
    };

    ParsedEntry {
        iteration,
        kind,
        text: text.to_string(),
        tokens: estimate_tokens(text),
        index,
    }
}

/// Token-aware, tiered history compressor
#[derive(Debug, Clone)]
pub struct HistoryCompressor {
    config: CompressionConfig,
}

impl Default for HistoryCompressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

impl HistoryCompressor {
    /// Create a compressor with the given budget configuration
    pub fn new(config: CompressionConfig) -> Self {
        HistoryCompressor { config }
    }

    /// Compress `entries` relative to `current_iteration`.
    ///
    /// Never fails: any internal error returns the input unchanged.
    pub fn compress(&self, entries: &[String], current_iteration: u32) -> Vec<String> {
        match self.try_compress(entries, current_iteration) {
            Ok(compressed) => compressed,
            Err(e) => {
                warn!("History compression failed, passing history through: {}", e);
                entries.to_vec()
            }
        }
    }

    fn try_compress(
        &self,
        entries: &[String],
        current_iteration: u32,
    ) -> Result<Vec<String>, String> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let parsed: Vec<ParsedEntry> = entries
            .iter()
            .enumerate()
            .map(|(i, text)| parse_entry(text, i))
            .collect();

        let mut immediate = Vec::new();
        let mut recent = Vec::new();
        let mut milestone = Vec::new();

        for entry in parsed {
            if entry.iteration + 4 >= current_iteration {
                immediate.push(entry);
            } else if entry.iteration + 8 >= current_iteration {
                recent.push(entry);
            } else {
                milestone.push(entry);
            }
        }

        let total = self.config.budget_tokens as f64;
        let immediate_budget = (total * self.config.immediate_share) as usize;
        let recent_budget = (total * self.config.recent_share) as usize;
        let milestone_budget = (total * self.config.milestone_share) as usize;

        let mut out = self.compress_immediate(immediate, immediate_budget);
        out.extend(self.compress_recent(recent, recent_budget));
        out.extend(self.compress_milestone(milestone, milestone_budget));
        Ok(out)
    }

    /// Immediate tier: verbatim, newest iteration first, original order
    /// within an iteration, truncated tail-first at the budget.
    fn compress_immediate(&self, mut entries: Vec<ParsedEntry>, budget: usize) -> Vec<String> {
        entries.sort_by(|a, b| {
            b.iteration
                .cmp(&a.iteration)
                .then(a.index.cmp(&b.index))
        });

        let mut used = 0usize;
        let mut out = Vec::new();
        for entry in entries {
            if used + entry.tokens > budget {
                break;
            }
            used += entry.tokens;
            out.push(entry.text);
        }
        out
    }

    /// Recent tier: one summary line per iteration, newest first, stopping
    /// before the line that would exceed the budget.
    fn compress_recent(&self, entries: Vec<ParsedEntry>, budget: usize) -> Vec<String> {
        let mut by_iteration: BTreeMap<u32, Vec<ParsedEntry>> = BTreeMap::new();
        for entry in entries {
            by_iteration.entry(entry.iteration).or_default().push(entry);
        }

        let mut used = 0usize;
        let mut out = Vec::new();
        for (iteration, group) in by_iteration.into_iter().rev() {
            let line = summarize_iteration(iteration, &group);
            let line_tokens = estimate_tokens(&line);
            if used + line_tokens > budget {
                break;
            }
            used += line_tokens;
            out.push(line);
        }
        out
    }

    /// Milestone tier: a single aggregate line, or the minimal form when
    /// even the aggregate does not fit.
    fn compress_milestone(&self, entries: Vec<ParsedEntry>, budget: usize) -> Vec<String> {
        let milestones: Vec<&ParsedEntry> = entries
            .iter()
            .filter(|e| MILESTONE_PATTERNS.iter().any(|p| e.text.contains(p)))
            .collect();

        if milestones.is_empty() {
            return Vec::new();
        }

        let mut iterations: Vec<u32> = milestones.iter().map(|e| e.iteration).collect();
        iterations.sort_unstable();
        iterations.dedup();
        let iteration_list = iterations
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let latest_kind = milestones
            .iter()
            .max_by_key(|e| (e.iteration, e.index))
            .and_then(|latest| {
                MILESTONE_PATTERNS
                    .iter()
                    .find(|p| latest.text.contains(*p))
            })
            .copied()
            .unwrap_or("taskComplete");

        let full = format!(
            "## 🎯 里程碑: {}个节点 (迭代 {}) 最近: {}",
            milestones.len(),
            iteration_list,
            latest_kind
        );
        if estimate_tokens(&full) <= budget {
            vec![full]
        } else {
            vec![format!("## 🎯 里程碑: {}个节点", milestones.len())]
        }
    }
}

/// Build the `迭代 N: K次操作 ✅ … ❌ …` summary line for one iteration
fn summarize_iteration(iteration: u32, group: &[ParsedEntry]) -> String {
    let mut successes: BTreeMap<String, usize> = BTreeMap::new();
    let mut failures: BTreeMap<String, usize> = BTreeMap::new();

    for entry in group {
        let tool = tool_name_pattern()
            .captures(&entry.text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let Some(tool) = tool else { continue };

        let failed = entry.text.contains('❌')
            || entry.text.contains("失败")
            || entry.text.to_lowercase().contains("failed")
            || entry.text.to_lowercase().contains("error");
        if failed {
            *failures.entry(tool).or_insert(0) += 1;
        } else {
            *successes.entry(tool).or_insert(0) += 1;
        }
    }

    let render = |tools: &BTreeMap<String, usize>| {
        tools
            .iter()
            .map(|(name, count)| {
                if *count > 1 {
                    format!("{}({}次)", name, count)
                } else {
                    name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut line = format!("迭代 {}: {}次操作", iteration, group.len());
    if !successes.is_empty() {
        line.push_str(&format!(" ✅ {}", render(&successes)));
    }
    if !failures.is_empty() {
        line.push_str(&format!(" ❌ {}", render(&failures)));
    }
    line
}
