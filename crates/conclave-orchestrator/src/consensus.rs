//! Consensus merging of independent agent analyses.
//!
//! Findings from every response are grouped into connected components, two
//! findings being linked by an equal id or by a pluggable [`FindingMatcher`].
//! Each group is then scored for agreement.

use conclave_core::{AgentResponse, ConclaveError, ConclaveResult, Finding, TokenCount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Fraction of participants at or above which a group counts as majority.
const MAJORITY_THRESHOLD: f64 = 0.66;

/// One agent's response, labelled with the agent that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcedResponse {
    /// Agent id, e.g. `reviewer:model-x`.
    pub source: String,
    /// The response as returned.
    pub response: AgentResponse,
}

impl SourcedResponse {
    /// Label `response` with its source.
    pub fn new(source: impl Into<String>, response: AgentResponse) -> Self {
        Self {
            source: source.into(),
            response,
        }
    }
}

/// How many participants reported a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusLevel {
    Unanimous,
    Majority,
    Minority,
}

/// A deduplicated finding with full provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedFinding {
    /// Display fields come from the first finding of the group; `confidence`
    /// is the mean over all members.
    #[serde(flatten)]
    pub finding: Finding,
    /// Contributing agents, in first-seen order.
    pub sources: Vec<String>,
    /// Confidence per contributing agent.
    pub confidences: BTreeMap<String, f64>,
    /// How many participants reported it.
    pub consensus_level: ConsensusLevel,
    /// 1 minus twice the confidence spread; a lone finding keeps its confidence.
    pub agreement_score: f64,
}

/// Result of one merge. Computed fresh on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// One entry per group, in first-seen order.
    pub merged_findings: Vec<MergedFinding>,
    /// Mean agreement score; 1.0 when nobody reported anything.
    pub overall_agreement: f64,
    /// Minority findings.
    pub disagreement_hotspots: Vec<MergedFinding>,
    /// How evenly findings are spread across participants, in `[0, 1]`.
    pub model_alignment_score: f64,
    /// Distinct sources, in first-seen order.
    pub participants: Vec<String>,
    /// Findings reported per source.
    pub finding_counts: BTreeMap<String, usize>,
    /// First non-empty summary per source.
    pub summaries: BTreeMap<String, String>,
    /// Tokens summed over all responses.
    pub total_tokens: TokenCount,
}

/// Decides whether two findings without a shared id describe the same issue.
pub trait FindingMatcher: Send + Sync {
    fn matches(&self, base: &Finding, candidate: &Finding) -> bool;
}

impl<F> FindingMatcher for F
where
    F: Fn(&Finding, &Finding) -> bool + Send + Sync,
{
    fn matches(&self, base: &Finding, candidate: &Finding) -> bool {
        self(base, candidate)
    }
}

/// Same type and location, and the first `prefix_len` characters of either
/// description occur in the other.
#[derive(Debug, Clone, Copy)]
pub struct PrefixOverlapMatcher {
    prefix_len: usize,
}

impl Default for PrefixOverlapMatcher {
    fn default() -> Self {
        Self { prefix_len: 20 }
    }
}

impl PrefixOverlapMatcher {
    /// Matcher comparing `prefix_len` leading characters. Zero is rejected:
    /// an empty prefix would match every description.
    pub fn new(prefix_len: usize) -> ConclaveResult<Self> {
        if prefix_len == 0 {
            return Err(ConclaveError::Configuration(
                "prefix_len must be at least 1".to_string(),
            ));
        }
        Ok(Self { prefix_len })
    }

    /// Number of leading characters compared.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    fn prefix<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.prefix_len) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}

impl FindingMatcher for PrefixOverlapMatcher {
    fn matches(&self, base: &Finding, candidate: &Finding) -> bool {
        if base.finding_type != candidate.finding_type || base.location != candidate.location {
            return false;
        }
        candidate
            .description
            .contains(self.prefix(&base.description))
            || base
                .description
                .contains(self.prefix(&candidate.description))
    }
}

struct Group<'a> {
    base: &'a Finding,
    members: Vec<(&'a str, &'a Finding)>,
}

/// Disjoint-set over finding indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// The smaller root survives, so a group's root is its first-seen member.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, absorbed) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[absorbed] = keep;
        }
    }
}

/// Merges N responses into a [`ConsensusReport`].
pub struct ConsensusBuilder {
    matcher: Box<dyn FindingMatcher>,
}

impl Default for ConsensusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusBuilder {
    /// Builder using [`PrefixOverlapMatcher`].
    pub fn new() -> Self {
        Self {
            matcher: Box::new(PrefixOverlapMatcher::default()),
        }
    }

    /// Replace the similarity heuristic.
    pub fn with_matcher(mut self, matcher: impl FindingMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Merge `responses`. Fails on an empty list or a malformed finding.
    pub fn build(&self, responses: &[SourcedResponse]) -> ConclaveResult<ConsensusReport> {
        if responses.is_empty() {
            return Err(ConclaveError::Consensus(
                "cannot build consensus from zero responses".to_string(),
            ));
        }

        let mut participants: Vec<String> = Vec::new();
        let mut finding_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        let mut total_tokens = TokenCount::default();

        for r in responses {
            if r.source.trim().is_empty() {
                return Err(ConclaveError::Validation(
                    "consensus response without a source".to_string(),
                ));
            }
            for finding in &r.response.findings {
                finding.validate()?;
            }
            if !participants.contains(&r.source) {
                participants.push(r.source.clone());
            }
            *finding_counts.entry(r.source.clone()).or_default() += r.response.findings.len();
            if !r.response.summary.is_empty() {
                summaries
                    .entry(r.source.clone())
                    .or_insert_with(|| r.response.summary.clone());
            }
            total_tokens += r.response.tokens_used;
        }

        let groups = self.group(responses);
        let n = participants.len() as f64;
        let merged_findings: Vec<MergedFinding> =
            groups.iter().map(|g| merge_group(g, n)).collect();

        let overall_agreement = if merged_findings.is_empty() {
            1.0
        } else {
            merged_findings.iter().map(|m| m.agreement_score).sum::<f64>()
                / merged_findings.len() as f64
        };
        let disagreement_hotspots = merged_findings
            .iter()
            .filter(|m| m.consensus_level == ConsensusLevel::Minority)
            .cloned()
            .collect();
        let counts: Vec<f64> = finding_counts.values().map(|c| *c as f64).collect();
        let model_alignment_score = alignment(&counts);

        debug!(
            participants = participants.len(),
            groups = merged_findings.len(),
            overall_agreement,
            "Consensus built"
        );

        Ok(ConsensusReport {
            merged_findings,
            overall_agreement,
            disagreement_hotspots,
            model_alignment_score,
            participants,
            finding_counts,
            summaries,
            total_tokens,
        })
    }

    /// Connected components over "same id or matcher agrees", so the
    /// grouping does not depend on response order.
    fn group<'a>(&self, responses: &'a [SourcedResponse]) -> Vec<Group<'a>> {
        let items: Vec<(&'a str, &'a Finding)> = responses
            .iter()
            .flat_map(|r| r.response.findings.iter().map(move |f| (r.source.as_str(), f)))
            .collect();

        let mut sets = UnionFind::new(items.len());
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                let (a, b) = (items[i].1, items[j].1);
                if a.id == b.id || self.matcher.matches(a, b) {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: Vec<Group<'a>> = Vec::new();
        let mut slot_of_root: BTreeMap<usize, usize> = BTreeMap::new();
        for (i, &(source, finding)) in items.iter().enumerate() {
            let root = sets.find(i);
            match slot_of_root.get(&root) {
                Some(&slot) => groups[slot].members.push((source, finding)),
                None => {
                    slot_of_root.insert(root, groups.len());
                    groups.push(Group {
                        base: finding,
                        members: vec![(source, finding)],
                    });
                }
            }
        }
        groups
    }
}

fn merge_group(group: &Group<'_>, participants: f64) -> MergedFinding {
    let values: Vec<f64> = group.members.iter().map(|(_, f)| f.confidence).collect();
    let mean_confidence = mean(&values);

    let mut sources: Vec<String> = Vec::new();
    let mut per_source: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (source, finding) in &group.members {
        if !sources.iter().any(|s| s == source) {
            sources.push((*source).to_string());
        }
        per_source
            .entry((*source).to_string())
            .or_default()
            .push(finding.confidence);
    }
    let confidences = per_source
        .into_iter()
        .map(|(source, v)| (source, mean(&v)))
        .collect();

    let fraction = sources.len() as f64 / participants;
    let consensus_level = if fraction >= 1.0 {
        ConsensusLevel::Unanimous
    } else if fraction >= MAJORITY_THRESHOLD {
        ConsensusLevel::Majority
    } else {
        ConsensusLevel::Minority
    };

    let agreement_score = if values.len() == 1 {
        values[0]
    } else {
        (1.0 - 2.0 * std_dev(&values)).max(0.0)
    };

    let mut finding = group.base.clone();
    finding.confidence = mean_confidence;

    MergedFinding {
        finding,
        sources,
        confidences,
        consensus_level,
        agreement_score,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// `1 - var(counts) / (mean + 1)`, floored at 0.
fn alignment(counts: &[f64]) -> f64 {
    (1.0 - variance(counts) / (mean(counts) + 1.0)).clamp(0.0, 1.0)
}
