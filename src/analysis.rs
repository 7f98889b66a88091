//! Document analysis built from independent capabilities.
//!
//! An [`Analyzer`] extracts and chunks a document once, then hands the
//! result to each [`Capability`] in turn. Every capability owns one part of
//! the [`AnalysisReport`] and degrades on its own: a failed LLM call leaves
//! its section empty (or at its fallback) without affecting the others.
//! Only extraction failures abort an analysis.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::chunk::Chunker;
use crate::error::Result;
use crate::extract::extract_text;
use crate::llm::{ChatModel, CompletionRequest};
use crate::models::Chunk;
use crate::tokens::TokenBudget;

pub const SUMMARY_FALLBACK: &str = "Unable to generate summary";

/// Characters of document text sent to the review prompt.
const REVIEW_CHAR_LIMIT: usize = 15_000;

const MITIGATION_LABEL: &str = "mitigation:";

const RISK_PROMPT: &str = "You are a legal analyst reviewing a contract under Russian law. \
Identify AT LEAST 3 risks in the document. Write each risk as its own paragraph, separated \
by a blank line, and for every risk state the risk level (Low/Medium/High), a full \
description, the potential consequences, and a line starting with 'Mitigation:'. \
If there are no material risks, say so explicitly.";

const SUMMARY_PROMPT: &str = "Prepare a professional, detailed summary of the document: \
its type, purpose and context; the key sections and how they relate; strengths and \
weaknesses; and expert conclusions with recommendations for use and revision.";

const QA_PROMPT: &str = "Answer the question using only the document context provided. \
If an exact answer is not possible, give the most relevant information and explain why.";

const REVIEW_PROMPT: &str = "Perform a comprehensive legal analysis of the document under \
Russian law, paying attention to contractual obligations, loopholes, compliance, and \
financial and legal risks. Answer in exactly this format:\n\
Key provisions: [list]\n\
Risks: [list]\n\
Recommendations: [list]\n\
Compliance notes: [list]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Risk {
    pub severity: Severity,
    pub description: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QaAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Review {
    pub key_provisions: Vec<String>,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub compliance_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub file_name: String,
    pub risks: Vec<Risk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<QaAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<Review>,
    pub revised_document: Option<String>,
}

/// Extracted text and its chunks, shared by all capabilities.
pub struct AnalysisInput<'a> {
    pub file_name: &'a str,
    pub text: &'a str,
    pub chunks: &'a [Chunk],
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, llm: &dyn ChatModel, input: &AnalysisInput<'_>, report: &mut AnalysisReport);
}

pub struct Analyzer {
    llm: Arc<dyn ChatModel>,
    chunker: Chunker,
    capabilities: Vec<Box<dyn Capability>>,
}

impl Analyzer {
    pub fn new(llm: Arc<dyn ChatModel>, chunker: Chunker) -> Self {
        Self {
            llm,
            chunker,
            capabilities: Vec::new(),
        }
    }

    pub fn with(mut self, capability: impl Capability + 'static) -> Self {
        self.capabilities.push(Box::new(capability));
        self
    }

    /// Risks, summary, answers to `questions` (if any) and the revision slot.
    pub fn comprehensive(
        llm: Arc<dyn ChatModel>,
        chunker: Chunker,
        tokens: Arc<TokenBudget>,
        token_budget: usize,
        questions: Vec<String>,
    ) -> Self {
        let mut analyzer = Self::new(llm, chunker)
            .with(RiskCapability)
            .with(SummaryCapability);
        if !questions.is_empty() {
            analyzer = analyzer.with(QaCapability {
                questions,
                tokens,
                token_budget,
            });
        }
        analyzer.with(RevisionCapability)
    }

    /// Sectioned review only.
    pub fn review(llm: Arc<dyn ChatModel>, chunker: Chunker) -> Self {
        Self::new(llm, chunker).with(ReviewCapability)
    }

    pub fn capability_names(&self) -> Vec<&'static str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub async fn analyze(&self, file_name: &str, bytes: &[u8]) -> Result<AnalysisReport> {
        let text = extract_text(bytes, file_name).map_err(|e| {
            tracing::error!(file = file_name, error = %e, "analysis aborted: extraction failed");
            e
        })?;
        Ok(self.analyze_text(file_name, &text).await)
    }

    pub async fn analyze_text(&self, file_name: &str, text: &str) -> AnalysisReport {
        let chunks = self.chunker.chunk(file_name, text);
        let input = AnalysisInput {
            file_name,
            text,
            chunks: &chunks,
        };
        let mut report = AnalysisReport {
            file_name: file_name.to_string(),
            ..AnalysisReport::default()
        };
        for capability in &self.capabilities {
            tracing::debug!(capability = capability.name(), file = file_name, "running capability");
            capability.apply(self.llm.as_ref(), &input, &mut report).await;
        }
        tracing::info!(
            file = file_name,
            chunks = chunks.len(),
            risks = report.risks.len(),
            "analysis complete"
        );
        report
    }
}

pub struct RiskCapability;

#[async_trait]
impl Capability for RiskCapability {
    fn name(&self) -> &'static str {
        "risks"
    }

    async fn apply(&self, llm: &dyn ChatModel, input: &AnalysisInput<'_>, report: &mut AnalysisReport) {
        let request = CompletionRequest::new(RISK_PROMPT, format!("Document text:\n{}", input.text));
        report.risks = match llm.complete(&request).await {
            Ok(reply) => parse_risks(&reply),
            Err(e) => {
                tracing::warn!(file = input.file_name, error = %e, "risk analysis failed");
                Vec::new()
            }
        };
    }
}

pub struct SummaryCapability;

#[async_trait]
impl Capability for SummaryCapability {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn apply(&self, llm: &dyn ChatModel, input: &AnalysisInput<'_>, report: &mut AnalysisReport) {
        let joined = input
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let request = CompletionRequest::new(SUMMARY_PROMPT, format!("Document text:\n{}", joined));
        let summary = match llm.complete(&request).await {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => SUMMARY_FALLBACK.to_string(),
            Err(e) => {
                tracing::warn!(file = input.file_name, error = %e, "summary generation failed");
                SUMMARY_FALLBACK.to_string()
            }
        };
        report.summary = Some(summary);
    }
}

pub struct QaCapability {
    pub questions: Vec<String>,
    pub tokens: Arc<TokenBudget>,
    pub token_budget: usize,
}

#[async_trait]
impl Capability for QaCapability {
    fn name(&self) -> &'static str {
        "qa"
    }

    async fn apply(&self, llm: &dyn ChatModel, input: &AnalysisInput<'_>, report: &mut AnalysisReport) {
        let context = self.tokens.truncate(input.text, self.token_budget);
        for question in &self.questions {
            let request = CompletionRequest::new(QA_PROMPT, question.clone())
                .with_context(Some(context.clone()));
            match llm.complete(&request).await {
                Ok(answer) => report.answers.push(QaAnswer {
                    question: question.clone(),
                    answer,
                }),
                Err(e) => {
                    tracing::warn!(file = input.file_name, question = %question, error = %e, "question answering failed")
                }
            }
        }
    }
}

pub struct ReviewCapability;

#[async_trait]
impl Capability for ReviewCapability {
    fn name(&self) -> &'static str {
        "review"
    }

    async fn apply(&self, llm: &dyn ChatModel, input: &AnalysisInput<'_>, report: &mut AnalysisReport) {
        let head: String = input.text.chars().take(REVIEW_CHAR_LIMIT).collect();
        let request = CompletionRequest::new(
            REVIEW_PROMPT,
            format!("Analyze the following document: {}", head),
        );
        match llm.complete(&request).await {
            Ok(reply) => report.review = Some(parse_review(&reply)),
            Err(e) => tracing::warn!(file = input.file_name, error = %e, "document review failed"),
        }
    }
}

/// Placeholder for automated document revision; never produces a revision.
pub struct RevisionCapability;

#[async_trait]
impl Capability for RevisionCapability {
    fn name(&self) -> &'static str {
        "revision"
    }

    async fn apply(&self, _llm: &dyn ChatModel, _input: &AnalysisInput<'_>, report: &mut AnalysisReport) {
        report.revised_document = None;
    }
}

fn first_severity(lower: &str) -> Severity {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| match word {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        })
        .unwrap_or(Severity::Unknown)
}

/// Parse a risk reply into blank-line separated risk blocks.
///
/// A block counts when it mentions low, medium or high anywhere; its
/// severity is the first of those appearing as a whole word.
pub fn parse_risks(reply: &str) -> Vec<Risk> {
    if reply.trim().chars().count() < 10 {
        return Vec::new();
    }

    let mut risks = Vec::new();
    for block in reply.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let lower = block.to_lowercase();
        if !["low", "medium", "high"].iter().any(|k| lower.contains(k)) {
            continue;
        }
        let mitigation = block
            .lines()
            .find_map(|line| {
                let l = line.trim().trim_start_matches(['-', '*', '•', ' ']);
                let label = l.get(..MITIGATION_LABEL.len())?;
                label
                    .eq_ignore_ascii_case(MITIGATION_LABEL)
                    .then(|| l[MITIGATION_LABEL.len()..].trim().to_string())
            })
            .unwrap_or_default();
        risks.push(Risk {
            severity: first_severity(&lower),
            description: block.to_string(),
            mitigation,
        });
    }
    risks
}

/// Parse `Key provisions:` / `Risks:` / `Recommendations:` /
/// `Compliance notes:` sections into bullet lists.
pub fn parse_review(reply: &str) -> Review {
    #[derive(Clone, Copy)]
    enum Section {
        Provisions,
        Risks,
        Recommendations,
        Compliance,
    }

    let mut review = Review::default();
    let mut current = None;
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        let header = if lower.contains("key provisions:") {
            Some(Section::Provisions)
        } else if lower.contains("compliance notes:") {
            Some(Section::Compliance)
        } else if lower.contains("recommendations:") {
            Some(Section::Recommendations)
        } else if lower.contains("risks:") {
            Some(Section::Risks)
        } else {
            None
        };
        if header.is_some() {
            current = header;
            continue;
        }
        if line.ends_with(':') {
            continue;
        }
        let item = line.trim_start_matches(['-', '•', '*', ' ']).trim();
        if item.is_empty() {
            continue;
        }
        let target = match current {
            Some(Section::Provisions) => &mut review.key_provisions,
            Some(Section::Risks) => &mut review.risks,
            Some(Section::Recommendations) => &mut review.recommendations,
            Some(Section::Compliance) => &mut review.compliance_notes,
            None => continue,
        };
        target.push(item.to_string());
    }
    review
}
