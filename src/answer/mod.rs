//! Answer synthesis - retrieved chunks to a cited answer
//!
//! Formats the retrieval results into a compliance-advisor prompt and asks
//! a hosted LLM (Groq chat completions) for a concise answer. This layer
//! only formats and delegates; ranking quality lives in the retriever.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retrieval::RetrievalResult;

// ============================================================================
// Configuration
// ============================================================================

/// Groq OpenAI-compatible chat completions endpoint
const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default model
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 2000;

/// Retry budget for 429 responses
const MAX_RETRIES: u32 = 3;
/// Initial backoff on retry (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// Types
// ============================================================================

/// A cited source attached to an answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    pub source: String,
    pub regulator: String,
    pub score: f64,
}

/// Synthesized answer with its citations
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
}

// ============================================================================
// Prompt
// ============================================================================

/// Render retrieved chunks into the prompt's context block
fn format_documents(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "Document {}:\nSource: {}\nRegulator: {}\nJurisdiction: {}\n\nContent:\n{}\n---\n",
                i + 1,
                doc.source,
                doc.regulator,
                doc.jurisdiction,
                doc.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full prompt for a question and its context
fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a senior banking compliance advisor. Provide precise, professional answers \
         about banking regulations, loan policies, KYC/AML compliance, Basel liquidity \
         standards and FATF AML/CFT guidelines.\n\n\
         CONTEXT FROM REGULATORY DOCUMENTS:\n{context}\n\n\
         USER QUESTION:\n{question}\n\n\
         GUIDELINES:\n\
         - Keep answer between 80-120 words (be concise and direct)\n\
         - State facts clearly without unnecessary elaboration\n\
         - Cite sources professionally using regulator names:\n\
           * \"The Basel Committee requires...\" or \"Basel standards state...\"\n\
           * \"FATF Recommendations require...\" or \"FATF guidelines mandate...\"\n\
           * \"UAE Central Bank circulars state...\" (if applicable)\n\
         - DO NOT say \"Document 1\" or \"Document 3\"\n\
         - Use bullet points for multiple items (if needed)\n\
         - Skip unnecessary phrases\n\
         - Get straight to the point\n\
         - If information is insufficient, state it briefly\n\n\
         CONCISE PROFESSIONAL ANSWER (80-120 words):"
    )
}

/// Drop repeated citations, keyed on (source, regulator)
///
/// Input is score-ordered, so the first (best-scored) occurrence survives.
pub fn dedup_sources(sources: &[SourceCitation]) -> Vec<SourceCitation> {
    let mut seen = std::collections::HashSet::new();
    sources
        .iter()
        .filter(|s| seen.insert((s.source.clone(), s.regulator.clone())))
        .cloned()
        .collect()
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// LLM-backed answer synthesizer
pub struct AnswerSynthesizer {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl AnswerSynthesizer {
    /// New synthesizer with the default model
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: GROQ_MODEL.to_string(),
        })
    }

    /// Build from the environment (GROQ_API_KEY)
    pub fn from_env() -> Result<Self> {
        let api_key = get_groq_api_key()?;
        Self::new(api_key)
    }

    /// Synthesize an answer from retrieved chunks
    ///
    /// Empty retrieval short-circuits to a canned answer without an LLM
    /// call; the citation list mirrors the retrieval order.
    pub async fn synthesize(
        &self,
        question: &str,
        retrieved: &[RetrievalResult],
    ) -> Result<RagAnswer> {
        if retrieved.is_empty() {
            return Ok(RagAnswer {
                answer: "I couldn't find any relevant information.".to_string(),
                sources: vec![],
            });
        }

        let context = format_documents(retrieved);
        let prompt = build_prompt(question, &context);

        let answer = self.complete(&prompt).await?;

        let sources = retrieved
            .iter()
            .map(|doc| SourceCitation {
                source: doc.source.clone(),
                regulator: doc.regulator.clone(),
                score: doc.score,
            })
            .collect();

        Ok(RagAnswer { answer, sources })
    }

    /// One chat completion with retry on rate limiting
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(GROQ_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send chat request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let chat: ChatResponse =
                    serde_json::from_str(&body).context("Failed to parse chat response")?;

                return chat
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| anyhow::anyhow!("Chat response contained no choices"));
            }

            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                anyhow::bail!("Groq API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after {} retries", MAX_RETRIES)))
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

// ============================================================================
// API Key Management
// ============================================================================

/// Load the Groq API key from GROQ_API_KEY
pub fn get_groq_api_key() -> Result<String> {
    match std::env::var("GROQ_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => anyhow::bail!(
            "GROQ_API_KEY not set.\n\
             Get a key at https://console.groq.com/ and run: export GROQ_API_KEY=gsk-..."
        ),
    }
}

/// True when an LLM API key is configured
pub fn has_groq_api_key() -> bool {
    std::env::var("GROQ_API_KEY")
        .map(|k| !k.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn result(source: &str, regulator: &str, score: f64) -> RetrievalResult {
        RetrievalResult {
            content: "Minimum CET1 ratio is 4.5% of risk-weighted assets.".to_string(),
            source: source.to_string(),
            regulator: regulator.to_string(),
            jurisdiction: "International".to_string(),
            score,
            chunk_id: 0,
        }
    }

    #[test]
    fn test_format_documents_includes_metadata() {
        let docs = vec![result("basel_iii.pdf", "Basel Committee", 0.9)];
        let formatted = format_documents(&docs);

        assert!(formatted.contains("Document 1:"));
        assert!(formatted.contains("Source: basel_iii.pdf"));
        assert!(formatted.contains("Regulator: Basel Committee"));
        assert!(formatted.contains("Jurisdiction: International"));
        assert!(formatted.contains("4.5%"));
    }

    #[test]
    fn test_build_prompt_embeds_question_and_context() {
        let prompt = build_prompt("What is the minimum CET1 ratio?", "some context");
        assert!(prompt.contains("What is the minimum CET1 ratio?"));
        assert!(prompt.contains("some context"));
        assert!(prompt.contains("banking compliance advisor"));
    }

    #[test]
    fn test_dedup_sources_keeps_first_occurrence() {
        let sources = vec![
            SourceCitation {
                source: "basel.pdf".to_string(),
                regulator: "Basel Committee".to_string(),
                score: 0.9,
            },
            SourceCitation {
                source: "basel.pdf".to_string(),
                regulator: "Basel Committee".to_string(),
                score: 0.5,
            },
            SourceCitation {
                source: "fatf.pdf".to_string(),
                regulator: "FATF".to_string(),
                score: 0.4,
            },
        ];

        let deduped = dedup_sources(&sources);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].score, 0.9);
        assert_eq!(deduped[1].regulator, "FATF");
    }

    #[tokio::test]
    async fn test_empty_retrieval_short_circuits() {
        let synthesizer = AnswerSynthesizer::new("fake_key".to_string()).unwrap();
        let answer = synthesizer.synthesize("anything", &[]).await.unwrap();

        assert!(answer.answer.contains("couldn't find"));
        assert!(answer.sources.is_empty());
    }
}
