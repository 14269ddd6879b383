//! Compliance analysis prompt.

use scanward_core::domain::{Finding, RetrievalContext};

/// Render retrieved chunks as numbered, source-attributed blocks.
pub fn render_context(context: &RetrievalContext) -> String {
    context
        .chunks()
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "Relevant Compliance Context {} (from {}):\n{}",
                i + 1,
                chunk.source_file,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt asking for the top `top_k` regulations `finding` violates, as a
/// JSON array of `{regulation, reason}`.
pub fn compliance_prompt(finding: &Finding, context: &RetrievalContext, top_k: usize) -> String {
    format!(
        r#"You are a cybersecurity compliance expert. Based on the retrieved compliance documentation context below, analyze the given vulnerability and identify the top {top_k} compliance regulations or standards that this vulnerability most likely violates.

RETRIEVED COMPLIANCE CONTEXT:
{context}

VULNERABILITY TO ANALYZE:
Name: {name}
Description: {description}

INSTRUCTIONS:
1. Use the retrieved compliance context above to identify relevant regulations
2. Focus on the most specific and applicable compliance requirements
3. Consider standards like OWASP ASVS, NIST 800-53, CIS Benchmarks, PCI DSS, etc.
4. Return your answer as a JSON array of objects with keys 'regulation' and 'reason'
5. Make sure the 'reason' explains how the vulnerability specifically violates the regulation

Example format:
[
    {{"regulation": "OWASP ASVS V5.1.1", "reason": "Fails input validation requirements..."}},
    {{"regulation": "NIST 800-53 SI-10", "reason": "Does not implement proper information input validation..."}},
    {{"regulation": "CIS Control 16.1", "reason": "Lacks application software security controls..."}}
]

JSON Response:"#,
        context = render_context(context),
        name = finding.name,
        description = finding.description,
    )
}
