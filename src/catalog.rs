//! Built-in option catalogs.
//!
//! The analysis service can advertise its own model and analyst lists, but
//! the console always carries a copy so that labels resolve and listings work
//! when the service is unreachable.

use serde::{Deserialize, Serialize};

/// A selectable LLM model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub provider: String,
}

/// A selectable analyst persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystOption {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

const MODELS: &[(&str, &str, &str)] = &[
    ("anthropic", "claude-3.5-sonnet", "claude-3-5-sonnet-latest"),
    ("anthropic", "claude-3.7-sonnet", "claude-3-7-sonnet-latest"),
    ("groq", "deepseek-r1 70b", "deepseek-r1-distill-llama-70b"),
    ("groq", "llama-3.3 70b", "llama-3.3-70b-versatile"),
    ("openai", "gpt-4o", "gpt-4o"),
    ("openai", "gpt-4o-mini", "gpt-4o-mini"),
    ("openai", "o1", "o1"),
    ("openai", "o3-mini", "o3-mini"),
    ("gemini", "gemini-2.0-flash", "gemini-2.0-flash"),
];

const ANALYSTS: &[(&str, &str, &str)] = &[
    ("warren_buffett_agent", "Warren Buffett", "Analyzes quality businesses with strong fundamentals and reasonable prices"),
    ("charlie_munger_agent", "Charlie Munger", "Evaluates companies using mental models and considers moats and management quality"),
    ("ben_graham_agent", "Ben Graham", "Focuses on deep value stocks trading below intrinsic value with margin of safety"),
    ("bill_ackman_agent", "Bill Ackman", "Identifies high-quality businesses with long-term growth and activist potential"),
    ("cathie_wood_agent", "Cathie Wood", "Specializes in disruptive innovation and high-growth technology companies"),
    ("nancy_pelosi_agent", "Nancy Pelosi", "Analyzes stocks with policy/regulatory advantages and asymmetric information opportunities"),
    ("wsb_agent", "WSB", "Identifies meme stocks, short squeeze candidates, and momentum plays"),
    ("technical_analyst_agent", "Technical Analysis", "Uses price patterns, trends, and indicators to generate trading signals"),
    ("fundamentals_agent", "Fundamental Analysis", "Examines company fundamentals like profitability, growth, and financial health"),
    ("sentiment_agent", "Sentiment Analysis", "Analyzes market sentiment from news and insider trading"),
    ("valuation_agent", "Valuation Analysis", "Calculates intrinsic value using multiple valuation methodologies"),
    ("risk_management_agent", "Risk Management", "Controls position sizing based on portfolio risk factors"),
];

/// All models the console knows about.
pub fn builtin_models() -> Vec<ModelOption> {
    MODELS
        .iter()
        .map(|(provider, name, value)| ModelOption {
            value: value.to_string(),
            label: format!("[{}] {}", provider, name),
            provider: provider.to_string(),
        })
        .collect()
}

/// All analyst personas the console knows about.
pub fn builtin_analysts() -> Vec<AnalystOption> {
    ANALYSTS
        .iter()
        .map(|(value, label, description)| AnalystOption {
            value: value.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        })
        .collect()
}

/// Every built-in analyst id, in catalog order.
pub fn all_analyst_ids() -> Vec<String> {
    ANALYSTS.iter().map(|(value, _, _)| value.to_string()).collect()
}

/// Display label for an analyst id. Unknown ids are shown as-is.
pub fn analyst_label(agent_id: &str) -> String {
    ANALYSTS
        .iter()
        .find(|(value, _, _)| *value == agent_id)
        .map(|(_, label, _)| label.to_string())
        .unwrap_or_else(|| agent_id.to_string())
}

pub fn is_known_model(model_id: &str) -> bool {
    MODELS.iter().any(|(_, _, value)| *value == model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyst_label_lookup() {
        assert_eq!(analyst_label("warren_buffett_agent"), "Warren Buffett");
        assert_eq!(analyst_label("technical_analyst_agent"), "Technical Analysis");
        assert_eq!(analyst_label("mystery_agent"), "mystery_agent");
    }

    #[test]
    fn test_model_labels_carry_provider() {
        let models = builtin_models();
        let gpt = models.iter().find(|m| m.value == "gpt-4o").unwrap();
        assert_eq!(gpt.label, "[openai] gpt-4o");
        assert!(is_known_model("o3-mini"));
        assert!(!is_known_model("gpt-2"));
    }

    #[test]
    fn test_all_analyst_ids_matches_catalog() {
        assert_eq!(all_analyst_ids().len(), builtin_analysts().len());
    }
}
