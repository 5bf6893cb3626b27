//! Filename heuristics used when a model header cannot be read

use crate::types::model::ModelHints;
use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered so that more specific families win over their base names
static ARCHITECTURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"deepseek[-_]?r1", "DeepSeek-R1"),
        (r"deepseek[-_]?coder", "DeepSeek-Coder"),
        (r"deepseek", "DeepSeek"),
        (r"codellama", "CodeLlama"),
        (r"codegemma", "CodeGemma"),
        (r"mistral[-_]?moe", "Mistral-MOE"),
        (r"mistral", "Mistral"),
        (r"qwen[0-9]?", "Qwen"),
        (r"llama[0-9]?", "Llama"),
        (r"gemma[0-9]?", "Gemma"),
        (r"nemotron", "Nemotron"),
        (r"granite", "Granite"),
        (r"phi[0-9]?", "Phi"),
        (r"starcoder", "StarCoder"),
        (r"solar", "Solar"),
        (r"command[_-]?r", "Command-R"),
        (r"devstral", "Devstral"),
        (r"dbrx", "DBRX"),
        (r"mixtral", "Mixtral"),
        (r"yi[-_]?34b", "Yi"),
        (r"orca[0-9]?", "Orca"),
        (r"gpt-oss", "GPT-OSS"),
        (r"wizardcoder", "WizardCoder"),
    ]
    .into_iter()
    .filter_map(|(pattern, name)| {
        Regex::new(&format!("(?i){}", pattern))
            .ok()
            .map(|re| (re, name))
    })
    .collect()
});

/// Known families whose size is not spelled out in the filename
static PARAM_FALLBACKS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"phi[-_]?3", "3B"),
        (r"yi[-_]?34b", "34B"),
        (r"dbrx", "132B"),
        (r"nemotron[-_]?8b", "8B"),
        (r"nemotron[-_]?5b", "5B"),
        (r"mixtral[-_]?8x", "12B"),
    ]
    .into_iter()
    .filter_map(|(pattern, size)| {
        Regex::new(&format!("(?i){}", pattern))
            .ok()
            .map(|re| (re, size))
    })
    .collect()
});

static PARAMS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)[bB](?:[-._\s]|$)").ok());

static QUANT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)[-_](Q[0-9]+[_A-Z0-9]*)(?:\.(?:gguf|bin|safetensors|pt|pth)|$)").ok()
});

static IQ_QUANT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[-_](IQ[0-9]+(?:_[A-Za-z0-9]+)?[A-Za-z0-9]*)(?:\.(?:gguf|bin|safetensors|pt|pth)|$)")
        .ok()
});

static CONTEXT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)(\d+)k?ctx", r"(?i)ctx[-_]?(\d+)"]
        .into_iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Model family guessed from a filename, "LLM" when nothing matches
pub fn extract_architecture(filename: &str) -> &'static str {
    ARCHITECTURES
        .iter()
        .find(|(re, _)| re.is_match(filename))
        .map(|(_, name)| *name)
        .unwrap_or("LLM")
}

/// Parameter count label such as "7B" or "1.5B"
pub fn extract_params(filename: &str) -> String {
    if let Some(caps) = PARAMS.as_ref().and_then(|re| re.captures(filename)) {
        return format!("{}B", &caps[1]);
    }
    PARAM_FALLBACKS
        .iter()
        .find(|(re, _)| re.is_match(filename))
        .map(|(_, size)| size.to_string())
        .unwrap_or_default()
}

/// Quantization label such as "Q4_K_M" or "IQ3_XS", uppercased
pub fn extract_quantization(filename: &str) -> String {
    [&*QUANT, &*IQ_QUANT]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(filename))
        .map(|caps| caps[1].to_uppercase())
        .unwrap_or_default()
}

/// Context window hint like "32kctx" or "ctx-4", scaled by 1000
pub fn extract_context_length(filename: &str) -> Option<u32> {
    CONTEXT
        .iter()
        .find_map(|re| re.captures(filename))
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .and_then(|n| n.checked_mul(1000))
}

/// Every filename heuristic at once, for files without a readable header
pub fn hints_from_file_name(filename: &str) -> ModelHints {
    ModelHints {
        architecture: extract_architecture(filename).to_string(),
        params: extract_params(filename),
        quantization: extract_quantization(filename),
        context_length: extract_context_length(filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_from_file_name() {
        let hints = hints_from_file_name("mistral-7b-instruct-32kctx-Q5_K_M.gguf");
        assert_eq!(hints.architecture, "Mistral");
        assert_eq!(hints.params, "7B");
        assert_eq!(hints.quantization, "Q5_K_M");
        assert_eq!(hints.context_length, Some(32_000));

        assert_eq!(
            hints_from_file_name("weights.gguf"),
            ModelHints {
                architecture: "LLM".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_extract_architecture() {
        assert_eq!(extract_architecture("DeepSeek-R1-Distill-Qwen-7B-Q4_K_M.gguf"), "DeepSeek-R1");
        assert_eq!(extract_architecture("codellama-13b.Q5_K_S.gguf"), "CodeLlama");
        assert_eq!(extract_architecture("Meta-Llama-3-8B-Instruct.gguf"), "Llama");
        assert_eq!(extract_architecture("qwen2.5-coder-1.5b.gguf"), "Qwen");
        assert_eq!(extract_architecture("mystery-weights.bin"), "LLM");
    }

    #[test]
    fn test_extract_params() {
        assert_eq!(extract_params("llama-2-7b-chat.Q4_0.gguf"), "7B");
        assert_eq!(extract_params("qwen2.5-1.5B-instruct.gguf"), "1.5B");
        assert_eq!(extract_params("model-70B"), "70B");
        assert_eq!(extract_params("Phi-3-mini-instruct.gguf"), "3B");
        assert_eq!(extract_params("mixtral-8x-instruct.gguf"), "12B");
        assert_eq!(extract_params("weights.gguf"), "");
    }

    #[test]
    fn test_extract_quantization() {
        assert_eq!(extract_quantization("llama-7b-Q4_K_M.gguf"), "Q4_K_M");
        assert_eq!(extract_quantization("mistral-7b_q8_0.bin"), "Q8_0");
        assert_eq!(extract_quantization("model-IQ3_XS.gguf"), "IQ3_XS");
        assert_eq!(extract_quantization("model-q5_k_s"), "Q5_K_S");
        assert_eq!(extract_quantization("model.gguf"), "");
    }

    #[test]
    fn test_extract_context_length() {
        assert_eq!(extract_context_length("model-32kctx.gguf"), Some(32000));
        assert_eq!(extract_context_length("model-ctx_8.gguf"), Some(8000));
        assert_eq!(extract_context_length("model.gguf"), None);
    }
}
