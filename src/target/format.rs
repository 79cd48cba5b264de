//! Target-side prompt formatting.
//!
//! The target is driven through a raw completions endpoint, so the prompt
//! must arrive already framed in the target model's own native template —
//! not the draft's. Mismatched framing silently degrades the acceptance
//! rate. Selection is data-driven from the configured target model name.

/// Continuation format for a target model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFormat {
    /// Harmony framing (gpt-oss family).
    Harmony,
    /// `<|im_start|>` framing (Qwen family).
    ChatMl,
    /// `<|start_header_id|>` framing (Llama 3 family).
    Llama3,
    /// Plain text continuation.
    Raw,
}

impl PromptFormat {
    /// Select the format for a target model name.
    pub fn for_model(name: &str) -> Self {
        let n = name.to_lowercase();
        if n.contains("gpt-oss") || n.contains("gpt_oss") {
            PromptFormat::Harmony
        } else if n.contains("qwen") {
            PromptFormat::ChatMl
        } else if n.contains("llama-3") || n.contains("llama3") {
            PromptFormat::Llama3
        } else {
            PromptFormat::Raw
        }
    }

    /// Render the system+user framing and append the generated text
    /// verbatim, positioning the target to continue mid-completion.
    pub fn render(&self, prompt: &str, generated_text: &str) -> String {
        match self {
            PromptFormat::Harmony => format!(
                "<|start|>user<|message|>{prompt}<|end|><|start|>assistant<|channel|>final<|message|>{generated_text}"
            ),
            PromptFormat::ChatMl => format!(
                "<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n{generated_text}"
            ),
            PromptFormat::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n{generated_text}"
            ),
            PromptFormat::Raw => format!("{prompt}\n{generated_text}"),
        }
    }
}
