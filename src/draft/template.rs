//! Chat template rendering for the draft model.
//!
//! The draft side needs the prompt in its own instruction format before
//! tokenization. Detection is data-driven from the model identifier.

/// Known draft-side chat template formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>` (Qwen, Yi, OpenHermes).
    ChatMl,
    /// `<|start_header_id|>role<|end_header_id|>\n\ncontent<|eot_id|>` (Llama 3).
    Llama3,
    /// No template; the prompt is passed through unchanged.
    Raw,
}

impl ChatTemplate {
    /// Detect the template from a model name or path.
    pub fn from_model_name(name: &str) -> Self {
        let n = name.to_lowercase();
        if n.contains("llama-3") || n.contains("llama3") {
            ChatTemplate::Llama3
        } else if n.contains("qwen") || n.contains("chatml") || n.contains("hermes") {
            ChatTemplate::ChatMl
        } else {
            ChatTemplate::Raw
        }
    }

    /// Render a single user turn plus the generation prompt.
    pub fn render(&self, prompt: &str) -> String {
        match self {
            ChatTemplate::ChatMl => format!(
                "<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n"
            ),
            ChatTemplate::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
            ),
            ChatTemplate::Raw => prompt.to_string(),
        }
    }
}
