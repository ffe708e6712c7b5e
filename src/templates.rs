//! Chat-markup dialect detection and prompt rendering.
//!
//! Detection classifies the model's embedded template string once per
//! session; rendering turns an ordered message history into the exact flat
//! prompt the model was trained on. Message content always passes through
//! byte-exact — only the surrounding markup differs per dialect.

use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Role};

/// A chat markup grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatDialect {
    /// Template missing or unrecognized; renders through the plain
    /// fallback.
    Unknown,
    /// `<s>[INST] ... [/INST]`
    Mistral,
    /// `<s>[INST] <<SYS>> ... <</SYS>>`
    Llama2,
    /// `<|im_start|> ... <|im_end|>`
    ChatML,
    /// `<|user|> ... <|assistant|>`
    Zephyr,
    /// `<start_of_turn>user ... <end_of_turn>`
    Gemma,
    /// Role-prefixed plain text.
    Plain,
}

/// Classify a model-supplied template string.
///
/// Substring probes in fixed precedence order, first match wins. Llama2
/// templates also contain `[INST]`, so the Mistral probe additionally
/// requires `<<SYS>>` to be absent.
pub fn detect_dialect(template: Option<&str>) -> ChatDialect {
    let Some(template) = template else {
        return ChatDialect::Unknown;
    };

    if template.contains("<|im_start|>") {
        ChatDialect::ChatML
    } else if template.contains("[INST]") && !template.contains("<<SYS>>") {
        ChatDialect::Mistral
    } else if template.contains("<<SYS>>") || template.contains("[INST]") {
        ChatDialect::Llama2
    } else if template.contains("<|user|>") {
        ChatDialect::Zephyr
    } else if template.contains("<start_of_turn>") {
        ChatDialect::Gemma
    } else {
        ChatDialect::Unknown
    }
}

/// Render a message history into a prompt ending with the dialect's
/// assistant cue.
///
/// Pure and total over all dialects; `Unknown` renders like [`ChatDialect::Plain`].
pub fn render_chat(messages: &[ChatMessage], dialect: ChatDialect) -> String {
    match dialect {
        ChatDialect::Mistral => render_mistral(messages),
        ChatDialect::Llama2 => render_llama2(messages),
        ChatDialect::ChatML => render_chatml(messages),
        ChatDialect::Zephyr => render_zephyr(messages),
        ChatDialect::Gemma => render_gemma(messages),
        ChatDialect::Unknown | ChatDialect::Plain => render_plain(messages),
    }
}

fn system_content(messages: &[ChatMessage]) -> Option<&str> {
    messages.iter().find(|m| m.role == Role::System).map(|m| m.content.as_str())
}

fn render_mistral(messages: &[ChatMessage]) -> String {
    let mut p = String::from("<s>[INST] ");
    if let Some(sys) = system_content(messages) {
        p.push_str(sys);
        p.push_str("\n\n");
    }

    let mut first_user = true;
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        match msg.role {
            Role::User => {
                if !first_user {
                    p.push_str("[INST] ");
                }
                p.push_str(&msg.content);
                p.push_str(" [/INST]");
                first_user = false;
            }
            Role::Assistant => {
                p.push(' ');
                p.push_str(&msg.content);
                p.push_str("</s>");
            }
            Role::System => unreachable!(),
        }
    }

    p
}

fn render_llama2(messages: &[ChatMessage]) -> String {
    let mut p = String::from("<s>[INST] ");
    if let Some(sys) = system_content(messages) {
        p.push_str("<<SYS>>\n");
        p.push_str(sys);
        p.push_str("\n<</SYS>>\n\n");
    }

    let mut first_user = true;
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        match msg.role {
            Role::User => {
                if !first_user {
                    p.push_str("<s>[INST] ");
                }
                p.push_str(&msg.content);
                p.push_str(" [/INST]");
                first_user = false;
            }
            Role::Assistant => {
                p.push(' ');
                p.push_str(&msg.content);
                p.push_str(" </s>");
            }
            Role::System => unreachable!(),
        }
    }

    p
}

fn render_chatml(messages: &[ChatMessage]) -> String {
    let mut p = String::new();
    for msg in messages {
        p.push_str("<|im_start|>");
        p.push_str(msg.role.as_str());
        p.push('\n');
        p.push_str(&msg.content);
        p.push_str("\n<|im_end|>\n");
    }
    p.push_str("<|im_start|>assistant\n");
    p
}

fn render_zephyr(messages: &[ChatMessage]) -> String {
    let mut p = String::new();
    for msg in messages {
        p.push_str("<|");
        p.push_str(msg.role.as_str());
        p.push_str("|>\n");
        p.push_str(&msg.content);
        p.push('\n');
    }
    p.push_str("<|assistant|>\n");
    p
}

fn render_gemma(messages: &[ChatMessage]) -> String {
    // Gemma has no system role: system content becomes a prefix of the
    // first user turn, and the assistant role is called "model".
    let mut p = String::new();
    let mut first_user_prefix = system_content(messages).map(|s| format!("{s}\n\n"));

    for msg in messages.iter().filter(|m| m.role != Role::System) {
        match msg.role {
            Role::User => {
                p.push_str("<start_of_turn>user\n");
                if let Some(prefix) = first_user_prefix.take() {
                    p.push_str(&prefix);
                }
                p.push_str(&msg.content);
                p.push_str("<end_of_turn>\n");
            }
            Role::Assistant => {
                p.push_str("<start_of_turn>model\n");
                p.push_str(&msg.content);
                p.push_str("<end_of_turn>\n");
            }
            Role::System => unreachable!(),
        }
    }

    p.push_str("<start_of_turn>model\n");
    p
}

fn render_plain(messages: &[ChatMessage]) -> String {
    let mut p = String::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                p.push_str("System: ");
                p.push_str(&msg.content);
                p.push_str("\n\n");
            }
            Role::User => {
                p.push_str("User: ");
                p.push_str(&msg.content);
                p.push('\n');
            }
            Role::Assistant => {
                p.push_str("Assistant: ");
                p.push_str(&msg.content);
                p.push('\n');
            }
        }
    }
    p.push_str("Assistant:");
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_chatml() {
        let t = "{% for m in messages %}<|im_start|>{{ m.role }}\n{{ m.content }}<|im_end|>{% endfor %}";
        assert_eq!(detect_dialect(Some(t)), ChatDialect::ChatML);
    }

    #[test]
    fn detects_mistral_without_sys_marker() {
        let t = "{{ bos_token }}{% for m in messages %}[INST] {{ m.content }} [/INST]{% endfor %}";
        assert_eq!(detect_dialect(Some(t)), ChatDialect::Mistral);
    }

    #[test]
    fn sys_marker_promotes_inst_template_to_llama2() {
        let t = "[INST] <<SYS>>\n{{ system }}\n<</SYS>> {{ content }} [/INST]";
        assert_eq!(detect_dialect(Some(t)), ChatDialect::Llama2);
    }

    #[test]
    fn detects_zephyr_and_gemma() {
        assert_eq!(detect_dialect(Some("<|user|>\n...<|assistant|>")), ChatDialect::Zephyr);
        assert_eq!(
            detect_dialect(Some("<start_of_turn>user ... <end_of_turn>")),
            ChatDialect::Gemma
        );
    }

    #[test]
    fn missing_or_foreign_template_is_unknown() {
        assert_eq!(detect_dialect(None), ChatDialect::Unknown);
        assert_eq!(detect_dialect(Some("{{ messages | join }}")), ChatDialect::Unknown);
    }

    #[test]
    fn chatml_render_is_exact() {
        let history =
            vec![ChatMessage::system("Be terse."), ChatMessage::user("Hi")];
        let prompt = render_chat(&history, ChatDialect::ChatML);
        assert_eq!(
            prompt,
            "<|im_start|>system\nBe terse.\n<|im_end|>\n\
             <|im_start|>user\nHi\n<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn mistral_merges_system_into_first_turn() {
        let history = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("One"),
            ChatMessage::assistant("Two"),
            ChatMessage::user("Three"),
        ];
        let prompt = render_chat(&history, ChatDialect::Mistral);
        assert_eq!(prompt, "<s>[INST] Be brief.\n\nOne [/INST] Two</s>[INST] Three [/INST]");
    }

    #[test]
    fn mistral_keeps_first_message_without_system() {
        let history = vec![ChatMessage::user("Hello")];
        assert_eq!(render_chat(&history, ChatDialect::Mistral), "<s>[INST] Hello [/INST]");
    }

    #[test]
    fn llama2_wraps_system_in_sys_tags() {
        let history = vec![ChatMessage::system("S"), ChatMessage::user("U")];
        assert_eq!(
            render_chat(&history, ChatDialect::Llama2),
            "<s>[INST] <<SYS>>\nS\n<</SYS>>\n\nU [/INST]"
        );
    }

    #[test]
    fn gemma_folds_system_into_first_user_turn() {
        let history = vec![
            ChatMessage::system("Rules."),
            ChatMessage::user("Q1"),
            ChatMessage::assistant("A1"),
            ChatMessage::user("Q2"),
        ];
        let prompt = render_chat(&history, ChatDialect::Gemma);
        assert_eq!(
            prompt,
            "<start_of_turn>user\nRules.\n\nQ1<end_of_turn>\n\
             <start_of_turn>model\nA1<end_of_turn>\n\
             <start_of_turn>user\nQ2<end_of_turn>\n\
             <start_of_turn>model\n"
        );
    }

    #[test]
    fn zephyr_uses_its_own_assistant_cue() {
        let history = vec![ChatMessage::user("Hey")];
        assert_eq!(render_chat(&history, ChatDialect::Zephyr), "<|user|>\nHey\n<|assistant|>\n");
    }

    #[test]
    fn plain_on_empty_history_is_cue_only() {
        let prompt = render_chat(&[], ChatDialect::Plain);
        assert_eq!(prompt, "Assistant:");
    }

    #[test]
    fn unknown_renders_like_plain() {
        let history = vec![ChatMessage::system("S"), ChatMessage::user("U")];
        assert_eq!(
            render_chat(&history, ChatDialect::Unknown),
            render_chat(&history, ChatDialect::Plain)
        );
        assert_eq!(render_chat(&history, ChatDialect::Plain), "System: S\n\nUser: U\nAssistant:");
    }

    #[test]
    fn rendering_is_pure() {
        let history = vec![ChatMessage::user("same input")];
        for dialect in [
            ChatDialect::Mistral,
            ChatDialect::Llama2,
            ChatDialect::ChatML,
            ChatDialect::Zephyr,
            ChatDialect::Gemma,
            ChatDialect::Plain,
        ] {
            assert_eq!(render_chat(&history, dialect), render_chat(&history, dialect));
        }
    }

    #[test]
    fn content_passes_through_byte_exact() {
        // Content that looks like markup must not be altered or escaped.
        let tricky = "mixed CASE, <|im_end|> inside, and [INST] too";
        let history = vec![ChatMessage::user(tricky)];
        for dialect in [ChatDialect::ChatML, ChatDialect::Mistral, ChatDialect::Plain] {
            assert!(render_chat(&history, dialect).contains(tricky));
        }
    }
}
