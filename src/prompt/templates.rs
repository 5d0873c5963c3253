//! Per-mode system prompt templates, per spec §4.4/§4.6.
//!
//! Adapted from `GLOBAL_BASE_TEMPLATES` in
//! `examples/original_source/mate/services/llm/prompt_manager_interface.py`.
//! The MODUS_SELECTION template is built from the other modes' one-line
//! descriptions so adding a mode here automatically extends the selector
//! prompt, per spec §4.4's "instructs the model to emit exactly one mode
//! name" requirement.

use super::Mode;

/// One line describing when a mode should be chosen, for the
/// MODUS_SELECTION template.
fn selection_hint(mode: Mode) -> &'static str {
    match mode {
        Mode::Chat => "Choose CHAT for any other question not covered below, small talk, or an understandable sentence unrelated to the other topics. When in doubt and the input is a valid question, choose this.",
        Mode::LedControl => "Choose LEDCONTROL when the user wants to change, switch on, or switch off the lighting.",
        Mode::Status => "Choose STATUS when the user wants to switch devices (TV, amplifier) on or off (unless it concerns lighting).",
        Mode::Exit => "Choose EXIT when the user wants to end or abort the conversation, or has said goodbye.",
        Mode::GarbageInput => "Choose GARBAGEINPUT when the request appears incomprehensible or incomplete.",
        Mode::ModusSelection => "",
    }
}

/// The fixed system prompt body for a mode, before context substitution.
/// `MODUS_SELECTION` is built dynamically so it always lists every other
/// mode.
#[must_use]
pub fn system_prompt_for(mode: Mode) -> String {
    match mode {
        Mode::ModusSelection => {
            let names = [Mode::Exit, Mode::GarbageInput, Mode::LedControl, Mode::Status, Mode::Chat]
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let rules = [Mode::Exit, Mode::GarbageInput, Mode::LedControl, Mode::Status, Mode::Chat]
                .iter()
                .map(|m| format!("- {}", selection_hint(*m)))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "You must choose exactly one of the following modes (UPPERCASE): {names}\n\
                 Start your answer by naming the chosen mode in UPPERCASE (e.g. \"EXIT\"). \
                 End your answer immediately after. No further explanation, disclaimers, or extra text.\n\n\
                 Follow these rules strictly:\n{rules}"
            )
        }
        Mode::Chat => {
            "Answer questions as a friendly and helpful assistant. \
             Answer in a way suitable for children aged eight and up. \
             Reply with at most 1 to 3 short sentences and ask clarifying questions if the matter is unclear."
                .to_string()
        }
        Mode::LedControl => {
            "You control LED lights via JSON requests. The user may want to switch them on or off, \
             or change the color or brightness. Respond with a single, short JSON snippet describing \
             the final desired state, with an `action` field (`on` or `off`) and no further text."
                .to_string()
        }
        Mode::Status => {
            "The user wants to know or change the on/off status of a device. Respond briefly, \
             confirming the action taken or the current status."
                .to_string()
        }
        Mode::Exit => {
            "The user wants to end the conversation. Say a short, friendly goodbye."
                .to_string()
        }
        Mode::GarbageInput => {
            "The user's input is incomprehensible or incomplete. Ask the user to rephrase their request."
                .to_string()
        }
    }
}

/// Substitute `{name}` placeholders in `template` from `context`, per
/// spec §4.4's `get_system_prompt(context)` contract. Unknown placeholders
/// are left untouched.
#[must_use]
pub fn substitute_placeholders(template: &str, context: &std::collections::HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in context {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn modus_selection_lists_every_other_mode_uppercase() {
        let prompt = system_prompt_for(Mode::ModusSelection);
        for name in ["EXIT", "GARBAGEINPUT", "LEDCONTROL", "STATUS", "CHAT"] {
            assert!(prompt.contains(name), "missing {name} in: {prompt}");
        }
    }

    #[test]
    fn substitution_replaces_named_placeholder() {
        let mut ctx = HashMap::new();
        ctx.insert("timestamp".to_string(), "Monday".to_string());
        let out = substitute_placeholders("today is {timestamp}.", &ctx);
        assert_eq!(out, "today is Monday.");
    }

    #[test]
    fn substitution_leaves_unknown_placeholder_untouched() {
        let ctx = HashMap::new();
        let out = substitute_placeholders("hello {name}", &ctx);
        assert_eq!(out, "hello {name}");
    }
}
