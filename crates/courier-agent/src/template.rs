//! Agent templates — named system prompts with `{{VAR}}` substitution.

use std::collections::HashMap;

use tracing::warn;

/// Name of the built-in default agent.
pub const DEFAULT_AGENT: &str = "soul";

/// System prompt used when no template is configured for the default agent.
const SOUL_PROMPT: &str = "You are a helpful personal assistant reachable over several \
chat channels. Be concise; answer in plain text suitable for a chat message. \
When given a scheduled task, perform it and report the result.";

/// A templated system prompt. Placeholders use `{{NAME}}` syntax; the
/// dispatcher currently populates `TASK` for cron-originated wakes.
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    pub name: String,
    pub system_prompt: String,
}

impl AgentTemplate {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Render the system prompt, substituting every `{{KEY}}` that appears
    /// in `vars`. Unknown placeholders are left untouched.
    pub fn render(&self, vars: &HashMap<String, String>) -> String {
        let mut out = self.system_prompt.clone();
        for (key, value) in vars {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        out
    }
}

/// Registry of agent templates. Always contains the default agent; extra
/// templates come from config (`[agent.templates]`).
pub struct AgentRegistry {
    templates: HashMap<String, AgentTemplate>,
    default_name: String,
}

impl AgentRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        let default_name = default_name.into();
        let mut templates = HashMap::new();
        templates.insert(
            DEFAULT_AGENT.to_string(),
            AgentTemplate::new(DEFAULT_AGENT, SOUL_PROMPT),
        );
        Self {
            templates,
            default_name,
        }
    }

    pub fn insert(&mut self, template: AgentTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Load extra templates from the config map (name → system prompt).
    pub fn extend_from_config(&mut self, templates: &HashMap<String, String>) {
        for (name, prompt) in templates {
            self.insert(AgentTemplate::new(name.clone(), prompt.clone()));
        }
    }

    /// Resolve an agent by name. Empty means "default"; an unknown name
    /// also falls back to the default with a warning rather than failing
    /// the wake.
    pub fn resolve(&self, name: &str) -> &AgentTemplate {
        if !name.is_empty() {
            if let Some(template) = self.templates.get(name) {
                return template;
            }
            warn!(agent = %name, "unknown agent template, using default");
        }
        self.templates
            .get(&self.default_name)
            .unwrap_or_else(|| &self.templates[DEFAULT_AGENT])
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_task() {
        let tpl = AgentTemplate::new("worker", "Do this: {{TASK}} now");
        let mut vars = HashMap::new();
        vars.insert("TASK".to_string(), "ping".to_string());
        assert_eq!(tpl.render(&vars), "Do this: ping now");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let tpl = AgentTemplate::new("worker", "{{TASK}} and {{OTHER}}");
        let mut vars = HashMap::new();
        vars.insert("TASK".to_string(), "x".to_string());
        assert_eq!(tpl.render(&vars), "x and {{OTHER}}");
    }

    #[test]
    fn empty_name_resolves_to_default() {
        let registry = AgentRegistry::default();
        assert_eq!(registry.resolve("").name, DEFAULT_AGENT);
    }

    #[test]
    fn unknown_name_falls_back_to_default() {
        let registry = AgentRegistry::default();
        assert_eq!(registry.resolve("nope").name, DEFAULT_AGENT);
    }

    #[test]
    fn config_templates_are_resolvable() {
        let mut registry = AgentRegistry::default();
        let mut extra = HashMap::new();
        extra.insert("researcher".to_string(), "You research.".to_string());
        registry.extend_from_config(&extra);
        assert_eq!(registry.resolve("researcher").system_prompt, "You research.");
    }
}
