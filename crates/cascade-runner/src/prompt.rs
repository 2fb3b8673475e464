//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from the filesystem (default: `templates/` directory)
//! so operators can tune how entities are briefed without recompiling. Each
//! generation request is turned into a JSON view ([`request_view`]) that the
//! templates render from.

use cascade_core::GenerationRequest;
use cascade_types::EntityId;
use minijinja::Environment;
use serde_json::json;

use crate::error::RunnerError;

/// Templates rendered into the user message, in order.
const USER_SECTIONS: [&str; 4] = ["profile", "scenario", "memory", "instructions"];

/// Manages prompt template loading and rendering.
///
/// Wraps a `minijinja` [`Environment`] with every entity prompt template
/// pre-loaded.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

/// The complete rendered prompt ready to send to an LLM backend.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// System message casting the model as the entity.
    pub system: String,
    /// User message containing profile, scenario, memory, and instructions.
    pub user: String,
}

impl PromptEngine {
    /// Create a new prompt engine loading templates from the given directory.
    ///
    /// The directory must contain: `system.j2`, `profile.j2`,
    /// `scenario.j2`, `memory.j2`, `instructions.j2`.
    pub fn new(templates_dir: &str) -> Result<Self, RunnerError> {
        let mut env = Environment::new();
        for name in std::iter::once("system").chain(USER_SECTIONS) {
            let source = load_template(templates_dir, &format!("{name}.j2"))?;
            env.add_template_owned(name, source).map_err(|e| {
                RunnerError::Template(format!("failed to add {name} template: {e}"))
            })?;
        }
        Ok(Self { env })
    }

    /// Render the full prompt for one entity in one round.
    pub fn render(&self, request: &GenerationRequest<'_>) -> Result<RenderedPrompt, RunnerError> {
        let view = request_view(request);
        let system = self.render_section("system", &view)?;
        let sections = USER_SECTIONS
            .iter()
            .map(|name| self.render_section(name, &view))
            .collect::<Result<Vec<_>, _>>()?;
        let user = sections
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(RenderedPrompt { system, user })
    }

    fn render_section(&self, name: &str, view: &serde_json::Value) -> Result<String, RunnerError> {
        self.env
            .get_template(name)
            .map_err(|e| RunnerError::Template(format!("missing {name} template: {e}")))?
            .render(view)
            .map_err(|e| RunnerError::Template(format!("{name} render failed: {e}")))
    }
}

/// Build the template context for a generation request.
///
/// Peers are referred to by name; IDs never reach the prompt.
pub fn request_view(request: &GenerationRequest<'_>) -> serde_json::Value {
    let scenario = request.scenario;
    let entity = request.entity;
    let name_of = |id: EntityId| {
        scenario
            .entity(id)
            .map_or_else(|| String::from("another stakeholder"), |e| e.name.clone())
    };

    let own: Vec<serde_json::Value> = request
        .memory
        .own_responses
        .iter()
        .map(|r| {
            json!({
                "round": r.round_number,
                "stance": r.signals.stance,
                "themes": r.signals.themes,
                "concerns": r.signals.concerns,
                "content": r.content,
            })
        })
        .collect();

    let peers: Vec<serde_json::Value> = request
        .memory
        .peer_responses
        .iter()
        .map(|p| {
            json!({
                "name": name_of(p.entity_id),
                "round": p.round_number,
                "stance": p.stance,
                "themes": p.themes,
                "excerpt": p.excerpt,
            })
        })
        .collect();

    let prior = request.prior_analysis.map(|analysis| {
        let themes: Vec<serde_json::Value> = analysis
            .themes
            .iter()
            .map(|t| json!({ "label": t.label, "count": t.raised_by.len() }))
            .collect();
        let conflicts: Vec<serde_json::Value> = analysis
            .coalitions
            .conflicts
            .iter()
            .map(|pair| json!([name_of(pair.first), name_of(pair.second)]))
            .collect();
        json!({
            "round": analysis.round_number,
            "themes": themes,
            "gaps": analysis.gaps,
            "conflicts": conflicts,
        })
    });

    json!({
        "round": request.round_number,
        "scenario": {
            "title": scenario.title,
            "description": scenario.description,
            "industry": scenario.industry,
            "tags": scenario.tags,
        },
        "entity": {
            "name": entity.name,
            "role": entity.role,
            "stance": entity.profile.stance,
            "priorities": entity.profile.priorities,
            "behavior_patterns": entity.profile.behavior_patterns,
            "description": entity.profile.description,
        },
        "memory": {
            "own": own,
            "peers": peers,
        },
        "prior": prior,
    })
}

/// Read a template file from disk.
fn load_template(dir: &str, filename: &str) -> Result<String, RunnerError> {
    let path = format!("{dir}/{filename}");
    std::fs::read_to_string(&path)
        .map_err(|e| RunnerError::Template(format!("failed to read {path}: {e}")))
}
