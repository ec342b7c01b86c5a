use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONA_ID: &str = "default";
pub const DEFAULT_AVATAR: &str = "🤖";

/// A chatbot character: the system prompt sent with every request plus the
/// canned lines shown before the model ever answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub avatar_emoji: Option<String>,
    /// Opening lines; one is picked at random when a conversation starts
    #[serde(default)]
    pub greetings: Vec<String>,
    /// Lines shown in place of the reply while waiting out a rate limit
    #[serde(default)]
    pub wait_messages: Vec<String>,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a laid-back, warm conversation partner. \
You speak casually and briefly, never lecture, and never rush to fix things. \
You listen first, acknowledge how the other person feels, and offer a shrug of perspective \
(\"well, that's how it goes sometimes\") rather than advice. \
Keep answers short, honest, and kind. Reply in the language the user writes in.";

const DEFAULT_GREETINGS: &[&str] = &[
    "Well, another day got started. If it's rough, you can just say it's rough. That's how it goes.",
    "Oh, you're here? Anything going on? Nothing's fine, something's fine too. Just talk.",
    "Hey. Sometimes you just want to tell someone something, right? No pressure.",
    "How's today treating you? Okay is fine, not okay is fine too. That's how it goes.",
    "Come on in. I can't do much, but I can listen. That's not nothing, right?",
];

const DEFAULT_WAIT_MESSAGES: &[&str] = &[
    "Ah... the server seems a bit busy. Well, life is mostly waiting anyway.",
    "Hold on, the server says it wants a break. Don't we all.",
    "The server's only human... well, it isn't, but let's give it a minute.",
    "Guess we asked too many questions. Being curious isn't a bad thing though.",
    "The server says \"let me rest a sec.\" Honestly, I get it.",
];

const GENERIC_WAIT_MESSAGE: &str = "The server is busy right now. Hang on a moment.";

impl Persona {
    /// The persona used when no chatbot profile is selected.
    pub fn builtin_default() -> Self {
        Self {
            id: DEFAULT_PERSONA_ID.to_string(),
            name: "Parlor".to_string(),
            description: "A laid-back listener".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            avatar_emoji: Some("🛋️".to_string()),
            greetings: DEFAULT_GREETINGS.iter().map(|s| s.to_string()).collect(),
            wait_messages: DEFAULT_WAIT_MESSAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn avatar(&self) -> &str {
        self.avatar_emoji.as_deref().unwrap_or(DEFAULT_AVATAR)
    }

    /// A random greeting, falling back to the built-in set when the persona
    /// defines none.
    pub fn pick_greeting(&self) -> String {
        pick_or_fallback(&self.greetings, DEFAULT_GREETINGS)
    }

    pub fn pick_wait_message(&self) -> String {
        if self.wait_messages.is_empty() {
            return GENERIC_WAIT_MESSAGE.to_string();
        }
        pick_one(&self.wait_messages).to_string()
    }
}

fn pick_or_fallback(choices: &[String], fallback: &[&str]) -> String {
    if choices.is_empty() {
        fallback[random_index(fallback.len())].to_string()
    } else {
        pick_one(choices).to_string()
    }
}

fn pick_one(choices: &[String]) -> &str {
    &choices[random_index(choices.len())]
}

/// Uniform-enough index in `0..len`; `len` must be non-zero.
pub fn random_index(len: usize) -> usize {
    let mut bytes = [0u8; 4];
    if getrandom::fill(&mut bytes).is_err() {
        return 0;
    }
    u32::from_le_bytes(bytes) as usize % len
}

/// Built-in personas merged with user-defined ones; later definitions with the
/// same id replace earlier ones.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl PersonaRegistry {
    pub fn new(configured: &[Persona]) -> Self {
        let mut registry = Self {
            personas: vec![Persona::builtin_default()],
        };
        for persona in configured {
            registry.insert(persona.clone());
        }
        registry
    }

    pub fn insert(&mut self, persona: Persona) {
        match self.personas.iter_mut().find(|p| p.id == persona.id) {
            Some(existing) => *existing = persona,
            None => self.personas.push(persona),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Look up `id`, or the built-in default when unset or unknown.
    pub fn resolve(&self, id: Option<&str>) -> Persona {
        id.and_then(|id| self.find(id))
            .or_else(|| self.find(DEFAULT_PERSONA_ID))
            .cloned()
            .unwrap_or_else(Persona::builtin_default)
    }

    pub fn list(&self) -> &[Persona] {
        &self.personas
    }
}
