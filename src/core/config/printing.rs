use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.provider {
            Some(provider) => println!("  provider: {provider}"),
            None => println!("  provider: (unset, defaults to gemini)"),
        }
        match &self.model {
            Some(model) => println!("  model: {model}"),
            None => println!("  model: (provider default)"),
        }
        match &self.base_url {
            Some(url) => println!("  base-url: {url}"),
            None => println!("  base-url: (provider default)"),
        }
        match &self.active_chatbot {
            Some(id) => println!("  chatbot: {id}"),
            None => println!("  chatbot: (built-in default)"),
        }
        println!(
            "  generation: temperature={} top_p={} max_output_tokens={}",
            self.generation.temperature, self.generation.top_p, self.generation.max_output_tokens
        );
        println!(
            "  retry: max_retries={} base_delay_ms={}",
            self.retry.max_retries, self.retry.base_delay_ms
        );
        match &self.backend.url {
            Some(url) => println!("  backend: {url}"),
            None => println!("  backend: (not configured)"),
        }
        match self.rag.enabled {
            true => println!(
                "  rag: on (threshold={}, count={})",
                self.rag.match_threshold, self.rag.match_count
            ),
            false => println!("  rag: off"),
        }
        if self.personas.is_empty() {
            println!("  personas: (none defined)");
        } else {
            println!("  personas:");
            for persona in &self.personas {
                println!("    {}: {}", persona.id, persona.name);
            }
        }
    }
}
