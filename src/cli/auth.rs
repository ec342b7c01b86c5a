//! Storing and removing API keys in the system keyring.

use std::error::Error;
use std::io::{self, BufRead, Write};

use crate::core::keyring::{delete_api_key, store_api_key};
use crate::core::providers::ProviderKind;

pub fn run_auth(provider: Option<String>) -> Result<(), Box<dyn Error>> {
    let kind = provider_or_default(provider)?;
    print!("Enter your {} API key: ", kind.display_name());
    io::stdout().flush()?;

    let key = read_key(&mut io::stdin().lock())?;
    let Some(key) = key else {
        println!("Cancelled.");
        return Ok(());
    };

    store_api_key(kind, &key)?;
    println!("✅ Stored API key for {}", kind.display_name());
    Ok(())
}

pub fn run_deauth(provider: Option<String>) -> Result<(), Box<dyn Error>> {
    let kind = provider_or_default(provider)?;
    if delete_api_key(kind)? {
        println!("✅ Removed API key for {}", kind.display_name());
    } else {
        println!("No stored API key for {}", kind.display_name());
    }
    Ok(())
}

fn provider_or_default(provider: Option<String>) -> Result<ProviderKind, Box<dyn Error>> {
    match provider {
        Some(raw) => Ok(raw.parse::<ProviderKind>()?),
        None => Ok(ProviderKind::default()),
    }
}

/// One line from `input`, trimmed; `None` when it is blank.
fn read_key<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let key = line.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_trimmed() {
        let mut input = io::Cursor::new("  sk-abc \n");
        assert_eq!(read_key(&mut input).unwrap(), Some("sk-abc".to_string()));
    }

    #[test]
    fn blank_key_cancels() {
        let mut input = io::Cursor::new("\n");
        assert_eq!(read_key(&mut input).unwrap(), None);
    }

    #[test]
    fn provider_defaults_to_gemini() {
        assert_eq!(provider_or_default(None).unwrap(), ProviderKind::Gemini);
        assert_eq!(
            provider_or_default(Some("openai".into())).unwrap(),
            ProviderKind::OpenAi
        );
        assert!(provider_or_default(Some("nope".into())).is_err());
    }
}
