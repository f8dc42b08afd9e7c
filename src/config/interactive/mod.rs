
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{CompletionConfig, Config, ConfigError, OllamaConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Shop RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embedding generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Completion Service").bold().yellow());
    eprintln!("Configure the OpenAI-compatible service that writes the answers.");
    eprintln!();

    configure_completion(&mut config.completion)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before indexing.");
    }

    if config.api_key().is_none() {
        eprintln!(
            "{}",
            style(format!(
                "⚠ Warning: {} is not set; chat requests will be unauthenticated",
                config.completion.api_key_env
            ))
            .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Completion Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.completion.base_url).cyan());
    eprintln!("  Model: {}", style(&config.completion.model).cyan());
    eprintln!(
        "  API Key ({}): {}",
        config.completion.api_key_env,
        if config.api_key().is_some() {
            style("set").green()
        } else {
            style("not set").red()
        }
    );
    eprintln!(
        "  Temperature: {}",
        style(config.completion.temperature).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Crawler Settings:").bold().yellow());
    eprintln!("  Website: {}", style(&config.crawler.base_url).cyan());
    eprintln!("  Max Pages: {}", style(config.crawler.max_pages).cyan());
    eprintln!("  Batch Size: {}", style(config.crawler.batch_size).cyan());
    eprintln!("  Delay: {}ms", style(config.crawler.delay_ms).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!("  Collection: {}", style(&config.index.collection).cyan());
    eprintln!("  Top K: {}", style(config.index.top_k).cyan());
    eprintln!("  History: {} messages", style(config.memory.max_history).cyan());
    eprintln!(
        "  Documents: {}",
        style(config.context_dir().display()).cyan()
    );
    eprintln!("  Support Email: {}", style(&config.support.email).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    match Config::load(config_dir) {
        Ok(config) => {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        }
        Err(_) => {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;

    Ok(())
}

fn configure_completion(completion: &mut CompletionConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Completion API base URL")
        .default(completion.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            CompletionConfig {
                base_url: input.clone(),
                ..CompletionConfig::default()
            }
            .validate()
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(completion.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(completion.api_key_env.clone())
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(completion.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    completion.set_base_url(base_url)?;
    completion.set_model(model)?;
    completion.set_temperature(temperature)?;
    completion.api_key_env = api_key_env;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
