mod api;
mod channel;
mod cli;
mod clock;
mod config;
mod engine;
mod facts;
mod gate;
mod learner;
mod llm;
mod logging;
mod prompt;
mod state;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;

use config::Config;
use facts::FactStore;
use facts::embedded::EmbeddingIndex;
use state::{JsonPersistence, StatePersistence, StateRegistry};

#[derive(Parser)]
#[command(
    name = "monarch",
    version,
    about = "King Maximilian VII holds court in your chat"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.monarch/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP ingress
    Run,
    Init,
    /// Show every group the king knows
    Status,
    /// Talk to the running server
    Chat {
        /// Message to send (omit for interactive mode)
        message: Option<String>,
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        /// Auth token (or MONARCH_API_KEY env)
        #[arg(long, env = "MONARCH_API_KEY")]
        token: Option<String>,
        #[arg(long, default_value = "cli")]
        group: String,
        #[arg(long, default_value = "peasant")]
        user: String,
    },
    /// Hold court in this terminal; prefix a line with @king to address him
    Play {
        #[arg(long, default_value = "peasant")]
        user: String,
    },
    /// Search the king's facts
    Facts { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::load_dotenv(None);
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            logging::init_stderr();
            let base = config::init_config_dir().await?;
            let cfg = config::load(&base.join("config.toml").to_string_lossy())?;
            match open_facts(&cfg).await {
                Ok(seeded) => tracing::info!("Initialized {} ({seeded} facts)", base.display()),
                Err(e) => tracing::warn!(
                    "Initialized {}; facts will be seeded on first run ({e:#})",
                    base.display()
                ),
            }
        }
        Commands::Run => {
            let cfg = config::load(&cli.config)?;
            let _guard = logging::init(&cfg.logging)?;
            run(cfg).await?;
        }
        Commands::Status => {
            logging::init_stderr();
            let cfg = config::load(&cli.config)?;
            status(&cfg)?;
        }
        Commands::Chat {
            message,
            url,
            token,
            group,
            user,
        } => {
            logging::init_stderr();
            chat(&url, token.as_deref(), &group, &user, message.as_deref()).await?;
        }
        Commands::Play { user } => {
            let cfg = config::load(&cli.config)?;
            let _guard = logging::init(&cfg.logging)?;
            let (engine, _) = build_engine(&cfg).await?;
            let target = cli::TerminalTarget::new(tokio::io::stdout());
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            eprintln!("Holding court as {user}. Type @king to address the king, quit to leave.");
            cli::play(&engine, stdin, &target, &user, &cfg.bot.channel_name).await?;
        }
        Commands::Facts { query } => {
            logging::init_stderr();
            let cfg = config::load(&cli.config)?;
            let store = FactStore::new(Arc::new(fact_index(&cfg).await?));
            let found = store
                .find_relevant(&query, cfg.facts.result_limit, cfg.facts.relevance_threshold)
                .await?;
            if found.is_empty() {
                println!("(nothing relevant)");
            }
            for fact in found {
                println!("{:>3}  {}", fact.id, fact.content);
            }
        }
    }
    Ok(())
}

async fn fact_index(cfg: &Config) -> Result<EmbeddingIndex> {
    let embedder = llm::create_embedder(&cfg.facts, &cfg.llm)?;
    match &cfg.facts.path {
        Some(path) => EmbeddingIndex::open(path, embedder).await,
        None => Ok(EmbeddingIndex::new(embedder)),
    }
}

async fn open_facts(cfg: &Config) -> Result<usize> {
    let store = FactStore::new(Arc::new(fact_index(cfg).await?));
    store.seed_if_empty(&facts::seed::initial_facts()).await
}

fn state_registry(cfg: &Config) -> Result<StateRegistry> {
    let persistence: Box<dyn StatePersistence> = match &cfg.state.dir {
        Some(dir) => Box::new(JsonPersistence::new(dir.clone())?),
        None => Box::new(state::MemoryPersistence),
    };
    let clock = clock::SystemClock::new(cfg.bot.tz()?);
    StateRegistry::new(persistence, Arc::new(clock))
}

async fn build_engine(cfg: &Config) -> Result<(engine::Engine, Arc<StateRegistry>)> {
    let llm = llm::create_client(&cfg.llm)?;
    let store = Arc::new(FactStore::new(Arc::new(fact_index(cfg).await?)));
    let seeded = store.seed_if_empty(&facts::seed::initial_facts()).await?;
    if seeded > 0 {
        tracing::info!("Seeded {seeded} facts");
    }
    let states = Arc::new(state_registry(cfg)?);
    if !cfg.bot.auto_learn_facts {
        tracing::debug!("Fact learning disabled");
    }
    let engine = engine::Engine::new(cfg, llm, store, states.clone());
    Ok((engine, states))
}

async fn run(cfg: Config) -> Result<()> {
    if cfg.api.api_key.is_none() {
        if is_localhost(&cfg.api.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [api] api_key.",
                cfg.api.bind
            );
        }
    }

    let (engine, states) = build_engine(&cfg).await?;
    let state = api::AppState {
        engine: Arc::new(engine),
        states,
        name: cfg.bot.name.clone(),
        channel_name: cfg.bot.channel_name.clone(),
        api_key: cfg.api.api_key.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.api.bind).await?;
    tracing::info!("{} listening on {}", cfg.bot.name, cfg.api.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

fn status(cfg: &Config) -> Result<()> {
    let registry = state_registry(cfg)?;
    let today = registry.today();
    let groups = registry.groups();
    if groups.is_empty() {
        println!("No groups yet.");
    }
    for g in groups {
        let day = if g.qotd_answered_on(today) {
            format!("{}/{} responses", g.responses_sent, cfg.bot.max_responses_per_day)
        } else {
            "awaiting QOTD".to_string()
        };
        let last = g
            .last_answered_question_date
            .map_or_else(|| "never".to_string(), |d| d.to_string());
        let fate = if g.is_dead() { "  (the king is dead)" } else { "" };
        println!(
            "{} [{}]  unrest {}%  {day}  last QOTD {last}  history {}{fate}",
            g.display_name,
            g.group_id,
            g.peasant_unrest_percentage,
            g.chat_history.len()
        );
    }
    Ok(())
}

async fn chat(
    url: &str,
    token: Option<&str>,
    group: &str,
    user: &str,
    message: Option<&str>,
) -> Result<()> {
    let client = reqwest::Client::new();
    if let Some(msg) = message {
        println!("{}", send_message(&client, url, token, group, user, msg).await?);
        return Ok(());
    }
    // Interactive REPL
    let stdin = std::io::stdin();
    loop {
        eprint!("{user}> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        match send_message(&client, url, token, group, user, line).await {
            Ok(text) => println!("\n{text}\n"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

async fn send_message(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    group: &str,
    user: &str,
    text: &str,
) -> Result<String> {
    let (mention, text) = channel::strip_mention(text);
    let mut req = client.post(format!("{url}/message")).json(&serde_json::json!({
        "text": text,
        "group": group,
        "user": user,
        "mention": mention,
    }));
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("API error: {} {}", resp.status(), resp.text().await?);
    }
    let body: Value = resp.json().await?;
    let replies: Vec<&str> = body["replies"]
        .as_array()
        .map(|r| r.iter().filter_map(|s| s["text"].as_str()).collect())
        .unwrap_or_default();
    if replies.is_empty() {
        return Ok("(the king is silent)".to_string());
    }
    Ok(replies.join("\n"))
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_localhost_loopback() {
        assert!(is_localhost("127.0.0.1:3000"));
        assert!(is_localhost("localhost:3000"));
        assert!(is_localhost("[::1]:3000"));
    }

    #[test]
    fn test_is_localhost_rejects_non_local() {
        assert!(!is_localhost("0.0.0.0:3000"));
        assert!(!is_localhost("192.168.1.1:3000"));
        assert!(!is_localhost("localhost.evil.com:3000"));
        assert!(!is_localhost("127.0.0.1.1:3000"));
    }

    #[test]
    fn test_is_localhost_malformed_no_panic() {
        assert!(!is_localhost("]"));
        assert!(!is_localhost("[]"));
        assert!(!is_localhost(""));
        assert!(!is_localhost(":"));
    }

    #[tokio::test]
    async fn test_run_refuses_open_bind_without_key() {
        let mut cfg =
            config::parse("[llm]\nmodel = \"m\"\napi_key = \"k\"\n[api]\nbind = \"0.0.0.0:0\"\n")
                .unwrap();
        cfg.api.api_key = None;
        let err = run(cfg).await.unwrap_err();
        assert!(err.to_string().contains("API authentication required"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["monarch", "play", "--user", "Jean"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Play { ref user }) if user == "Jean"));
        let cli = Cli::try_parse_from(["monarch", "facts", "stallion"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Facts { ref query }) if query == "stallion"));
    }
}
