use charprefix::oracle::{ExactOracle, LogprobTransport, TokenLogprob, TransportError};
use charprefix::utils::config::{EngineConfig, SamplingParams};
use charprefix::utils::{build_shared, load_vocabulary};
use charprefix::PrefixEngine;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vocabulary: a `tokenizer.json` or a JSON fragment table
    /// (array of strings, or object of id -> fragment)
    #[arg(long)]
    vocab: PathBuf,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tokens that may be emitted while `prefix` is still required
    Compatible {
        #[arg(long)]
        prefix: String,

        /// Drop tokens that leave an uncoverable remainder
        #[arg(long, default_value_t = false)]
        viable: bool,
    },

    /// Generate against a static log-probability table
    Generate {
        /// JSON object of context suffix -> [[token_id, logprob], ...].
        /// The longest key the current text ends with is used; "" is the fallback.
        #[arg(long)]
        logprobs: PathBuf,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long)]
        prefix: String,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        top_p: Option<f64>,

        #[arg(long, value_delimiter = '|')]
        stop: Option<Vec<String>>,
    },
}

/// Log-probabilities read once from disk, keyed by context suffix.
struct TableTransport {
    table: HashMap<String, Vec<TokenLogprob>>,
}

impl TableTransport {
    fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw: HashMap<String, Vec<(u32, f64)>> =
            serde_json::from_reader(std::io::BufReader::new(std::fs::File::open(path)?))?;
        let table = raw
            .into_iter()
            .map(|(key, entries)| {
                let entries = entries
                    .into_iter()
                    .map(|(token, logprob)| TokenLogprob { token, logprob })
                    .collect();
                (key, entries)
            })
            .collect();
        Ok(Self { table })
    }
}

impl LogprobTransport for TableTransport {
    async fn top_logprobs(&self, context: &str) -> Result<Vec<TokenLogprob>, TransportError> {
        self.table
            .iter()
            .filter(|(key, _)| context.ends_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, entries)| entries.clone())
            .ok_or_else(|| TransportError::Request(format!("no entry for context {context:?}")))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let (vocab, trie) = build_shared(load_vocabulary(&args.vocab)?);

    match args.command {
        Command::Compatible { prefix, viable } => {
            let tokens = if viable {
                trie.viable_tokens(&prefix, &[])
            } else {
                trie.compatible_tokens(&prefix)
            };
            let mut tokens: Vec<u32> = tokens.into_iter().collect();
            tokens.sort_unstable();
            for token in tokens {
                println!("{token}\t{:?}", vocab.fragment_of(token)?);
            }
        }
        Command::Generate {
            logprobs,
            context,
            prefix,
            temperature,
            max_tokens,
            seed,
            top_k,
            top_p,
            stop,
        } => {
            let oracle = ExactOracle::new(TableTransport::from_file(&logprobs)?);
            let engine = PrefixEngine::new(vocab, trie, oracle, config)?;
            let params =
                SamplingParams::new(temperature, max_tokens, stop, top_k, top_p, None, seed);
            tracing::info!("{:?}", params);
            let output = engine.generate_with_prefix(&context, &prefix, &params).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
