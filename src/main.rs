use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};

use bedrock::config::{ConsensusParams, GenesisDoc, GenesisValidator, NodeConfig};
use bedrock::crypto::ed25519;
use bedrock::node::Node;

#[derive(Parser)]
#[command(name = "bedrockd", version, about = "BedRock Protocol Node", long_about = "Byzantine Fault Tolerant protocol node with deterministic WASM execution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new node: home directory, key, config, genesis.
    Init {
        moniker: String,
        #[arg(long)]
        home: Option<PathBuf>,
        #[arg(long, default_value = "bedrock-devnet")]
        chain_id: String,
    },
    /// Run the node.
    Start {
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Node key management.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
        #[arg(long, global = true)]
        home: Option<PathBuf>,
    },
    /// Print version information.
    Version,
}

#[derive(Subcommand)]
enum KeysAction {
    /// Generate a node key if none exists.
    Generate,
    /// Show the node's address and public key.
    Show,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Init { moniker, home, chain_id } => run_init(&moniker, home, &chain_id),
        Command::Start { home } => run_start(home),
        Command::Keys { action, home } => run_keys(action, home),
        Command::Version => {
            println!("bedrockd v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn default_home() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => Path::new(&home).join(".bedrockd"),
        Err(_) => PathBuf::from(".bedrockd"),
    }
}

fn resolve_home(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(default_home)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn run_init(moniker: &str, home: Option<PathBuf>, chain_id: &str) -> anyhow::Result<()> {
    let home = resolve_home(home);

    for dir in [home.clone(), home.join("data"), home.join("wasm")] {
        std::fs::create_dir_all(&dir)?;
    }

    let (_, verify_key) = ed25519::load_or_generate_keypair(home.join("node_key"))?;
    let address = ed25519::address_from_pubkey(&verify_key);

    let mut cfg = NodeConfig::default();
    cfg.node.moniker = moniker.to_string();
    cfg.node.chain_id = chain_id.to_string();
    cfg.node.data_dir = home.join("data").to_string_lossy().into_owned();
    std::fs::write(home.join("config.toml"), cfg.to_toml()?)?;

    let genesis = GenesisDoc {
        chain_id: chain_id.to_string(),
        genesis_time: now_ms(),
        validators: vec![GenesisValidator {
            address: address.to_string(),
            pub_key: hex::encode(verify_key.as_bytes()),
            power: 100,
            name: moniker.to_string(),
        }],
        app_state_root: String::new(),
        consensus_params: ConsensusParams {
            max_block_size: 2 * 1024 * 1024,
            max_block_gas: 100_000_000,
            max_validators: 128,
        },
    };
    genesis.save(&home.join("genesis.json"))?;

    println!("Initialized BedRock node");
    println!("  Home:     {}", home.display());
    println!("  Node ID:  {}", hex::encode(&address.0[..8]));
    println!("  Chain:    {}", chain_id);
    println!("  Moniker:  {}", moniker);
    println!();
    println!("Start with: bedrockd start --home {}", home.display());
    Ok(())
}

fn run_start(home: Option<PathBuf>) -> anyhow::Result<()> {
    let home = resolve_home(home);

    let cfg = NodeConfig::load_or_default(&home.join("config.toml"));
    init_logging(&cfg);

    info!(home = %home.display(), chain_id = %cfg.node.chain_id, moniker = %cfg.node.moniker, "loading configuration");

    let genesis = GenesisDoc::load(&home.join("genesis.json"))?;
    let (signing_key, verify_key) = ed25519::load_or_generate_keypair(home.join("node_key"))?;
    let address = ed25519::address_from_pubkey(&verify_key);

    info!(
        node_id = %hex::encode(&address.0[..8]),
        validators = genesis.validators.len(),
        "starting node"
    );

    let mut node = Node::new(&cfg, &genesis, signing_key, None)?;
    node.start()?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        tokio::signal::ctrl_c().await.ok();
    });
    info!("shutdown initiated");

    node.stop();

    if node.is_halted() {
        error!("node halted on a durability failure");
        anyhow::bail!("node halted");
    }
    Ok(())
}

fn run_keys(action: KeysAction, home: Option<PathBuf>) -> anyhow::Result<()> {
    let home = resolve_home(home);
    let key_path = home.join("node_key");

    match action {
        KeysAction::Generate => {
            if key_path.exists() {
                anyhow::bail!("key already exists at {}", key_path.display());
            }
            std::fs::create_dir_all(&home)?;
            let (_, verify_key) = ed25519::load_or_generate_keypair(&key_path)?;
            let address = ed25519::address_from_pubkey(&verify_key);
            println!("Generated node key");
            println!("  Address: {}", address);
            println!("  PubKey:  {}", hex::encode(verify_key.as_bytes()));
        }
        KeysAction::Show => {
            if !key_path.exists() {
                anyhow::bail!("no key at {} (run `bedrockd keys generate`)", key_path.display());
            }
            let (_, verify_key) = ed25519::load_or_generate_keypair(&key_path)?;
            let address = ed25519::address_from_pubkey(&verify_key);
            println!("  Address: {}", address);
            println!("  PubKey:  {}", hex::encode(verify_key.as_bytes()));
        }
    }
    Ok(())
}

fn init_logging(cfg: &NodeConfig) {
    use tracing_subscriber::EnvFilter;

    let env_filter = if let Some(ref module_levels) = cfg.logging.module_levels {
        EnvFilter::try_new(module_levels).unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level))
    } else {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level))
    };

    if cfg.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
