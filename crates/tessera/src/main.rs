use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use tessera::{
    run_authority_setup, run_certify, run_encrypt, run_read, run_serve, TesseraConfig,
};
use tessera_core::{AuthorityId, MessageId, ProcessInstanceId, SliceId};

/// Tessera: attribute-gated, multi-authority key issuance.
///
/// Authorities agree on parameters and issue key fragments; readers prove
/// their attributes in zero knowledge and assemble a decryption key.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run parameter agreement and key provisioning as one authority
    AuthoritySetup {
        /// Authority index (1-based)
        #[arg(short, long)]
        authority: u32,

        /// Process instance id
        #[arg(short, long)]
        process: u64,
    },

    /// Run the key-issuance server for one authority
    Serve {
        /// Authority index (1-based)
        #[arg(short, long)]
        authority: u32,

        /// Reject proof-carrying requests instead of verifying them
        #[arg(long)]
        disable_proof_verification: bool,
    },

    /// Certify attributes from a roles file
    Certify {
        /// Path to the roles JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Process instance id; generated when omitted
        #[arg(short, long)]
        process: Option<u64>,
    },

    /// Encrypt a file under a policy and publish it (data-owner utility)
    Encrypt {
        #[arg(short, long)]
        process: u64,

        #[arg(short, long)]
        message_id: u64,

        /// Policy expression, e.g. "(MANUFACTURER@A1 or CUSTOMS@A1)"
        #[arg(long)]
        policy: String,

        /// File to encrypt
        #[arg(short, long)]
        input: PathBuf,

        /// Sender identity recorded in the metadata
        #[arg(long)]
        sender: String,

        #[arg(short, long)]
        slice_id: Option<u64>,
    },

    /// Request key fragments and decrypt one message
    Read {
        #[arg(short, long)]
        process: u64,

        #[arg(short, long)]
        message_id: u64,

        #[arg(short, long)]
        slice_id: Option<u64>,

        /// Requester identity
        #[arg(long)]
        reader_name: String,

        /// Directory the recovered file is written to
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = match TesseraConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::AuthoritySetup { authority, process } => run_authority_setup(
            &config,
            AuthorityId(authority),
            ProcessInstanceId(process),
        ),
        Commands::Serve {
            authority,
            disable_proof_verification,
        } => run_serve(&config, AuthorityId(authority), disable_proof_verification),
        Commands::Certify { input, process } => {
            run_certify(&config, &input, process.map(ProcessInstanceId)).map(|_| ())
        }
        Commands::Encrypt {
            process,
            message_id,
            policy,
            input,
            sender,
            slice_id,
        } => run_encrypt(
            &config,
            ProcessInstanceId(process),
            MessageId(message_id),
            &policy,
            &input,
            &sender,
            slice_id.map(SliceId),
        ),
        Commands::Read {
            process,
            message_id,
            slice_id,
            reader_name,
            output_dir,
        } => run_read(
            &config,
            ProcessInstanceId(process),
            MessageId(message_id),
            slice_id.map(SliceId),
            &reader_name,
            &output_dir,
        ),
    };

    if let Err(e) = outcome {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
