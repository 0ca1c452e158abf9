//! Command implementations for the tessera binary.
//!
//! The binary is a thin orchestrator: it opens the durable backends from
//! the config, wires the subsystem crates together, and runs one command.

pub mod config;
pub mod error;

pub use config::TesseraConfig;
pub use error::{CliError, CliResult};

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;

use tessera_authority::{
    provision_key_share, AuthorityCoordinator, AuthorityStore, CoordinatorConfig,
    KeyIssuanceServer,
};
use tessera_certifier::{Certifier, CertifierStore, RoleAssignments};
use tessera_core::{
    AuthorityId, CiphertextPointer, ContentStore, Ledger, MessageId, MetricsCollector,
    ProcessInstanceId, ReaderGid, SliceId,
};
use tessera_ledger::{RetryPolicy, SqliteContentStore, SqliteLedger};
use tessera_policy::{
    encrypt_slice, AttributePublicKey, CiphertextRecord, PolicyExpr, PublicParameters,
    RecordMetadata,
};
use tessera_reader::{DecryptionRequest, ReaderClient};
use tessera_zk::ReferenceBackend;

struct Backends {
    ledger: Arc<SqliteLedger>,
    content: Arc<SqliteContentStore>,
}

fn open_backends(config: &TesseraConfig) -> CliResult<Backends> {
    std::fs::create_dir_all(&config.data_dir)?;
    let ledger = SqliteLedger::open(&config.ledger_path().to_string_lossy())?;
    let content = SqliteContentStore::open(&config.content_store_path().to_string_lossy())?;
    Ok(Backends {
        ledger: Arc::new(ledger),
        content: Arc::new(content),
    })
}

fn retry_policy(config: &TesseraConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.retry_max_attempts,
        Duration::from_millis(config.retry_base_delay_ms),
    )
}

/// `authority-setup`: run parameter agreement as one authority and
/// provision its key share.
pub fn run_authority_setup(
    config: &TesseraConfig,
    authority_id: AuthorityId,
    process_instance: ProcessInstanceId,
) -> CliResult<()> {
    let backends = open_backends(config)?;
    let metrics = MetricsCollector::new();
    let coordinator = AuthorityCoordinator::new(
        authority_id,
        config.authorities(),
        backends.ledger.clone(),
        backends.content.clone(),
        CoordinatorConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_rounds: config.max_rounds,
        },
    );
    let params = coordinator.run(process_instance, &mut OsRng, &metrics)?;

    let store = AuthorityStore::open(
        authority_id,
        &config.authority_store_path(authority_id).to_string_lossy(),
    )?;
    provision_key_share(&store, backends.ledger.as_ref(), &params, &mut OsRng)?;
    metrics.flush();
    println!("authority {authority_id} ready for process {process_instance}");
    Ok(())
}

/// `serve`: run the key-issuance server for one authority. Blocks.
pub fn run_serve(
    config: &TesseraConfig,
    authority_id: AuthorityId,
    disable_proof_verification: bool,
) -> CliResult<()> {
    let backends = open_backends(config)?;
    let store = Arc::new(AuthorityStore::open(
        authority_id,
        &config.authority_store_path(authority_id).to_string_lossy(),
    )?);
    let mut server = KeyIssuanceServer::new(
        authority_id,
        backends.ledger.clone(),
        backends.content.clone(),
        Arc::new(ReferenceBackend::new()),
        store,
    );
    if disable_proof_verification {
        server = server.disable_proof_verification();
    }
    let listener = TcpListener::bind(config.address_for(authority_id))
        .map_err(tessera_authority::AuthorityError::from)?;
    Arc::new(server).serve(listener)?;
    Ok(())
}

/// `certify`: assign attributes from a roles file. Generates a fresh
/// process instance id when none is supplied.
pub fn run_certify(
    config: &TesseraConfig,
    roles_path: &Path,
    process_instance: Option<ProcessInstanceId>,
) -> CliResult<ProcessInstanceId> {
    let backends = open_backends(config)?;
    let process_instance =
        process_instance.unwrap_or_else(|| ProcessInstanceId::generate(&mut OsRng));

    let raw = std::fs::read(roles_path)?;
    let assignments = RoleAssignments::from_json(&raw)?;

    let certifier = Certifier::new(
        CertifierStore::open(&config.certifier_store_path().to_string_lossy())?,
        backends.ledger.clone(),
        backends.content.clone(),
    );
    let metrics = MetricsCollector::new();
    let summary = certifier.certify(process_instance, &assignments, &mut OsRng, &metrics)?;
    metrics.flush();
    println!(
        "certified {} attributes for {} readers under process {}",
        summary.attributes, summary.readers, summary.process_instance
    );
    Ok(process_instance)
}

/// `encrypt`: the data-owner convenience — encrypt a file under a policy
/// and publish its pointer.
#[allow(clippy::too_many_arguments)]
pub fn run_encrypt(
    config: &TesseraConfig,
    process_instance: ProcessInstanceId,
    message_id: MessageId,
    policy: &str,
    input: &Path,
    sender: &str,
    slice_id: Option<SliceId>,
) -> CliResult<()> {
    let backends = open_backends(config)?;
    let policy: PolicyExpr = policy.parse()?;
    let payload = std::fs::read(input)?;
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CliError::Config(format!("{} has no file name", input.display())))?;

    let params = resolve_parameters(
        backends.ledger.as_ref(),
        backends.content.as_ref(),
        &config.authorities(),
        process_instance,
    )?;
    let mut authority_keys = BTreeMap::new();
    for authority in config.authorities() {
        let bytes = backends
            .ledger
            .authority_public_key(authority, process_instance)?
            .ok_or_else(|| {
                CliError::Config(format!("authority {authority} has no published key"))
            })?;
        authority_keys.insert(
            authority,
            AttributePublicKey::from_ledger_bytes(authority, &bytes)?,
        );
    }

    let slice = encrypt_slice(
        &params,
        &authority_keys,
        &policy,
        &file_name,
        &payload,
        slice_id,
        &mut OsRng,
    )?;
    let record = CiphertextRecord {
        metadata: RecordMetadata {
            sender: ReaderGid::new(sender),
            process_instance,
            message_id,
        },
        slices: vec![slice],
    };
    let content_id = backends.content.put(&record.to_bytes()?)?;

    let pointer = CiphertextPointer {
        message_id,
        content: content_id,
        sender: ReaderGid::new(sender),
    };
    retry_policy(config).run("publish ciphertext pointer", || {
        backends.ledger.publish_ciphertext_pointer(&pointer)
    })?;
    println!("message {message_id} published for process {process_instance}");
    Ok(())
}

/// `read`: collect fragments and decrypt one message.
pub fn run_read(
    config: &TesseraConfig,
    process_instance: ProcessInstanceId,
    message_id: MessageId,
    slice_id: Option<SliceId>,
    reader_name: &str,
    output_dir: &Path,
) -> CliResult<()> {
    if !output_dir.is_dir() {
        return Err(CliError::Config(format!(
            "output directory {} does not exist",
            output_dir.display()
        )));
    }
    let backends = open_backends(config)?;
    let gid = ReaderGid::new(reader_name);

    // The local certifier store is this deployment's trusted delivery
    // channel for attribute tuples.
    let certifier = Certifier::new(
        CertifierStore::open(&config.certifier_store_path().to_string_lossy())?,
        backends.ledger.clone(),
        backends.content.clone(),
    );
    let tuples = certifier.issued_tuples(process_instance, &gid)?;

    let client = ReaderClient::new(
        gid,
        backends.ledger.clone(),
        backends.content.clone(),
        Arc::new(ReferenceBackend::new()),
        config.authority_addresses(),
    );
    let metrics = MetricsCollector::new();
    let request = DecryptionRequest::new(process_instance, message_id, slice_id, output_dir);
    let written = client.decrypt(&tuples, &request, &metrics)?;
    metrics.flush();
    println!("recovered {}", written.display());
    Ok(())
}

fn resolve_parameters(
    ledger: &dyn Ledger,
    content: &dyn ContentStore,
    authorities: &[AuthorityId],
    process_instance: ProcessInstanceId,
) -> CliResult<PublicParameters> {
    let mut pointers = Vec::new();
    for &authority in authorities {
        let pointer = ledger
            .parameters_pointer(authority, process_instance)?
            .ok_or_else(|| {
                CliError::Config(format!(
                    "authority {authority} has not published parameters for {process_instance}"
                ))
            })?;
        pointers.push(pointer);
    }
    let Some(first) = pointers.first() else {
        return Err(CliError::Config("no authorities configured".into()));
    };
    if pointers.iter().any(|p| p != first) {
        return Err(CliError::Config(
            "authorities disagree on the public parameters".into(),
        ));
    }
    let bytes = content
        .get(first)?
        .ok_or_else(|| CliError::Config(format!("parameters blob {first} missing")))?;
    Ok(PublicParameters::from_canonical_bytes(&bytes)?)
}
